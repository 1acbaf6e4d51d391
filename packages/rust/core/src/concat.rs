//! Concatenation of a group's files into one output unit.

use tracing::warn;

use assetweave_shared::{Contents, VFile};

/// Merges a group's files, in order, into a single file named `name`.
///
/// Returns `None` when there is nothing to concatenate.
pub trait Concatenator: Send + Sync {
    fn concat(&self, name: &str, files: Vec<VFile>) -> Option<VFile>;
}

/// Joins buffered contents with a separator.
///
/// The output lives at `<first.base>/<name>` and inherits the first file's
/// `cwd` and `base`. Null files are skipped; streaming files are skipped
/// with a warning.
#[derive(Debug, Clone)]
pub struct NewlineConcat {
    newline: String,
}

impl NewlineConcat {
    pub fn new(newline: impl Into<String>) -> Self {
        Self {
            newline: newline.into(),
        }
    }
}

impl Default for NewlineConcat {
    fn default() -> Self {
        Self::new("\n")
    }
}

impl Concatenator for NewlineConcat {
    fn concat(&self, name: &str, files: Vec<VFile>) -> Option<VFile> {
        let mut first: Option<(std::path::PathBuf, std::path::PathBuf)> = None;
        let mut buf: Vec<u8> = Vec::new();

        for file in files {
            match &file.contents {
                Contents::Null => continue,
                Contents::Stream(_) => {
                    warn!(path = %file.path.display(), "streaming file skipped during concat");
                    continue;
                }
                Contents::Buffer(bytes) => {
                    if first.is_none() {
                        first = Some((file.cwd.clone(), file.base.clone()));
                    } else {
                        buf.extend_from_slice(self.newline.as_bytes());
                    }
                    buf.extend_from_slice(bytes);
                }
            }
        }

        let (cwd, base) = first?;
        Some(VFile::new(cwd, base.join(name), buf).with_base(base))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn file(path: &str, body: &str) -> VFile {
        VFile::new("/w", path, body.as_bytes().to_vec()).with_base("/w/site")
    }

    #[test]
    fn joins_in_order_with_newline() {
        let out = NewlineConcat::default()
            .concat(
                "css/app.css",
                vec![file("/w/site/a.css", "a{}"), file("/w/site/b.css", "b{}")],
            )
            .expect("output");

        assert_eq!(out.contents_str(), "a{}\nb{}");
        assert_eq!(out.path, PathBuf::from("/w/site/css/app.css"));
        assert_eq!(out.relative(), PathBuf::from("css/app.css"));
    }

    #[test]
    fn custom_separator_and_null_skip() {
        let null = file("/w/site/n.js", "").with_contents(Contents::Null);
        let out = NewlineConcat::new(";\n")
            .concat("app.js", vec![null, file("/w/site/a.js", "a()"), file("/w/site/b.js", "b()")])
            .expect("output");
        assert_eq!(out.contents_str(), "a();\nb()");
    }

    #[test]
    fn nothing_to_concat() {
        assert!(NewlineConcat::default().concat("app.js", vec![]).is_none());
    }
}
