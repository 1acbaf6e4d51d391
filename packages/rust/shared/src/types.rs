//! Core domain types: virtual files, asset groups, and search paths.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Asset types processed when none are configured.
pub const DEFAULT_TYPES: [&str; 2] = ["css", "js"];

// ---------------------------------------------------------------------------
// VFile
// ---------------------------------------------------------------------------

/// A file travelling through the pipeline: a document, a resolved asset,
/// an external file, or a concatenated group output.
#[derive(Debug, Clone)]
pub struct VFile {
    /// Working directory the file was created relative to.
    pub cwd: PathBuf,
    /// Base directory; `path` relative to `base` is the output location.
    pub base: PathBuf,
    /// Full path of the file.
    pub path: PathBuf,
    /// File contents.
    pub contents: Contents,
}

impl VFile {
    /// Create a buffered file. `base` defaults to the file's directory.
    pub fn new(cwd: impl Into<PathBuf>, path: impl Into<PathBuf>, contents: Vec<u8>) -> Self {
        let path = path.into();
        let base = parent_dir(&path);
        Self {
            cwd: cwd.into(),
            base,
            path,
            contents: Contents::Buffer(contents),
        }
    }

    /// Override the base directory.
    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = base.into();
        self
    }

    /// Replace the contents.
    pub fn with_contents(mut self, contents: Contents) -> Self {
        self.contents = contents;
        self
    }

    /// Directory containing this file's path.
    pub fn dirname(&self) -> PathBuf {
        parent_dir(&self.path)
    }

    /// Path relative to `base`, or the full path when it lies outside `base`.
    pub fn relative(&self) -> PathBuf {
        self.path
            .strip_prefix(&self.base)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| self.path.clone())
    }

    pub fn is_null(&self) -> bool {
        matches!(self.contents, Contents::Null)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.contents, Contents::Stream(_))
    }

    /// Buffered contents as bytes (empty for null or streaming files).
    pub fn bytes(&self) -> &[u8] {
        match &self.contents {
            Contents::Buffer(b) => b,
            _ => &[],
        }
    }

    /// Buffered contents decoded as UTF-8 (lossy).
    pub fn contents_str(&self) -> String {
        String::from_utf8_lossy(self.bytes()).into_owned()
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// File contents.
#[derive(Debug, Clone)]
pub enum Contents {
    /// No contents (e.g. a directory entry); passed through untouched.
    Null,
    /// Fully buffered contents.
    Buffer(Vec<u8>),
    /// Unbuffered streaming contents.
    Stream(StreamBody),
}

/// Shared handle to a streaming body.
#[derive(Clone)]
pub struct StreamBody(Arc<Mutex<Box<dyn Read + Send>>>);

impl StreamBody {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(reader))))
    }
}

impl fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamBody(..)")
    }
}

// ---------------------------------------------------------------------------
// SearchPath
// ---------------------------------------------------------------------------

/// Directory (or set of alternative directories) that references are
/// resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchPath {
    Single(PathBuf),
    Alternatives(Vec<PathBuf>),
}

impl SearchPath {
    /// Build a search path from a list, collapsing a single entry.
    pub fn from_list(mut dirs: Vec<PathBuf>) -> Option<Self> {
        match dirs.len() {
            0 => None,
            1 => dirs.pop().map(Self::Single),
            _ => Some(Self::Alternatives(dirs)),
        }
    }

    /// Render as a pattern root, resolving relative entries against `cwd`.
    ///
    /// Alternatives render as a `{a,b}` brace group.
    pub fn to_pattern_root(&self, cwd: &Path) -> String {
        match self {
            Self::Single(dir) => cwd.join(dir).to_string_lossy().into_owned(),
            Self::Alternatives(dirs) => {
                let joined: Vec<String> = dirs
                    .iter()
                    .map(|d| cwd.join(d).to_string_lossy().into_owned())
                    .collect();
                format!("{{{}}}", joined.join(","))
            }
        }
    }
}

impl From<&str> for SearchPath {
    fn from(dir: &str) -> Self {
        Self::Single(PathBuf::from(dir))
    }
}

// ---------------------------------------------------------------------------
// Asset groups
// ---------------------------------------------------------------------------

/// The references and optional search override declared for one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSpec {
    /// Asset references in declaration order.
    pub assets: Vec<String>,
    /// Per-group search directory override.
    pub search_paths: Option<SearchPath>,
}

/// One named group of a given asset type, destined for one output unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetGroup {
    /// Logical category, e.g. `css` or `js`.
    pub kind: String,
    /// Output unit name, e.g. `styles/app.css`.
    pub name: String,
    pub spec: GroupSpec,
}

/// What a reference extractor returns for one document.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// The document with each block replaced by its output reference.
    pub rewritten: String,
    /// Groups in declaration order.
    pub groups: Vec<AssetGroup>,
}

impl Extraction {
    /// Groups of a single type, in declaration order.
    pub fn groups_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a AssetGroup> + 'a {
        self.groups.iter().filter(move |g| g.kind == kind)
    }
}
