//! Pattern expansion and file retrieval.
//!
//! [`PatternMatcher`] turns one pattern into concrete paths; [`FileSource`]
//! turns a list of patterns into a stream of loaded files. The defaults are
//! backed by the `glob` crate and `tokio::fs`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use assetweave_shared::{AssetweaveError, Result, VFile};

/// A stream of files flowing through a group pipeline.
pub type FileStream = BoxStream<'static, Result<VFile>>;

/// Characters that make a pattern a glob rather than a literal path.
const MAGIC_CHARS: [char; 4] = ['*', '?', '[', '{'];

// ---------------------------------------------------------------------------
// Pattern matching
// ---------------------------------------------------------------------------

/// Expands a filesystem pattern into matching paths.
///
/// An empty result is valid and means "nothing matched".
pub trait PatternMatcher: Send + Sync {
    fn expand(&self, pattern: &str) -> Result<Vec<String>>;
}

/// `glob`-backed matcher with `{a,b}` alternative support.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobMatcher;

impl PatternMatcher for GlobMatcher {
    fn expand(&self, pattern: &str) -> Result<Vec<String>> {
        let mut matches = Vec::new();

        for alternative in expand_braces(pattern) {
            let paths = glob::glob(&alternative)
                .map_err(|e| AssetweaveError::retrieval(pattern, e.to_string()))?;

            for entry in paths {
                match entry {
                    Ok(path) => matches.push(path.to_string_lossy().into_owned()),
                    Err(e) => debug!(pattern, error = %e, "unreadable glob entry"),
                }
            }
        }

        Ok(matches)
    }
}

/// Whether `pattern` contains glob syntax.
pub fn has_magic(pattern: &str) -> bool {
    pattern.contains(MAGIC_CHARS)
}

/// Expand `{a,b}` brace groups into every alternative, left to right.
///
/// Unbalanced braces are left as-is.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    let mut depth = 0usize;
    let mut close = None;
    let mut splits = Vec::new();
    for (i, c) in pattern[open..].char_indices() {
        let at = open + i;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(at);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(at),
            _ => {}
        }
    }

    let Some(close) = close else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];

    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    bounds
        .windows(2)
        .flat_map(|w| {
            let option = &pattern[w[0] + 1..w[1]];
            expand_braces(&format!("{prefix}{option}{suffix}"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// File retrieval
// ---------------------------------------------------------------------------

/// Options for one retrieval.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// Working directory stamped onto loaded files.
    pub cwd: PathBuf,
    /// Base directory stamped onto loaded files.
    pub base: PathBuf,
}

/// Loads the files named by a list of patterns.
///
/// Failures are yielded as `Err` items; the stream keeps going afterwards.
pub trait FileSource: Send + Sync {
    fn retrieve(&self, patterns: Vec<String>, opts: RetrieveOptions) -> FileStream;
}

/// Reads matching files from the local filesystem.
///
/// A literal pattern that does not exist is an error; a glob that matches
/// nothing yields nothing. Each path is loaded at most once per retrieval.
#[derive(Clone)]
pub struct FsFileSource {
    matcher: Arc<dyn PatternMatcher>,
}

impl FsFileSource {
    pub fn new(matcher: Arc<dyn PatternMatcher>) -> Self {
        Self { matcher }
    }
}

impl Default for FsFileSource {
    fn default() -> Self {
        Self::new(Arc::new(GlobMatcher))
    }
}

impl FileSource for FsFileSource {
    fn retrieve(&self, patterns: Vec<String>, opts: RetrieveOptions) -> FileStream {
        let matcher = self.matcher.clone();

        stream::iter(patterns)
            .then(move |pattern| {
                let matcher = Arc::clone(&matcher);
                let opts = opts.clone();
                async move { load_pattern(matcher, &pattern, &opts).await }
            })
            .flat_map(stream::iter)
            .scan(HashSet::new(), |seen: &mut HashSet<PathBuf>, item| {
                let keep = match &item {
                    Ok(file) => seen.insert(file.path.clone()),
                    Err(_) => true,
                };
                futures::future::ready(Some(keep.then_some(item)))
            })
            .filter_map(futures::future::ready)
            .boxed()
    }
}

async fn load_pattern(
    matcher: Arc<dyn PatternMatcher>,
    pattern: &str,
    opts: &RetrieveOptions,
) -> Vec<Result<VFile>> {
    if !has_magic(pattern) {
        return vec![load_file(Path::new(pattern), pattern, opts).await];
    }

    // Directory walks block; keep them off the runtime workers.
    let owned = pattern.to_owned();
    let paths = match tokio::task::spawn_blocking(move || matcher.expand(&owned)).await {
        Ok(Ok(paths)) => paths,
        Ok(Err(e)) => return vec![Err(e)],
        Err(e) => {
            let message = format!("pattern expansion failed: {e}");
            return vec![Err(AssetweaveError::retrieval(pattern, message))];
        }
    };

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let path = PathBuf::from(path);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => continue,
            _ => files.push(load_file(&path, pattern, opts).await),
        }
    }
    files
}

async fn load_file(path: &Path, pattern: &str, opts: &RetrieveOptions) -> Result<VFile> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        let message = if e.kind() == std::io::ErrorKind::NotFound {
            format!("file not found: {}", path.display())
        } else {
            format!("{}: {e}", path.display())
        };
        AssetweaveError::retrieval(pattern, message)
    })?;

    debug!(path = %path.display(), len = bytes.len(), "loaded file");

    Ok(VFile::new(&opts.cwd, path, bytes).with_base(&opts.base))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("aw-source-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn opts(dir: &Path) -> RetrieveOptions {
        RetrieveOptions {
            cwd: dir.to_path_buf(),
            base: dir.to_path_buf(),
        }
    }

    #[test]
    fn brace_expansion() {
        assert_eq!(expand_braces("a/b.css"), vec!["a/b.css"]);
        assert_eq!(expand_braces("{x,y}/b.css"), vec!["x/b.css", "y/b.css"]);
        assert_eq!(expand_braces("{x,{y,z}}/*.js"), vec!["x/*.js", "y/*.js", "z/*.js"]);
        assert_eq!(expand_braces("{unclosed/a"), vec!["{unclosed/a"]);
    }

    #[test]
    fn magic_detection() {
        assert!(has_magic("css/*.css"));
        assert!(has_magic("{a,b}/x.css"));
        assert!(!has_magic("/site/css/a.css"));
    }

    #[test]
    fn glob_matcher_across_alternatives() {
        let dir = temp_dir();
        std::fs::create_dir_all(dir.join("app")).unwrap();
        std::fs::create_dir_all(dir.join("tmp")).unwrap();
        std::fs::write(dir.join("tmp/x.js"), "x").unwrap();

        let (app, tmp) = (dir.join("app"), dir.join("tmp"));
        let pattern = format!("{{{},{}}}/x.js", app.display(), tmp.display());
        let matches = GlobMatcher.expand(&pattern).unwrap();
        assert_eq!(matches, vec![dir.join("tmp/x.js").to_string_lossy().to_string()]);

        let none = GlobMatcher.expand(&format!("{}/nothing/*.js", dir.display())).unwrap();
        assert!(none.is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn retrieve_preserves_pattern_order() {
        let dir = temp_dir();
        std::fs::write(dir.join("b.css"), "b").unwrap();
        std::fs::write(dir.join("a.css"), "a").unwrap();

        let patterns = vec![
            dir.join("b.css").to_string_lossy().to_string(),
            dir.join("a.css").to_string_lossy().to_string(),
        ];
        let files: Vec<_> = FsFileSource::default()
            .retrieve(patterns, opts(&dir))
            .collect()
            .await;

        let contents: Vec<String> = files
            .into_iter()
            .map(|f| f.unwrap().contents_str())
            .collect();
        assert_eq!(contents, vec!["b", "a"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_literal_is_error_and_stream_continues() {
        let dir = temp_dir();
        std::fs::write(dir.join("a.css"), "a").unwrap();

        let patterns = vec![
            dir.join("missing.css").to_string_lossy().to_string(),
            dir.join("a.css").to_string_lossy().to_string(),
        ];
        let files: Vec<_> = FsFileSource::default()
            .retrieve(patterns, opts(&dir))
            .collect()
            .await;

        assert_eq!(files.len(), 2);
        match &files[0] {
            Err(AssetweaveError::Retrieval { message, .. }) => {
                assert!(message.contains("file not found"));
            }
            other => panic!("expected retrieval error, got {other:?}"),
        }
        assert_eq!(files[1].as_ref().unwrap().contents_str(), "a");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn duplicate_paths_loaded_once() {
        let dir = temp_dir();
        std::fs::write(dir.join("a.css"), "a").unwrap();

        let literal = dir.join("a.css").to_string_lossy().to_string();
        let glob = format!("{}/*.css", dir.display());
        let files: Vec<_> = FsFileSource::default()
            .retrieve(vec![literal, glob], opts(&dir))
            .collect()
            .await;

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].as_ref().unwrap().relative(), PathBuf::from("a.css"));

        std::fs::remove_dir_all(&dir).ok();
    }

    /// Records which thread each expansion ran on.
    #[derive(Default)]
    struct ThreadMatcher(std::sync::Mutex<Vec<std::thread::ThreadId>>);

    impl PatternMatcher for ThreadMatcher {
        fn expand(&self, _pattern: &str) -> Result<Vec<String>> {
            self.0.lock().unwrap().push(std::thread::current().id());
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn glob_expansion_runs_off_the_runtime_thread() {
        let matcher = Arc::new(ThreadMatcher::default());
        let source = FsFileSource::new(matcher.clone());

        let files: Vec<_> = source
            .retrieve(vec!["/nowhere/*.js".into()], opts(Path::new("/nowhere")))
            .collect()
            .await;

        assert!(files.is_empty());
        let threads = matcher.0.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }
}
