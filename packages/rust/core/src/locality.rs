//! Local vs. remote reference classification.

use url::Url;

/// Decides whether a reference can be resolved on the local filesystem.
pub trait LocalityTest: Send + Sync {
    fn is_local(&self, reference: &str) -> bool;
}

/// References with a URL scheme (`https:`, `data:`, ...) or a
/// protocol-relative `//host` prefix are remote. Single-letter schemes are
/// Windows drive letters and count as local.
///
/// Unlike a plain relative-URL check, the two edge cases invert:
/// `//cdn/x.js` is never looked up on disk, while `C:/x.js` is.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlLocality;

impl LocalityTest for UrlLocality {
    fn is_local(&self, reference: &str) -> bool {
        if reference.starts_with("//") {
            return false;
        }
        match Url::parse(reference) {
            Ok(url) => url.scheme().len() == 1,
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_references() {
        let t = UrlLocality;
        assert!(t.is_local("css/app.css"));
        assert!(t.is_local("/css/app.css"));
        assert!(t.is_local("../vendor/x.js"));
        assert!(t.is_local("C:/assets/a.css"));
        assert!(!t.is_local("https://cdn.example.com/x.js"));
        assert!(!t.is_local("//cdn.example.com/x.js"));
        assert!(!t.is_local("data:text/css,body{}"));
    }
}
