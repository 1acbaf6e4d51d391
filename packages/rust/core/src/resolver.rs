//! Reference → pattern resolution.
//!
//! Every local reference becomes exactly one filesystem pattern, in
//! declaration order. When nothing on disk matches, the literal pattern is
//! kept so that retrieval fails loudly for that file instead of the asset
//! silently disappearing.

use std::path::{MAIN_SEPARATOR, Path};
use std::sync::Arc;

use tracing::{debug, warn};

use assetweave_shared::SearchPath;

use crate::locality::LocalityTest;
use crate::source::PatternMatcher;

/// Hook applied to the first match of every reference.
pub type PathTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Everything needed to resolve the references of one group.
pub struct ResolveContext<'a> {
    /// The group's own search override.
    pub group_search: Option<&'a SearchPath>,
    /// The configured default search path.
    pub global_search: Option<&'a SearchPath>,
    /// Working directory relative search paths are resolved against.
    pub cwd: &'a Path,
    /// Directory of the document the group was declared in.
    pub base_dir: &'a Path,
    pub transform_path: Option<&'a PathTransform>,
    pub locality: &'a dyn LocalityTest,
    pub matcher: &'a dyn PatternMatcher,
}

/// Resolve references into patterns, one per local reference, order kept.
pub fn resolve_patterns(references: &[String], ctx: &ResolveContext<'_>) -> Vec<String> {
    let root = match ctx.group_search.or(ctx.global_search) {
        Some(search) => search.to_pattern_root(ctx.cwd),
        None => ctx.base_dir.to_string_lossy().into_owned(),
    };

    references
        .iter()
        .filter(|r| ctx.locality.is_local(r))
        .map(|reference| resolve_one(&root, reference, ctx))
        .collect()
}

fn resolve_one(root: &str, reference: &str, ctx: &ResolveContext<'_>) -> String {
    let relative = reference.trim_start_matches(['/', '\\']);
    let pattern = format!("{root}{MAIN_SEPARATOR}{relative}");

    let matches = match ctx.matcher.expand(&pattern) {
        Ok(matches) => matches,
        Err(e) => {
            warn!(%pattern, error = %e, "pattern expansion failed, keeping literal");
            Vec::new()
        }
    };

    let mut first = matches.into_iter().next().unwrap_or_else(|| {
        debug!(%pattern, "no match, falling back to literal pattern");
        pattern
    });
    if let Some(transform) = ctx.transform_path {
        first = transform(&first);
    }
    first
}
