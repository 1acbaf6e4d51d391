//! Build-block extractor.
//!
//! Recognised syntax:
//! - `<!-- build:<type>[(<alt>,<alt>)] <name> -->` opens a block
//! - `href="..."` / `src="..."` attributes inside the block are its references
//! - `<!-- endbuild -->` closes it
//!
//! The block `remove` deletes its contents without producing a group.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use assetweave_shared::{AssetGroup, Extraction, GroupSpec, Result, SearchPath};

use crate::{ExtractOptions, ReferenceExtractor};

/// Block type whose contents are dropped entirely.
const REMOVE_KIND: &str = "remove";

/// Matches one complete build block, including leading indentation.
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)([ \t]*)<!--\s*build:([\w-]+)(?:\(([^)]*)\))?\s*(\S*?)\s*-->(.*?)<!--\s*endbuild\s*-->",
    )
    .expect("block regex")
});

/// Matches an `href` or `src` attribute value.
static REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:href|src)\s*=\s*["']([^"']+)["']"#).expect("ref regex")
});

/// Extractor for `<!-- build:... -->` annotated HTML.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildBlockExtractor;

impl ReferenceExtractor for BuildBlockExtractor {
    fn extract(&self, content: &str, opts: &ExtractOptions) -> Result<Extraction> {
        let mut rewritten = String::with_capacity(content.len());
        let mut groups: Vec<AssetGroup> = Vec::new();
        let mut last = 0;

        for caps in BLOCK_RE.captures_iter(content) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            rewritten.push_str(&content[last..whole.start()]);
            last = whole.end();

            let indent = &caps[1];
            let kind = &caps[2];
            let name = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
            let body = caps.get(5).map(|m| m.as_str()).unwrap_or_default();

            if kind == REMOVE_KIND {
                continue;
            }

            if name.is_empty() {
                debug!(kind, "build block without a target name, keeping contents");
                rewritten.push_str(indent);
                rewritten.push_str(body.trim());
                continue;
            }

            match opts.render(kind, name) {
                Some(tag) => {
                    rewritten.push_str(indent);
                    rewritten.push_str(&tag);
                }
                None => {
                    rewritten.push_str(indent);
                    rewritten.push_str(body.trim());
                }
            }

            let assets: Vec<String> = REF_RE
                .captures_iter(body)
                .map(|c| c[1].trim().to_string())
                .collect();
            let search_paths = caps.get(3).and_then(|m| parse_search_paths(m.as_str()));

            merge_group(&mut groups, kind, name, assets, search_paths);
        }

        rewritten.push_str(&content[last..]);

        debug!(groups = groups.len(), "build blocks extracted");

        Ok(Extraction { rewritten, groups })
    }
}

/// Split `(a, b)` contents into a search path override.
fn parse_search_paths(raw: &str) -> Option<SearchPath> {
    let dirs = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Into::into)
        .collect();
    SearchPath::from_list(dirs)
}

/// Blocks repeating a (type, name) pair extend the earlier group.
fn merge_group(
    groups: &mut Vec<AssetGroup>,
    kind: &str,
    name: &str,
    assets: Vec<String>,
    search_paths: Option<SearchPath>,
) {
    if let Some(existing) = groups.iter_mut().find(|g| g.kind == kind && g.name == name) {
        existing.spec.assets.extend(assets);
        if existing.spec.search_paths.is_none() {
            existing.spec.search_paths = search_paths;
        }
        return;
    }

    groups.push(AssetGroup {
        kind: kind.to_string(),
        name: name.to_string(),
        spec: GroupSpec {
            assets,
            search_paths,
        },
    });
}
