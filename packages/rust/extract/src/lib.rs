//! Reference extraction: find asset blocks in a document and rewrite them.
//!
//! The pipeline talks to extractors only through [`ReferenceExtractor`].
//! [`BuildBlockExtractor`] is the stock implementation for HTML documents
//! annotated with `<!-- build:<type> <name> --> ... <!-- endbuild -->` blocks.

mod blocks;

use std::collections::HashMap;

use assetweave_shared::{Extraction, Result};

pub use blocks::BuildBlockExtractor;

/// Placeholder substituted with the group name in replacement templates.
pub const NAME_PLACEHOLDER: &str = "{name}";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Options handed to an extractor for every document.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Replacement template per asset type. `{name}` is replaced with the
    /// group's output name.
    pub templates: HashMap<String, String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        let templates = [
            ("css", r#"<link rel="stylesheet" href="{name}">"#),
            ("js", r#"<script src="{name}"></script>"#),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { templates }
    }
}

impl ExtractOptions {
    /// Register or replace the template for an asset type.
    pub fn with_template(mut self, kind: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(kind.into(), template.into());
        self
    }

    /// Render the replacement tag for a group, if a template exists.
    pub fn render(&self, kind: &str, name: &str) -> Option<String> {
        self.templates
            .get(kind)
            .map(|t| t.replace(NAME_PLACEHOLDER, name))
    }
}

/// Discovers asset groups in a document and produces its rewritten content.
///
/// Called exactly once per buffered document.
pub trait ReferenceExtractor: Send + Sync {
    fn extract(&self, content: &str, opts: &ExtractOptions) -> Result<Extraction>;
}
