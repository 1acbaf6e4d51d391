//! Document rewriter adapter: one extractor call per document.

use tracing::debug;

use assetweave_extract::{ExtractOptions, ReferenceExtractor};
use assetweave_shared::{AssetGroup, AssetweaveError, Contents, Result, VFile};

/// A document after extraction, plus the groups it declared.
#[derive(Debug)]
pub struct RewrittenDocument {
    pub document: VFile,
    pub groups: Vec<AssetGroup>,
}

/// Run the extractor over a buffered document and swap in the rewritten
/// contents.
///
/// Null and empty documents pass through unchanged with no groups.
/// Streaming documents are rejected with [`AssetweaveError::UnsupportedInput`].
pub fn rewrite_document(
    extractor: &dyn ReferenceExtractor,
    opts: &ExtractOptions,
    mut document: VFile,
) -> Result<RewrittenDocument> {
    if document.is_stream() {
        return Err(AssetweaveError::unsupported_input(&document.path));
    }

    // Null contents also report an empty byte slice.
    if document.bytes().is_empty() {
        return Ok(RewrittenDocument {
            document,
            groups: Vec::new(),
        });
    }

    let extraction = extractor.extract(&document.contents_str(), opts)?;
    debug!(
        path = %document.path.display(),
        groups = extraction.groups.len(),
        "document rewritten"
    );

    document.contents = Contents::Buffer(extraction.rewritten.into_bytes());
    Ok(RewrittenDocument {
        document,
        groups: extraction.groups,
    })
}
