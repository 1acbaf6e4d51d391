//! Group pipeline runner: one asset group, end to end.
//!
//! Resolving → Retrieving → Merging → Transforming → Concatenating →
//! Relocating → Emitting. Failures along the way are reported on the
//! output; the group keeps going with whatever files it still has.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::ready;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use assetweave_shared::{AssetGroup, AssetweaveError, Result, VFile};

use crate::concat::Concatenator;
use crate::locality::LocalityTest;
use crate::merger::merge_ordered;
use crate::output::Emitter;
use crate::pipeline::UserefOptions;
use crate::resolver::{ResolveContext, resolve_patterns};
use crate::source::{FileSource, FileStream, PatternMatcher, RetrieveOptions};
use crate::stage::StageFactory;

/// Options and collaborators shared by every group of a run.
pub(crate) struct GroupContext {
    pub options: UserefOptions,
    pub locality: Arc<dyn LocalityTest>,
    pub matcher: Arc<dyn PatternMatcher>,
    pub source: Arc<dyn FileSource>,
    pub concatenator: Arc<dyn Concatenator>,
    pub stages: Vec<Arc<dyn StageFactory>>,
}

/// One group plus the per-document state it was declared with.
pub(crate) struct GroupJob {
    pub group: AssetGroup,
    pub cwd: PathBuf,
    /// Directory of the declaring document, captured when it arrived.
    pub base_dir: PathBuf,
    pub external: Arc<[VFile]>,
}

/// Run one group to completion. Returns the number of files emitted.
///
/// Per-file failures are reported on `out` and do not end the group. An
/// `Err` means the group stopped early: the output was closed
/// ([`AssetweaveError::Emit`]) or pattern resolution could not run.
#[instrument(skip_all, fields(kind = %job.group.kind, group = %job.group.name))]
pub(crate) async fn run_group(
    ctx: Arc<GroupContext>,
    job: GroupJob,
    out: Emitter,
) -> Result<usize> {
    let GroupJob {
        group,
        cwd,
        base_dir,
        external,
    } = job;
    let name = group.name.as_str();

    // --- Resolving ---
    // Glob expansion walks the filesystem synchronously.
    let patterns = {
        let ctx = Arc::clone(&ctx);
        let spec = group.spec.clone();
        let (cwd, base_dir) = (cwd.clone(), base_dir.clone());
        tokio::task::spawn_blocking(move || {
            resolve_patterns(
                &spec.assets,
                &ResolveContext {
                    group_search: spec.search_paths.as_ref(),
                    global_search: ctx.options.search_path.as_ref(),
                    cwd: &cwd,
                    base_dir: &base_dir,
                    transform_path: ctx.options.transform_path.as_ref(),
                    locality: ctx.locality.as_ref(),
                    matcher: ctx.matcher.as_ref(),
                },
            )
        })
        .await
        .map_err(|e| {
            AssetweaveError::transform(name, format!("pattern resolution failed: {e}"))
        })?
    };
    debug!(references = group.spec.assets.len(), patterns = patterns.len(), "patterns resolved");

    // --- Retrieving ---
    let to_fetch = unsupplied_patterns(&patterns, &external);
    let retrieved = ctx.source.retrieve(
        to_fetch,
        RetrieveOptions {
            cwd: cwd.clone(),
            base: base_dir.clone(),
        },
    );
    let pushed = stream::iter(external.iter().cloned().map(Ok).collect::<Vec<_>>());
    let errors = out.clone();
    let files = retrieved.chain(pushed).filter_map(move |item| {
        ready(match item {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(error = %e, "retrieval failed");
                errors.error(e);
                None
            }
        })
    });

    // --- Merging ---
    let mut files: FileStream = if external.is_empty() {
        files.map(Ok).boxed()
    } else {
        let arrived: Vec<VFile> = files.collect().await;
        let merged = merge_ordered(&patterns, arrived);
        stream::iter(merged.into_iter().map(Ok).collect::<Vec<_>>()).boxed()
    };

    // --- Transforming ---
    for factory in &ctx.stages {
        let stage = factory.create(name);
        files = end_on_error(stage.pipe(files), name, &out);
    }

    let files: Vec<VFile> = files.filter_map(|item| ready(item.ok())).collect().await;

    // --- Concatenating ---
    let outputs: Vec<VFile> = if ctx.options.noconcat {
        files
    } else {
        ctx.concatenator.concat(name, files).into_iter().collect()
    };

    // --- Relocating / Emitting ---
    let mut emitted = 0usize;
    for mut file in outputs {
        if let Some(base) = &ctx.options.base {
            file.path = base.join(name);
            file.base = base.clone();
        }
        if let Err(e) = out.file(file) {
            warn!(error = %e, emitted, "output closed, dropping remaining group files");
            return Err(e);
        }
        emitted += 1;
    }

    info!(emitted, "group complete");
    Ok(emitted)
}

/// Patterns not already provided by an external file of the same path.
fn unsupplied_patterns(patterns: &[String], external: &[VFile]) -> Vec<String> {
    let supplied: HashSet<&Path> = external.iter().map(|f| f.path.as_path()).collect();
    patterns
        .iter()
        .filter(|p| !supplied.contains(Path::new(p.as_str())))
        .cloned()
        .collect()
}

/// End a stage's output at its first error, reporting it as a transform
/// error. Files that passed before the error are kept.
fn end_on_error(stream: FileStream, group: &str, out: &Emitter) -> FileStream {
    let group = group.to_string();
    let out = out.clone();
    stream
        .scan((), move |_, item| {
            ready(match item {
                Ok(file) => Some(Ok(file)),
                Err(e) => {
                    warn!(group = %group, error = %e, "transform failed, ending group stream");
                    let err = match e {
                        AssetweaveError::Transform { .. } => e,
                        other => AssetweaveError::transform(group.as_str(), other.to_string()),
                    };
                    out.error(err);
                    None
                }
            })
        })
        .boxed()
}
