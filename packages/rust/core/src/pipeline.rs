//! End-to-end run: documents in, rewritten documents and group outputs out.
//!
//! The driver task takes documents one at a time. Each passes the preflight
//! gate, is rewritten, is emitted, and then fans out one spawned pipeline
//! per asset group. The output stream ends once the document stream is
//! exhausted and every group pipeline has finished.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, instrument, warn};

use assetweave_extract::{BuildBlockExtractor, ExtractOptions, ReferenceExtractor};
use assetweave_shared::{
    AppConfig, AssetGroup, AssetweaveError, DEFAULT_TYPES, Result, SearchPath, VFile,
};

use crate::adapter::rewrite_document;
use crate::concat::{Concatenator, NewlineConcat};
use crate::gate::PreflightGate;
use crate::locality::{LocalityTest, UrlLocality};
use crate::output::{Counters, Emitter, OutputStream};
use crate::resolver::PathTransform;
use crate::runner::{GroupContext, GroupJob, run_group};
use crate::source::{FileSource, FileStream, FsFileSource, GlobMatcher, PatternMatcher};
use crate::stage::StageFactory;
use crate::tracker::{CompletionTracker, InFlightGuard};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-run options.
#[derive(Clone)]
pub struct UserefOptions {
    /// Asset types to process, in order. Defaults to `css` then `js`.
    pub types: Vec<String>,
    /// Fallback search root for groups without their own override.
    pub search_path: Option<SearchPath>,
    /// Applied to the first filesystem match of each reference.
    pub transform_path: Option<PathTransform>,
    /// Emit rewritten documents only; launch no group pipelines.
    pub no_assets: bool,
    /// Emit each group's files individually instead of concatenating.
    pub noconcat: bool,
    /// Relocate every group output to `<base>/<name>`.
    pub base: Option<PathBuf>,
    pub extract: ExtractOptions,
}

impl Default for UserefOptions {
    fn default() -> Self {
        Self {
            types: DEFAULT_TYPES.iter().map(|t| t.to_string()).collect(),
            search_path: None,
            transform_path: None,
            no_assets: false,
            noconcat: false,
            base: None,
            extract: ExtractOptions::default(),
        }
    }
}

impl fmt::Debug for UserefOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserefOptions")
            .field("types", &self.types)
            .field("search_path", &self.search_path)
            .field("transform_path", &self.transform_path.as_ref().map(|_| "<fn>"))
            .field("no_assets", &self.no_assets)
            .field("noconcat", &self.noconcat)
            .field("base", &self.base)
            .field("extract", &self.extract)
            .finish()
    }
}

impl From<&AppConfig> for UserefOptions {
    fn from(config: &AppConfig) -> Self {
        let d = &config.defaults;
        Self {
            types: d.types.clone(),
            search_path: d.search_path.clone(),
            no_assets: d.no_assets,
            noconcat: d.noconcat,
            base: d.base.clone(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Run results
// ---------------------------------------------------------------------------

/// Counters for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Documents taken from the input stream.
    pub documents: usize,
    /// Group pipelines launched.
    pub groups_started: usize,
    /// Files pushed onto the output (documents included).
    pub files_emitted: usize,
    /// Errors reported on the output.
    pub errors: usize,
}

/// A started run.
#[derive(Debug)]
pub struct UserefRun {
    pub output: OutputStream,
    /// Resolves after the output has been fully produced.
    pub summary: JoinHandle<Result<RunSummary>>,
}

impl UserefRun {
    /// Drain the output and wait for the summary.
    pub async fn collect(self) -> Result<(Vec<Result<VFile>>, RunSummary)> {
        let items: Vec<Result<VFile>> = self.output.collect().await;
        let summary = self
            .summary
            .await
            .map_err(|e| AssetweaveError::emit(format!("run task failed: {e}")))??;
        Ok((items, summary))
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Builder and entry point for a run.
pub struct Useref {
    options: UserefOptions,
    extractor: Arc<dyn ReferenceExtractor>,
    source: Option<Arc<dyn FileSource>>,
    matcher: Arc<dyn PatternMatcher>,
    concatenator: Arc<dyn Concatenator>,
    locality: Arc<dyn LocalityTest>,
    stages: Vec<Arc<dyn StageFactory>>,
    additional: Vec<FileStream>,
}

impl Useref {
    pub fn new(options: UserefOptions) -> Self {
        Self {
            options,
            extractor: Arc::new(BuildBlockExtractor),
            source: None,
            matcher: Arc::new(GlobMatcher),
            concatenator: Arc::new(NewlineConcat::default()),
            locality: Arc::new(UrlLocality),
            stages: Vec::new(),
            additional: Vec::new(),
        }
    }

    pub fn extractor(mut self, extractor: impl ReferenceExtractor + 'static) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Replace the file source. Without one, files are read from disk using
    /// the configured matcher.
    pub fn file_source(mut self, source: impl FileSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn matcher(mut self, matcher: impl PatternMatcher + 'static) -> Self {
        self.matcher = Arc::new(matcher);
        self
    }

    pub fn concatenator(mut self, concatenator: impl Concatenator + 'static) -> Self {
        self.concatenator = Arc::new(concatenator);
        self
    }

    pub fn locality(mut self, locality: impl LocalityTest + 'static) -> Self {
        self.locality = Arc::new(locality);
        self
    }

    /// Append a transform stage. Stages run in the order they were added.
    pub fn stage(mut self, factory: impl StageFactory + 'static) -> Self {
        self.stages.push(Arc::new(factory));
        self
    }

    /// Add an external file producer. Every producer finishes before the
    /// first document is processed.
    pub fn additional_stream(mut self, stream: FileStream) -> Self {
        self.additional.push(stream);
        self
    }

    /// Start the run on the current tokio runtime.
    pub fn run<S>(self, documents: S) -> UserefRun
    where
        S: Stream<Item = VFile> + Send + 'static,
    {
        let Self {
            options,
            extractor,
            source,
            matcher,
            concatenator,
            locality,
            stages,
            additional,
        } = self;

        let source = source.unwrap_or_else(|| Arc::new(FsFileSource::new(Arc::clone(&matcher))));
        let (out, output) = Emitter::channel();
        let counters = out.counters();

        let driver = Driver {
            ctx: Arc::new(GroupContext {
                options,
                locality,
                matcher,
                source,
                concatenator,
                stages,
            }),
            extractor,
            gate: PreflightGate::new(additional),
            tracker: CompletionTracker::new(),
            out,
        };

        let summary = tokio::spawn(driver.drive(documents.boxed(), counters));
        UserefRun { output, summary }
    }
}

impl fmt::Debug for Useref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Useref")
            .field("options", &self.options)
            .field("stages", &self.stages.len())
            .field("additional", &self.additional.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct Driver {
    ctx: Arc<GroupContext>,
    extractor: Arc<dyn ReferenceExtractor>,
    gate: PreflightGate,
    tracker: Arc<CompletionTracker>,
    out: Emitter,
}

impl Driver {
    #[instrument(skip_all)]
    async fn drive(
        mut self,
        mut documents: BoxStream<'static, VFile>,
        counters: Arc<Counters>,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        while let Some(document) = documents.next().await {
            let external = self.gate.pass(&self.out).await;
            summary.documents += 1;

            let cwd = document.cwd.clone();
            let base_dir = document.dirname();
            let path = document.path.clone();

            let extract = &self.ctx.options.extract;
            let rewritten = match rewrite_document(self.extractor.as_ref(), extract, document) {
                Ok(rewritten) => rewritten,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "document skipped");
                    self.out.error(e);
                    continue;
                }
            };

            self.out.file(rewritten.document)?;

            if self.ctx.options.no_assets {
                continue;
            }

            summary.groups_started +=
                self.launch_groups(rewritten.groups, &cwd, &base_dir, &external);
        }

        self.tracker.input_drained();
        let Self { tracker, out, .. } = self;
        drop(out);
        tracker.wait().await;

        let lost = counters.lost();
        if lost > 0 {
            warn!(lost, "output closed before the run finished");
            return Err(AssetweaveError::emit(format!(
                "output closed before {lost} file(s) were delivered"
            )));
        }

        summary.files_emitted = counters.files();
        summary.errors = counters.errors();
        info!(
            documents = summary.documents,
            groups = summary.groups_started,
            files = summary.files_emitted,
            errors = summary.errors,
            "run complete"
        );
        Ok(summary)
    }

    /// Spawn one pipeline per non-empty group, type by type. Returns how
    /// many were launched.
    fn launch_groups(
        &self,
        groups: Vec<AssetGroup>,
        cwd: &Path,
        base_dir: &Path,
        external: &Arc<[VFile]>,
    ) -> usize {
        let mut launched = 0;
        let mut groups: Vec<Option<AssetGroup>> = groups.into_iter().map(Some).collect();

        for kind in &self.ctx.options.types {
            for slot in groups.iter_mut() {
                if !slot.as_ref().is_some_and(|g| &g.kind == kind) {
                    continue;
                }
                let Some(group) = slot.take() else {
                    continue;
                };
                if group.spec.assets.is_empty() {
                    debug!(kind = %group.kind, group = %group.name, "empty group skipped");
                    continue;
                }

                let guard = self.tracker.group_started();
                let job = GroupJob {
                    group,
                    cwd: cwd.to_path_buf(),
                    base_dir: base_dir.to_path_buf(),
                    external: Arc::clone(external),
                };
                tokio::spawn(
                    supervise(Arc::clone(&self.ctx), job, self.out.clone(), guard)
                        .in_current_span(),
                );
                launched += 1;
            }
        }

        launched
    }
}

/// Run a group and release its in-flight slot afterwards. A panicking
/// pipeline is reported as a transform error for its group.
async fn supervise(ctx: Arc<GroupContext>, job: GroupJob, out: Emitter, guard: InFlightGuard) {
    let name = job.group.name.clone();
    let outcome = AssertUnwindSafe(run_group(ctx, job, out.clone()))
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(_)) => {}
        // Already counted as lost by the emitter; the output cannot carry it.
        Ok(Err(e @ AssetweaveError::Emit { .. })) => {
            warn!(group = %name, error = %e, "group output lost");
        }
        Ok(Err(e)) => out.error(e),
        Err(_) => {
            error!(group = %name, "group pipeline panicked");
            out.error(AssetweaveError::transform(name, "group pipeline panicked"));
        }
    }
    guard.finish();
}

#[cfg(test)]
mod tests {
    use assetweave_shared::DefaultsConfig;

    use super::*;

    #[test]
    fn default_options_process_css_then_js() {
        let opts = UserefOptions::default();
        assert_eq!(opts.types, vec!["css", "js"]);
        assert!(!opts.no_assets);
        assert!(!opts.noconcat);
    }

    #[test]
    fn options_from_config() {
        let config = AppConfig {
            defaults: DefaultsConfig {
                types: vec!["js".into()],
                noconcat: true,
                base: Some(PathBuf::from("/dist")),
                ..DefaultsConfig::default()
            },
        };
        let opts = UserefOptions::from(&config);
        assert_eq!(opts.types, vec!["js"]);
        assert!(opts.noconcat);
        assert_eq!(opts.base, Some(PathBuf::from("/dist")));
        assert!(opts.transform_path.is_none());
    }

    #[tokio::test]
    async fn empty_input_completes() {
        let run = Useref::new(UserefOptions::default()).run(futures::stream::empty());
        let (items, summary) = run.collect().await.expect("run");
        assert!(items.is_empty());
        assert_eq!(summary, RunSummary::default());
    }
}
