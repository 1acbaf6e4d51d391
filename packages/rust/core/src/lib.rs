//! Asset group orchestration for assetweave.
//!
//! Documents are rewritten by a [`ReferenceExtractor`], and every asset
//! group they declare runs through its own pipeline: patterns are resolved,
//! files retrieved and merged in reference order, transformed, concatenated
//! and emitted. See [`Useref`] for the entry point.
//!
//! [`ReferenceExtractor`]: assetweave_extract::ReferenceExtractor

pub mod adapter;
pub mod concat;
pub mod gate;
pub mod locality;
pub mod merger;
pub mod output;
pub mod pipeline;
pub mod resolver;
mod runner;
pub mod source;
pub mod stage;
pub mod tracker;

pub use adapter::{RewrittenDocument, rewrite_document};
pub use concat::{Concatenator, NewlineConcat};
pub use gate::PreflightGate;
pub use locality::{LocalityTest, UrlLocality};
pub use merger::{OrderedMerge, merge_ordered};
pub use output::{Emitter, OutputStream};
pub use pipeline::{RunSummary, Useref, UserefOptions, UserefRun};
pub use resolver::PathTransform;
pub use source::{
    FileSource, FileStream, FsFileSource, GlobMatcher, PatternMatcher, RetrieveOptions,
};
pub use stage::{MapStage, Stage, StageFactory};
pub use tracker::{CompletionTracker, InFlightGuard};
