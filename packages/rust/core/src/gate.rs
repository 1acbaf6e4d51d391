//! Preflight gate: hold documents until every external producer is done.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::select_all;
use tracing::{debug, info};

use assetweave_shared::VFile;

use crate::output::Emitter;
use crate::source::FileStream;

enum GateState {
    Waiting(Vec<FileStream>),
    Open(Arc<[VFile]>),
}

/// Collects external files once, before the first document is processed.
pub struct PreflightGate {
    state: GateState,
}

impl PreflightGate {
    /// A gate over zero or more producers. With none it starts open.
    pub fn new(producers: Vec<FileStream>) -> Self {
        let state = if producers.is_empty() {
            GateState::Open(Arc::from(Vec::new()))
        } else {
            GateState::Waiting(producers)
        };
        Self { state }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, GateState::Open(_))
    }

    /// Wait for every producer to finish and return the external files.
    ///
    /// The first call drains the producers; later calls return the same
    /// collection immediately. Producer errors are reported on `out` and
    /// do not keep the gate shut.
    pub async fn pass(&mut self, out: &Emitter) -> Arc<[VFile]> {
        let producers = match &mut self.state {
            GateState::Open(files) => return Arc::clone(files),
            GateState::Waiting(producers) => std::mem::take(producers),
        };

        debug!(producers = producers.len(), "waiting for additional streams");

        let mut merged = select_all(producers);
        let mut files = Vec::new();
        while let Some(item) = merged.next().await {
            match item {
                Ok(file) => files.push(file),
                Err(e) => out.error(e),
            }
        }

        info!(external_files = files.len(), "additional streams finished");

        let files: Arc<[VFile]> = Arc::from(files);
        self.state = GateState::Open(Arc::clone(&files));
        files
    }
}
