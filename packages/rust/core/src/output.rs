//! The overall output stream and the handle pipelines emit through.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::warn;

use assetweave_shared::{AssetweaveError, Result, VFile};

/// Counters shared by every emitter clone.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    files: AtomicUsize,
    errors: AtomicUsize,
    lost: AtomicUsize,
}

impl Counters {
    pub(crate) fn files(&self) -> usize {
        self.files.load(Ordering::Relaxed)
    }

    pub(crate) fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    /// Files that could not be delivered because the output was closed.
    pub(crate) fn lost(&self) -> usize {
        self.lost.load(Ordering::Relaxed)
    }
}

/// Cloneable sending side of the output stream.
#[derive(Debug, Clone)]
pub struct Emitter {
    tx: mpsc::UnboundedSender<Result<VFile>>,
    counters: Arc<Counters>,
}

impl Emitter {
    pub(crate) fn channel() -> (Self, OutputStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Self {
            tx,
            counters: Arc::new(Counters::default()),
        };
        (emitter, OutputStream { rx })
    }

    pub(crate) fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// Push a file onto the output. A closed output counts the file as lost
    /// and returns [`AssetweaveError::Emit`].
    pub fn file(&self, file: VFile) -> Result<()> {
        let path = file.path.clone();
        if self.tx.send(Ok(file)).is_err() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            self.counters.lost.fetch_add(1, Ordering::Relaxed);
            return Err(AssetweaveError::emit(format!(
                "output closed before {} was emitted",
                path.display()
            )));
        }
        self.counters.files.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Report an error on the output. Errors that cannot be delivered are logged.
    pub fn error(&self, err: AssetweaveError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        if let Err(mpsc::error::SendError(Err(err))) = self.tx.send(Err(err)) {
            warn!(error = %err, "output closed, error dropped");
        }
    }
}

/// The pipeline's output: rewritten documents, group outputs, and errors.
///
/// Ends once every document has been handled and every group pipeline has
/// finished.
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::UnboundedReceiver<Result<VFile>>,
}

impl Stream for OutputStream {
    type Item = Result<VFile>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
