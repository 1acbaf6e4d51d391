//! User transform stages applied to each group's files.

use futures::StreamExt;

use assetweave_shared::{Result, VFile};

use crate::source::FileStream;

/// One transform applied to a group's file stream.
///
/// An `Err` item ends the stage's output: the runner reports it and closes
/// the sub-stream, keeping whatever files already passed through.
pub trait Stage: Send {
    fn pipe(self: Box<Self>, input: FileStream) -> FileStream;
}

/// Builds a fresh [`Stage`] for every group, given the group name.
pub trait StageFactory: Send + Sync {
    fn create(&self, group: &str) -> Box<dyn Stage>;
}

impl<F> StageFactory for F
where
    F: Fn(&str) -> Box<dyn Stage> + Send + Sync,
{
    fn create(&self, group: &str) -> Box<dyn Stage> {
        self(group)
    }
}

/// A stage that maps every file through a fallible closure.
pub struct MapStage<F> {
    f: F,
}

impl<F> MapStage<F>
where
    F: FnMut(VFile) -> Result<VFile> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Box the stage for returning from a factory.
    pub fn boxed(self) -> Box<dyn Stage> {
        Box::new(self)
    }
}

impl<F> Stage for MapStage<F>
where
    F: FnMut(VFile) -> Result<VFile> + Send + 'static,
{
    fn pipe(self: Box<Self>, input: FileStream) -> FileStream {
        let mut f = self.f;
        input.map(move |item| item.and_then(&mut f)).boxed()
    }
}
