//! Order-preserving merge of resolved files with external files.
//!
//! Files whose path equals one of the group's patterns land in that
//! pattern's slot; anything else is kept in arrival order and emitted after
//! every slotted file.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::debug;

use assetweave_shared::VFile;

/// Accumulates a group's files and restores declaration order.
#[derive(Debug)]
pub struct OrderedMerge {
    index: HashMap<PathBuf, usize>,
    slots: Vec<Option<VFile>>,
    unmatched: Vec<VFile>,
}

impl OrderedMerge {
    /// Build the slot index. A repeated pattern keeps its last position.
    pub fn new(patterns: &[String]) -> Self {
        let index = patterns
            .iter()
            .enumerate()
            .map(|(i, p)| (PathBuf::from(p), i))
            .collect();
        Self {
            index,
            slots: vec![None; patterns.len()],
            unmatched: Vec::new(),
        }
    }

    /// Place one arriving file. A later file for the same slot replaces
    /// the earlier one.
    pub fn accept(&mut self, file: VFile) {
        match self.index.get(&file.path) {
            Some(&i) => self.slots[i] = Some(file),
            None => self.unmatched.push(file),
        }
    }

    /// Slotted files in pattern order, then unmatched files in arrival order.
    pub fn finish(self) -> Vec<VFile> {
        debug!(
            slotted = self.slots.iter().filter(|s| s.is_some()).count(),
            unmatched = self.unmatched.len(),
            "merge complete"
        );
        self.slots
            .into_iter()
            .flatten()
            .chain(self.unmatched)
            .collect()
    }
}

/// Merge a complete batch of files in one call.
pub fn merge_ordered(patterns: &[String], files: impl IntoIterator<Item = VFile>) -> Vec<VFile> {
    let mut merge = OrderedMerge::new(patterns);
    for file in files {
        merge.accept(file);
    }
    merge.finish()
}
