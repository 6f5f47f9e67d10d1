//! Row-count bookkeeping for a synchronization mapping.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncModel {
    /// Full copy followed by incremental capture
    Full,
    #[default]
    Increment,
}

/// Snapshot of a mapping's counters.
///
/// `total` is `None` until a full-model recomputation sets it; zero is a
/// valid full-sync count and is distinct from unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Meta {
    pub mapping_id: String,
    pub total: Option<u64>,
    pub success: u64,
    pub fail: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MetaTracker {
    meta: Meta,
}

impl MetaTracker {
    pub fn new(mapping_id: impl Into<String>) -> Self {
        Self {
            meta: Meta {
                mapping_id: mapping_id.into(),
                ..Meta::default()
            },
        }
    }

    /// Resets every counter; `total` becomes unset.
    pub fn clear(&mut self) {
        self.meta = Meta {
            mapping_id: std::mem::take(&mut self.meta.mapping_id),
            ..Meta::default()
        };
    }

    pub fn accumulate(&mut self, count: u64) {
        self.meta.total = Some(self.meta.total.unwrap_or(0) + count);
    }

    pub fn total(&self) -> Option<u64> {
        self.meta.total
    }

    pub fn record_success(&mut self, count: u64) {
        self.meta.success += count;
    }

    pub fn record_fail(&mut self, count: u64) {
        self.meta.fail += count;
    }

    /// Rebuilds the counters from per-table counts.
    ///
    /// The new state is assembled aside and swapped in whole, so readers
    /// never see a cleared but unpopulated tracker.
    pub fn recompute<I>(&mut self, model: SyncModel, table_counts: I)
    where
        I: IntoIterator<Item = u64>,
    {
        let mut next = MetaTracker::new(self.meta.mapping_id.clone());
        if model == SyncModel::Full {
            next.meta.total = Some(0);
            for count in table_counts {
                next.accumulate(count);
            }
        }
        *self = next;
    }

    pub fn snapshot(&self) -> Meta {
        self.meta.clone()
    }
}
