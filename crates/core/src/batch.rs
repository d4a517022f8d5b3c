//! Batch group aggregation.
//!
//! A batch group is not stored anywhere: it is the set of task rows sharing a
//! `batch_group_id`. Its counts, overall percentage, and completion flag are
//! derived here from the children's status and progress.

use serde::Serialize;

use crate::task_status::TaskStatus;

/// Maximum number of children a single split request may create.
pub const MAX_BATCH_CHILDREN: usize = 64;

/// Aggregate view over the children of one batch group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// 0-100. Terminal children count as fully progressed.
    pub overall_progress: u8,
    /// True iff every child is Completed or Failed.
    pub is_completed: bool,
}

impl BatchProgress {
    /// Fold `(status, progress)` pairs of the children into an aggregate.
    ///
    /// Progress values outside 0..=100 are clamped. An empty input yields an
    /// all-zero aggregate with `is_completed == false`.
    pub fn from_children<I>(children: I) -> Self
    where
        I: IntoIterator<Item = (TaskStatus, i16)>,
    {
        let mut agg = Self::default();
        let mut progress_sum: u64 = 0;

        for (status, progress) in children {
            agg.total += 1;
            match status {
                TaskStatus::Pending => agg.pending += 1,
                TaskStatus::Processing => agg.processing += 1,
                TaskStatus::Completed => agg.completed += 1,
                TaskStatus::Failed => agg.failed += 1,
            }
            let effective = if status.is_terminal() {
                100
            } else {
                progress.clamp(0, 100) as u64
            };
            progress_sum += effective;
        }

        if agg.total > 0 {
            agg.overall_progress = (progress_sum / agg.total as u64) as u8;
            agg.is_completed = agg.pending == 0 && agg.processing == 0;
        }
        agg
    }

    /// Children not yet in a terminal state.
    pub fn in_flight(&self) -> usize {
        self.pending + self.processing
    }
}
