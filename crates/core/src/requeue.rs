//! Requeue budget for tasks recovered by the reaper.
//!
//! A stuck task is returned to Pending while it still has budget left;
//! once `requeue_count` reaches `max_requeues` the reaper fails it instead,
//! so a task whose provider call hangs every time cannot cycle forever.

/// Default number of times a stuck task may be returned to the queue.
pub const DEFAULT_MAX_REQUEUES: u32 = 3;

/// What the reaper should do with one stuck task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequeueDecision {
    /// Return the task to Pending.
    Requeue,
    /// Move the task to Failed with this message.
    GiveUp(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeuePolicy {
    pub max_requeues: u32,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            max_requeues: DEFAULT_MAX_REQUEUES,
        }
    }
}

impl RequeuePolicy {
    pub fn new(max_requeues: u32) -> Self {
        Self { max_requeues }
    }

    /// Decide based on how many times the task has already been requeued.
    pub fn decide(&self, requeue_count: i32) -> RequeueDecision {
        let used = requeue_count.max(0) as u32;
        if used < self.max_requeues {
            RequeueDecision::Requeue
        } else {
            RequeueDecision::GiveUp(format!(
                "Task stuck in processing after {used} requeue(s); giving up"
            ))
        }
    }
}
