//! Asynchronous drawing-task pipeline.
//!
//! [`queue::TaskQueue`] is the operation surface used by producers and
//! consumers. The long-running loops ([`worker`], [`reaper`], [`migrator`])
//! are each meant to be spawned via `tokio::spawn` and stop when their
//! [`CancellationToken`](tokio_util::sync::CancellationToken) fires. All
//! coordination between them happens through guarded writes in the task
//! store; there is no in-process lock.

pub mod config;
pub mod error;
pub mod migrator;
pub mod provider;
pub mod queue;
pub mod reaper;
pub mod storage;
pub mod worker;
