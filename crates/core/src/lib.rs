//! Pure domain logic for the drawing-task pipeline.
//!
//! Nothing in this crate performs I/O. The task store (`drawq-db`) and the
//! pipeline loops (`drawq-pipeline`) build on these types.

pub mod batch;
pub mod error;
pub mod requeue;
pub mod task_status;
pub mod types;
pub mod validation;
