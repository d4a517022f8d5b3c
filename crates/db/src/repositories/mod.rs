//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod history_repo;
pub mod task_repo;

pub use history_repo::HistoryRepo;
pub use task_repo::TaskRepo;
