//! Drawing task lifecycle status and its state machine.
//!
//! Each variant's discriminant matches the seed data order (1-based) in the
//! `drawing_task_statuses` lookup table.
//!
//! ```text
//! Pending --[acquire]--> Processing
//! Processing --[success]--> Completed
//! Processing --[failure]--> Failed
//! Processing --[reaper timeout]--> Pending   (requeue)
//! ```
//!
//! Completed and Failed are terminal. Later writes on a terminal task only
//! touch output URLs and the migration flag, never the status.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Every variant in discriminant order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl TryFrom<StatusId> for $name {
            type Error = CoreError;

            fn try_from(value: StatusId) -> Result<Self, Self::Error> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|s| s.id() == value)
                    .ok_or_else(|| CoreError::Validation(format!(
                        "Unknown {} id: {value}",
                        stringify!($name),
                    )))
            }
        }
    };
}

define_status_enum! {
    /// Drawing task execution status.
    TaskStatus {
        Pending = 1,
        Processing = 2,
        Completed = 3,
        Failed = 4,
    }
}

impl TaskStatus {
    /// Lowercase name as stored in the lookup table.
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and Failed accept no further status change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    ///
    /// `Processing -> Pending` is the reaper's recovery edge.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Pending)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_ids_match_seed_data() {
        assert_eq!(TaskStatus::Pending.id(), 1);
        assert_eq!(TaskStatus::Processing.id(), 2);
        assert_eq!(TaskStatus::Completed.id(), 3);
        assert_eq!(TaskStatus::Failed.id(), 4);
    }

    #[test]
    fn status_into_status_id() {
        let id: StatusId = TaskStatus::Processing.into();
        assert_eq!(id, 2);
    }

    #[test]
    fn status_from_status_id() {
        assert_eq!(TaskStatus::try_from(3).unwrap(), TaskStatus::Completed);
        assert!(TaskStatus::try_from(0).is_err());
        assert!(TaskStatus::try_from(5).is_err());
    }

    #[test]
    fn forward_edges_are_allowed() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn requeue_edge_is_allowed() {
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        for from in [TaskStatus::Completed, TaskStatus::Failed] {
            assert!(from.is_terminal());
            for to in TaskStatus::ALL {
                assert!(
                    !from.can_transition_to(*to),
                    "{from} -> {to} must be rejected"
                );
            }
        }
    }

    #[test]
    fn pending_cannot_skip_processing() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn serializes_as_snake_case_name() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}
