/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Shared identifier tying the child tasks of one split request together.
pub type BatchGroupId = uuid::Uuid;
