pub type DatabaseId = i64;
pub type TableId = i64;
pub type FieldId = i64;
pub type FlowReferenceId = i64;
/// Identifier of a database on the execution backend (as opposed to its catalog row)
pub type BackendDatabaseId = i64;
/// Seconds since the UNIX epoch
pub type Timestamp = i64;

pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp()
}
