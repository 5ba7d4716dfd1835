use serde::{Deserialize, Serialize};

/// The principal issuing a request and the tenant space it runs in.
///
/// Every backend call carries both: the backend scopes rows by `uid` and databases
/// by `space_id` (personal databases have no space).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub uid: String,
    pub space_id: Option<i64>,
}

impl RequestContext {
    pub fn new(uid: impl Into<String>, space_id: Option<i64>) -> Self {
        Self {
            uid: uid.into(),
            space_id,
        }
    }
}
