//! The hosted database that actually runs the generated statements.

pub mod http;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::context::RequestContext;
use crate::data_types::BackendDatabaseId;
use crate::error::Result;
use crate::schema::Row;
pub use crate::sql::dml::OperationKind;

pub use http::HttpBackend;

/// Which copy of the user's data a DML statement runs against
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Test,
    Prod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DmlOutcome {
    Rows(Vec<Row>),
    Count(i64),
}

impl DmlOutcome {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Rows(rows) => rows,
            Self::Count(_) => vec![],
        }
    }

    pub fn count(&self) -> i64 {
        match self {
            Self::Rows(rows) => rows.len() as i64,
            Self::Count(count) => *count,
        }
    }
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync + Debug {
    async fn create_database(
        &self,
        context: &RequestContext,
        name: &str,
        description: Option<&str>,
    ) -> Result<BackendDatabaseId>;

    async fn modify_database(
        &self,
        context: &RequestContext,
        database_id: BackendDatabaseId,
        description: &str,
    ) -> Result<()>;

    async fn drop_database(
        &self,
        context: &RequestContext,
        database_id: BackendDatabaseId,
    ) -> Result<()>;

    async fn clone_database(
        &self,
        context: &RequestContext,
        database_id: BackendDatabaseId,
        new_name: &str,
    ) -> Result<BackendDatabaseId>;

    /// Run a single DDL statement
    async fn execute_ddl(
        &self,
        context: &RequestContext,
        database_id: BackendDatabaseId,
        statement: &str,
    ) -> Result<()>;

    /// Run a single DML statement
    async fn execute_dml(
        &self,
        context: &RequestContext,
        database_id: BackendDatabaseId,
        statement: &str,
        kind: OperationKind,
        mode: ExecutionMode,
    ) -> Result<DmlOutcome>;
}
