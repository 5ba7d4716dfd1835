//! The orchestrator: owns the catalog, enforces the business rules and drives the
//! compilers and the execution backend, one awaited step at a time.

pub mod database;
pub mod rows;
pub mod table;

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::backend::ExecutionBackend;
use crate::config::schema::{Import, Limits};
use crate::context::RequestContext;
use crate::data_types::{DatabaseId, TableId};
use crate::error::{Error, Result};
use crate::repository::interface::{DatabaseRecord, Owner, Repository, TableRecord};
use crate::schema::{Field, TableSnapshot};
use crate::sql::{reject_unsafe, StatementBlob};

pub use database::DatabaseTree;
pub use rows::RowOperation;
pub use table::AlterRequest;

/// One page of a listing, along with the number of records across all pages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub total: i64,
    pub records: Vec<T>,
}

#[derive(Debug)]
pub struct DatabaseService {
    pub repository: Arc<dyn Repository>,
    pub backend: Arc<dyn ExecutionBackend>,
    pub limits: Limits,
    pub import: Import,
    pub app_id: Option<String>,
}

impl DatabaseService {
    pub fn new(
        repository: Arc<dyn Repository>,
        backend: Arc<dyn ExecutionBackend>,
        limits: Limits,
        import: Import,
    ) -> Self {
        Self {
            repository,
            backend,
            limits,
            import,
            app_id: None,
        }
    }

    /// Application the databases created through this service are registered under
    pub fn with_app_id(mut self, app_id: &str) -> Self {
        self.app_id = Some(app_id.trim())
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        self
    }

    fn owner(context: &RequestContext) -> Owner<'_> {
        Owner {
            uid: &context.uid,
            space_id: context.space_id,
        }
    }

    async fn live_database(&self, id: DatabaseId) -> Result<DatabaseRecord> {
        self.repository
            .get_database(id)
            .await?
            .ok_or(Error::NotFound {
                object: "Database",
                id,
            })
    }

    /// A live table along with the live database it belongs to
    async fn live_table(&self, id: TableId) -> Result<(DatabaseRecord, TableRecord)> {
        let table = self
            .repository
            .get_table(id)
            .await?
            .ok_or(Error::NotFound { object: "Table", id })?;
        let database = self.live_database(table.database_id).await?;
        Ok((database, table))
    }

    async fn fields(&self, table_id: TableId) -> Result<Vec<Field>> {
        Ok(self
            .repository
            .get_fields(table_id)
            .await?
            .into_iter()
            .map(Field::from)
            .collect())
    }

    async fn snapshot(&self, table: &TableRecord) -> Result<TableSnapshot> {
        Ok(TableSnapshot {
            name: table.name.clone(),
            description: table.description.clone(),
            fields: self.fields(table.id).await?,
        })
    }

    /// Hand every statement of a compiled blob to the backend, in order
    async fn run_ddl(
        &self,
        context: &RequestContext,
        database: &DatabaseRecord,
        blob: &StatementBlob,
    ) -> Result<()> {
        for statement in blob.statements() {
            reject_unsafe(statement)?;
            debug!("Executing DDL on backend database {}: {statement}", database.db_id);
            self.backend
                .execute_ddl(context, database.db_id, statement)
                .await?;
        }
        Ok(())
    }

    /// Validate a 1-based page request, returning `(limit, offset)`. Oversized
    /// pages are capped at `max_page_size`.
    fn page_bounds(&self, page_num: u64, page_size: u64) -> Result<(u64, u64)> {
        if page_num < 1 {
            return Err(Error::invalid("page_num must be at least 1"));
        }
        if page_size < 1 {
            return Err(Error::invalid("page_size must be at least 1"));
        }
        let page_size = page_size.min(self.limits.max_page_size);
        let offset = (page_num - 1)
            .checked_mul(page_size)
            .filter(|o| *o <= i64::MAX as u64)
            .ok_or_else(|| Error::invalid("page_num is out of range"))?;
        Ok((page_size, offset))
    }
}
