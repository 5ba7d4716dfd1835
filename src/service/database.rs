use serde::Serialize;
use tracing::info;

use crate::context::RequestContext;
use crate::data_types::{BackendDatabaseId, DatabaseId, FlowReferenceId};
use crate::error::{Error, Result};
use crate::repository::interface::{DatabaseRecord, NewDatabase, TableRecord};
use crate::schema::{non_blank, Field};
use crate::sql::naming::copy_label;

use super::{DatabaseService, Page};

/// Upper bound on the names tried when looking for a free copy name
pub(super) const MAX_COPY_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableTree {
    #[serde(flatten)]
    pub table: TableRecord,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseTree {
    #[serde(flatten)]
    pub database: DatabaseRecord,
    pub tables: Vec<TableTree>,
}

impl DatabaseService {
    pub async fn create_database(
        &self,
        context: &RequestContext,
        name: &str,
        description: Option<&str>,
    ) -> Result<DatabaseRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid("database name can't be blank"));
        }
        let description = non_blank(description);

        if self
            .repository
            .database_name_exists(Self::owner(context), name)
            .await?
        {
            return Err(Error::NameCollision {
                object: "Database",
                name: name.to_string(),
            });
        }

        let db_id = self
            .backend
            .create_database(context, name, description)
            .await?;

        let id = self
            .repository
            .create_database(&NewDatabase {
                name,
                description,
                uid: &context.uid,
                space_id: context.space_id,
                app_id: self.app_id.as_deref(),
                db_id,
            })
            .await?;
        info!("Created database {name:?} (id {id}, backend id {db_id})");

        self.live_database(id).await
    }

    pub async fn get_database(
        &self,
        _context: &RequestContext,
        id: DatabaseId,
    ) -> Result<DatabaseRecord> {
        self.live_database(id).await
    }

    /// Change the description. The backend is only told when it actually changes.
    pub async fn update_database(
        &self,
        context: &RequestContext,
        id: DatabaseId,
        description: &str,
    ) -> Result<DatabaseRecord> {
        let database = self.live_database(id).await?;

        if database.description.as_deref().unwrap_or_default() != description {
            self.backend
                .modify_database(context, database.db_id, description)
                .await?;
            self.repository
                .update_database_description(id, description)
                .await?;
            info!("Updated description of database {id}");
        }

        self.live_database(id).await
    }

    /// Drop the backend database. The catalog row is only marked as deleted.
    pub async fn delete_database(&self, context: &RequestContext, id: DatabaseId) -> Result<()> {
        let database = self.live_database(id).await?;

        let count = self
            .repository
            .count_database_references(database.db_id)
            .await?;
        if count > 0 {
            return Err(Error::StillReferenced {
                object: "Database",
                id,
                count,
            });
        }

        self.backend.drop_database(context, database.db_id).await?;
        self.repository.delete_database(id).await?;
        info!("Deleted database {id} (backend id {})", database.db_id);

        Ok(())
    }

    /// Clone the structure (catalog) and the data (backend) of a database
    pub async fn copy_database(
        &self,
        context: &RequestContext,
        id: DatabaseId,
    ) -> Result<DatabaseRecord> {
        let source = self.live_database(id).await?;
        let owner = Self::owner(context);

        let mut name = copy_label(&source.name);
        let mut attempts = 1;
        while self.repository.database_name_exists(owner, &name).await? {
            if attempts >= MAX_COPY_ATTEMPTS {
                return Err(Error::NameCollision {
                    object: "Database",
                    name,
                });
            }
            name = copy_label(&name);
            attempts += 1;
        }

        let db_id = self
            .backend
            .clone_database(context, source.db_id, &name)
            .await?;

        let new_id = self
            .repository
            .copy_database(
                id,
                &NewDatabase {
                    name: &name,
                    description: source.description.as_deref(),
                    uid: &context.uid,
                    space_id: context.space_id,
                    app_id: self.app_id.as_deref(),
                    db_id,
                },
            )
            .await?;
        info!("Copied database {id} into {new_id} ({name:?}, backend id {db_id})");

        self.live_database(new_id).await
    }

    /// Databases visible to the requester, newest first, optionally filtered by a
    /// search over the name and the description
    pub async fn list_databases(
        &self,
        context: &RequestContext,
        search: Option<&str>,
        page_num: u64,
        page_size: u64,
    ) -> Result<Page<DatabaseRecord>> {
        let (limit, offset) = self.page_bounds(page_num, page_size)?;
        let search = non_blank(search).map(str::trim);
        let owner = Self::owner(context);

        let total = self.repository.count_databases(owner, search).await?;
        let records = self
            .repository
            .list_databases(owner, search, limit as i64, offset as i64)
            .await?;

        Ok(Page { total, records })
    }

    /// A database along with all its live tables and their fields
    pub async fn database_tree(
        &self,
        _context: &RequestContext,
        id: DatabaseId,
    ) -> Result<DatabaseTree> {
        let database = self.live_database(id).await?;

        let mut tables = Vec::new();
        for table in self.repository.list_tables(id).await? {
            let fields = self.fields(table.id).await?;
            tables.push(TableTree { table, fields });
        }

        Ok(DatabaseTree { database, tables })
    }

    /// Record that a flow reads from or writes to a table, which then can't be
    /// dropped (and neither can its database) until the reference goes away
    pub async fn add_flow_reference(
        &self,
        _context: &RequestContext,
        db_id: BackendDatabaseId,
        table_name: &str,
        flow_id: &str,
    ) -> Result<FlowReferenceId> {
        let flow_id = flow_id.trim();
        if flow_id.is_empty() {
            return Err(Error::invalid("flow id can't be blank"));
        }

        let table = self
            .repository
            .find_table_by_name(db_id, table_name)
            .await?
            .ok_or_else(|| {
                Error::invalid(format!(
                    "table {table_name:?} does not exist in backend database {db_id}"
                ))
            })?;

        Ok(self
            .repository
            .add_flow_reference(flow_id, db_id, table.id)
            .await?)
    }
}
