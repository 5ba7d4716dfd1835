use std::fmt::Debug;

use async_trait::async_trait;
use serde::Serialize;

use crate::data_types::{
    BackendDatabaseId, DatabaseId, FieldId, FlowReferenceId, TableId, Timestamp,
};
use crate::schema::{ChangeSetItem, Field, FieldSpec, FieldType};

#[derive(sqlx::FromRow, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRecord {
    pub id: DatabaseId,
    pub name: String,
    pub description: Option<String>,
    pub uid: String,
    pub space_id: Option<i64>,
    pub app_id: Option<String>,
    pub db_id: BackendDatabaseId,
    pub create_time: Timestamp,
    pub update_time: Timestamp,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TableRecord {
    pub id: TableId,
    pub database_id: DatabaseId,
    pub name: String,
    pub description: Option<String>,
    pub create_time: Timestamp,
    pub update_time: Timestamp,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldRecord {
    pub id: FieldId,
    pub table_id: TableId,
    pub name: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub r#type: String,
    pub description: Option<String>,
    pub default_value: Option<String>,
    pub is_required: bool,
    pub is_system: bool,
    pub create_time: Timestamp,
}

impl From<FieldRecord> for Field {
    fn from(record: FieldRecord) -> Self {
        Field {
            id: record.id,
            is_system: record.is_system,
            spec: FieldSpec {
                name: record.name,
                field_type: FieldType::parse(&record.r#type),
                required: record.is_required,
                default_value: record.default_value,
                description: record.description,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDatabase<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub uid: &'a str,
    pub space_id: Option<i64>,
    pub app_id: Option<&'a str>,
    pub db_id: BackendDatabaseId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewField {
    pub spec: FieldSpec,
    pub is_system: bool,
}

/// Who a database belongs to: a personal database has no space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner<'a> {
    pub uid: &'a str,
    pub space_id: Option<i64>,
}

/// Wrapper for conversion of database-specific error codes into actual errors
#[derive(Debug)]
pub enum Error {
    UniqueConstraintViolation(sqlx::Error),
    FKConstraintViolation(sqlx::Error),

    // All other errors
    SqlxError(sqlx::Error),
}

impl Error {
    pub fn into_inner(self) -> sqlx::Error {
        match self {
            Error::UniqueConstraintViolation(e)
            | Error::FKConstraintViolation(e)
            | Error::SqlxError(e) => e,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[async_trait]
pub trait Repository: Send + Sync + Debug {
    async fn setup(&self) -> Result<(), Error>;

    async fn create_database(&self, database: &NewDatabase<'_>) -> Result<DatabaseId, Error>;

    /// Live (not deleted) database by id
    async fn get_database(&self, id: DatabaseId) -> Result<Option<DatabaseRecord>, Error>;

    async fn database_name_exists(&self, owner: Owner<'_>, name: &str) -> Result<bool, Error>;

    async fn list_databases(
        &self,
        owner: Owner<'_>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DatabaseRecord>, Error>;

    async fn count_databases(
        &self,
        owner: Owner<'_>,
        search: Option<&str>,
    ) -> Result<i64, Error>;

    async fn update_database_description(
        &self,
        id: DatabaseId,
        description: &str,
    ) -> Result<(), Error>;

    /// Soft delete the database and its tables
    async fn delete_database(&self, id: DatabaseId) -> Result<(), Error>;

    /// Create `target` with a copy of every live table (and its fields) of `source_id`
    async fn copy_database(
        &self,
        source_id: DatabaseId,
        target: &NewDatabase<'_>,
    ) -> Result<DatabaseId, Error>;

    async fn count_tables(&self, database_id: DatabaseId) -> Result<i64, Error>;

    async fn table_name_exists(
        &self,
        database_id: DatabaseId,
        name: &str,
        exclude: Option<TableId>,
    ) -> Result<bool, Error>;

    async fn create_table(
        &self,
        database_id: DatabaseId,
        name: &str,
        description: Option<&str>,
        fields: &[NewField],
    ) -> Result<TableId, Error>;

    /// Live (not deleted) table by id
    async fn get_table(&self, id: TableId) -> Result<Option<TableRecord>, Error>;

    /// Live table by name, within the live database with backend identifier `db_id`
    async fn find_table_by_name(
        &self,
        db_id: BackendDatabaseId,
        name: &str,
    ) -> Result<Option<TableRecord>, Error>;

    /// Live tables of a database, newest first
    async fn list_tables(&self, database_id: DatabaseId) -> Result<Vec<TableRecord>, Error>;

    /// All fields of a table, in creation order
    async fn get_fields(&self, table_id: TableId) -> Result<Vec<FieldRecord>, Error>;

    async fn list_fields(
        &self,
        table_id: TableId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FieldRecord>, Error>;

    async fn count_fields(&self, table_id: TableId) -> Result<i64, Error>;

    async fn alter_table(
        &self,
        table_id: TableId,
        name: &str,
        description: Option<&str>,
        changes: &[ChangeSetItem],
    ) -> Result<(), Error>;

    /// Soft delete the table and remove its fields
    async fn drop_table(&self, table_id: TableId) -> Result<(), Error>;

    async fn copy_table(&self, table_id: TableId, new_name: &str) -> Result<TableId, Error>;

    async fn add_flow_reference(
        &self,
        flow_id: &str,
        db_id: BackendDatabaseId,
        table_id: TableId,
    ) -> Result<FlowReferenceId, Error>;

    async fn count_database_references(&self, db_id: BackendDatabaseId) -> Result<i64, Error>;

    async fn count_table_references(&self, table_id: TableId) -> Result<i64, Error>;
}
