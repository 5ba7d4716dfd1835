use std::io::{Read, Write};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use tracing::{debug, info, warn};

use crate::backend::{DmlOutcome, ExecutionMode};
use crate::context::RequestContext;
use crate::data_types::TableId;
use crate::error::{Error, Result};
use crate::import::file::{read_rows, write_rows};
use crate::import::{BatchImporter, ImportSummary};
use crate::repository::interface::{DatabaseRecord, TableRecord};
use crate::schema::{Field, FieldType, Row, CREATE_TIME_FIELD, ID_FIELD, UID_FIELD};
use crate::sql::{require_integer, DmlStatement, OperationKind};

use super::{DatabaseService, Page};

/// Single-row write operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RowOperation {
    Insert,
    Update,
    Delete,
}

/// Check that a supplied value fits the declared field type
fn check_value(field: &Field, value: &Value) -> Result<()> {
    let name = &field.spec.name;
    match (&field.spec.field_type, value) {
        (_, Value::Null) => Ok(()),
        (_, Value::Array(_) | Value::Object(_)) => {
            Err(Error::type_mismatch(name, "scalar value", value))
        }
        (FieldType::Integer, _) => require_integer(value, name).map(|_| ()),
        (FieldType::Number, Value::Number(_)) => Ok(()),
        (FieldType::Number, Value::String(s)) => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .map(|_| ())
            .map_err(|_| Error::type_mismatch(name, "number", s)),
        (FieldType::Number, _) => Err(Error::type_mismatch(name, "number", value)),
        (FieldType::Boolean, Value::Bool(_)) => Ok(()),
        (FieldType::Boolean, _) => Err(Error::type_mismatch(name, "boolean", value)),
        (FieldType::String | FieldType::Time | FieldType::Other(_), _) => Ok(()),
    }
}

/// Validate a row against the catalog before it gets compiled
fn validate_row(fields: &[Field], row: &Row, operation: RowOperation) -> Result<()> {
    for (name, value) in row {
        let field = fields
            .iter()
            .find(|f| &f.spec.name == name)
            .ok_or_else(|| Error::UnknownField { name: name.clone() })?;

        let writable = match operation {
            // `uid` is always overridden by the requester
            RowOperation::Insert => !field.is_system || name == UID_FIELD,
            RowOperation::Update => !field.is_system || name == ID_FIELD,
            RowOperation::Delete => true,
        };
        if !writable {
            return Err(Error::invalid(format!(
                "system field {name:?} can't be written"
            )));
        }
        check_value(field, value)?;
    }

    let exempt = |field: &Field| match operation {
        RowOperation::Insert => field.is_system,
        RowOperation::Update | RowOperation::Delete => {
            field.spec.name == ID_FIELD || field.spec.name == CREATE_TIME_FIELD
        }
    };
    if operation != RowOperation::Delete {
        let missing = fields.iter().find(|f| {
            f.spec.required
                && f.spec.default_value.is_none()
                && !exempt(f)
                && row.get(&f.spec.name).map_or(true, Value::is_null)
        });
        if let Some(field) = missing {
            return Err(Error::MissingRequiredField {
                name: field.spec.name.clone(),
            });
        }
    }

    // A required field can never be set to NULL, even if it has a default
    if let Some(field) = fields.iter().find(|f| {
        f.spec.required && !exempt(f) && row.get(&f.spec.name).is_some_and(Value::is_null)
    }) {
        return Err(Error::MissingRequiredField {
            name: field.spec.name.clone(),
        });
    }

    Ok(())
}

fn user_columns(fields: &[Field]) -> Vec<&str> {
    fields
        .iter()
        .filter(|f| !f.is_system)
        .map(|f| f.spec.name.as_str())
        .collect()
}

impl DatabaseService {
    async fn execute_dml(
        &self,
        context: &RequestContext,
        database: &DatabaseRecord,
        table: &TableRecord,
        statement: DmlStatement<'_>,
        mode: ExecutionMode,
    ) -> Result<DmlOutcome> {
        let sql = statement.compile(&table.name)?;
        debug!("Executing DML on backend database {} ({mode}): {sql}", database.db_id);
        self.backend
            .execute_dml(context, database.db_id, &sql, statement.kind(), mode)
            .await
    }

    /// Insert, update or delete a single row
    pub async fn operate_row(
        &self,
        context: &RequestContext,
        table_id: TableId,
        operation: RowOperation,
        row: &Row,
        mode: ExecutionMode,
    ) -> Result<DmlOutcome> {
        let (database, table) = self.live_table(table_id).await?;
        let fields = self.fields(table_id).await?;
        validate_row(&fields, row, operation)?;

        let statement = match operation {
            RowOperation::Insert => DmlStatement::Insert {
                row,
                uid: &context.uid,
            },
            RowOperation::Update => DmlStatement::Update { row },
            RowOperation::Delete => DmlStatement::Delete { row },
        };
        self.execute_dml(context, &database, &table, statement, mode)
            .await
    }

    /// One page of rows, newest first
    pub async fn select_rows(
        &self,
        context: &RequestContext,
        table_id: TableId,
        page_num: u64,
        page_size: u64,
        mode: ExecutionMode,
    ) -> Result<Page<Row>> {
        let (limit, offset) = self.page_bounds(page_num, page_size)?;
        let (database, table) = self.live_table(table_id).await?;

        let total = self
            .execute_dml(context, &database, &table, DmlStatement::Count, mode)
            .await?
            .count();
        let records = self
            .execute_dml(
                context,
                &database,
                &table,
                DmlStatement::SelectPage { limit, offset },
                mode,
            )
            .await?
            .into_rows();

        Ok(Page { total, records })
    }

    /// Insert every row of a CSV file. Rows are applied in file order; when any of
    /// them fails the others are kept and `PartialImportFailure` reports which.
    pub async fn import_rows<R: Read>(
        &self,
        context: &RequestContext,
        table_id: TableId,
        input: R,
        mode: ExecutionMode,
    ) -> Result<ImportSummary> {
        let (database, table) = self.live_table(table_id).await?;
        let fields = self.fields(table_id).await?;

        let rows = read_rows(input, &fields, self.import.max_rows)?;
        if rows.is_empty() {
            return Err(Error::invalid("the file contains no rows"));
        }
        info!(
            "Importing {} row(s) into table {:?} (id {table_id})",
            rows.len(),
            table.name
        );

        let importer = BatchImporter::new(self.import.chunk_size, self.import.max_retries);
        let backend = &self.backend;
        let db_id = database.db_id;
        let summary = importer
            .execute_in_chunks(
                &rows,
                |row| {
                    validate_row(&fields, row, RowOperation::Insert)?;
                    DmlStatement::Insert {
                        row,
                        uid: &context.uid,
                    }
                    .compile(&table.name)
                },
                move |statement| async move {
                    debug!("Executing DML on backend database {db_id} ({mode}): {statement}");
                    backend
                        .execute_dml(context, db_id, &statement, OperationKind::Insert, mode)
                        .await
                        .map(|_| ())
                },
            )
            .await;

        if summary.failed > 0 {
            warn!(
                "Import into table {table_id}: {} row(s) imported, {} failed",
                summary.success, summary.failed
            );
            return Err(Error::PartialImportFailure(summary));
        }
        Ok(summary)
    }

    /// Write rows as CSV, either the ones with the given ids or the first rows of the
    /// table. Returns the number of rows written.
    pub async fn export_rows<W: Write>(
        &self,
        context: &RequestContext,
        table_id: TableId,
        ids: Option<&[Value]>,
        output: W,
        mode: ExecutionMode,
    ) -> Result<usize> {
        let (database, table) = self.live_table(table_id).await?;
        let fields = self.fields(table_id).await?;

        // An empty id list exports the first rows, like no list at all
        let ids = match ids.filter(|ids| !ids.is_empty()) {
            Some(ids) => {
                if ids.len() as u64 > self.limits.max_export_ids {
                    return Err(Error::LimitExceeded {
                        reason: format!(
                            "at most {} ids can be exported at once",
                            self.limits.max_export_ids
                        ),
                    });
                }
                Some(
                    ids.iter()
                        .map(|id| require_integer(id, ID_FIELD))
                        .collect::<Result<Vec<_>>>()?,
                )
            }
            None => None,
        };

        let statement = match &ids {
            Some(ids) => DmlStatement::SelectIds { ids },
            None => DmlStatement::SelectAll {
                limit: self.limits.export_row_limit,
            },
        };
        let rows = self
            .execute_dml(context, &database, &table, statement, mode)
            .await?
            .into_rows();

        write_rows(output, &user_columns(&fields), &rows)?;
        info!("Exported {} row(s) from table {table_id}", rows.len());
        Ok(rows.len())
    }

    /// A header-only CSV listing the user fields, to be filled in and imported
    pub async fn write_template<W: Write>(
        &self,
        _context: &RequestContext,
        table_id: TableId,
        output: W,
    ) -> Result<()> {
        self.live_table(table_id).await?;
        let fields = self.fields(table_id).await?;
        write_rows(output, &user_columns(&fields), &[])
    }
}
