use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};
use crate::schema::{Row, CREATE_TIME_FIELD, ID_FIELD, UID_FIELD};
use crate::sql::render::{
    quote_identifier, quote_literal, reject_unsafe, require_integer, SqlValue,
};

/// Kind of data operation, as reported to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    Select,
    Count,
}

#[derive(Debug, Clone, Copy)]
pub enum DmlStatement<'a> {
    /// `uid` is the principal the row is written for; it overrides any
    /// `uid` entry in the row itself.
    Insert { row: &'a Row, uid: &'a str },
    Update { row: &'a Row },
    Delete { row: &'a Row },
    SelectPage { limit: u64, offset: u64 },
    Count,
    SelectIds { ids: &'a [i64] },
    SelectAll { limit: u64 },
}

impl DmlStatement<'_> {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Insert { .. } => OperationKind::Insert,
            Self::Update { .. } => OperationKind::Update,
            Self::Delete { .. } => OperationKind::Delete,
            Self::SelectPage { .. } | Self::SelectIds { .. } | Self::SelectAll { .. } => {
                OperationKind::Select
            }
            Self::Count => OperationKind::Count,
        }
    }

    /// Compile into exactly one statement (without a trailing `;`)
    pub fn compile(&self, table: &str) -> Result<String> {
        let table = quote_identifier(table);
        let statement = match *self {
            Self::Insert { row, uid } => insert(&table, row, uid)?,
            Self::Update { row } => update(&table, row)?,
            Self::Delete { row } => format!(
                "DELETE FROM {table} WHERE {} = {}",
                quote_identifier(ID_FIELD),
                row_id(row)?
            ),
            Self::SelectPage { limit, offset } => format!(
                "SELECT * FROM {table} ORDER BY {} DESC, {} DESC LIMIT {limit} OFFSET {offset}",
                quote_identifier(CREATE_TIME_FIELD),
                quote_identifier(ID_FIELD)
            ),
            Self::Count => format!("SELECT COUNT(*) FROM {table}"),
            Self::SelectIds { ids } => {
                if ids.is_empty() {
                    return Err(Error::invalid("at least one id is required"));
                }
                let ids: Vec<String> = ids.iter().map(i64::to_string).collect();
                format!(
                    "SELECT * FROM {table} WHERE {} IN ({})",
                    quote_identifier(ID_FIELD),
                    ids.join(", ")
                )
            }
            Self::SelectAll { limit } => {
                format!("SELECT * FROM {table} LIMIT {limit} OFFSET 0")
            }
        };

        reject_unsafe(&statement)?;
        Ok(statement)
    }
}

fn row_id(row: &Row) -> Result<i64> {
    let id = row.get(ID_FIELD).ok_or_else(|| Error::MissingRequiredField {
        name: ID_FIELD.to_string(),
    })?;
    require_integer(id, ID_FIELD)
}

fn insert(table: &str, row: &Row, uid: &str) -> Result<String> {
    let mut columns = vec![quote_identifier(UID_FIELD)];
    let mut values = vec![quote_literal(&SqlValue::Text(uid.to_string()))?];

    for (name, value) in row.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        if name == UID_FIELD || value.is_null() {
            continue;
        }
        columns.push(quote_identifier(name));
        values.push(quote_literal(&SqlValue::from_json(value, name)?)?);
    }

    Ok(format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        values.join(", ")
    ))
}

fn update(table: &str, row: &Row) -> Result<String> {
    let id = row_id(row)?;

    let assignments = row
        .iter()
        .sorted_by(|a, b| a.0.cmp(b.0))
        .filter(|(name, _)| name.as_str() != ID_FIELD)
        .map(|(name, value)| {
            Ok(format!(
                "{} = {}",
                quote_identifier(name),
                quote_literal(&SqlValue::from_json(value, name)?)?
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    if assignments.is_empty() {
        return Err(Error::invalid("nothing to update besides the id"));
    }

    Ok(format!(
        "UPDATE {table} SET {} WHERE {} = {id}",
        assignments.join(", "),
        quote_identifier(ID_FIELD)
    ))
}
