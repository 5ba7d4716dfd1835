use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::{Error, Result};
use crate::schema::{
    non_blank, ChangeSetItem, Field, FieldSpec, FieldType, TableSnapshot, TableSpec,
    CREATE_TIME_FIELD, ID_FIELD, UID_FIELD,
};
use crate::sql::render::{parse_integer, quote_identifier, quote_literal, SqlValue};
use crate::sql::split::{split, Statements};

/// System column definitions, in the order they're created
const SYSTEM_COLUMNS: [(&str, &str, &str); 3] = [
    (ID_FIELD, "BIGSERIAL PRIMARY KEY", "Primary key id"),
    (UID_FIELD, "VARCHAR(64) NOT NULL", "uid"),
    (
        CREATE_TIME_FIELD,
        "TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP",
        "Create time",
    ),
];

/// An ordered list of `;`-terminated statements
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatementBlob {
    text: String,
}

impl StatementBlob {
    fn push(&mut self, statement: impl AsRef<str>) {
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(statement.as_ref());
        self.text.push(';');
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn statements(&self) -> Statements<'_> {
        split(&self.text)
    }
}

impl fmt::Display for StatementBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// What to compile. Every variant carries exactly the catalog state it needs.
#[derive(Debug, Clone, Copy)]
pub enum DdlOperation<'a> {
    Create(&'a TableSpec),
    Alter {
        prior: &'a TableSnapshot,
        name: &'a str,
        description: Option<&'a str>,
        changes: &'a [ChangeSetItem],
    },
    Drop {
        name: &'a str,
    },
    Copy {
        source: &'a str,
        target: &'a str,
    },
}

impl DdlOperation<'_> {
    pub fn compile(&self) -> Result<StatementBlob> {
        match *self {
            Self::Create(spec) => create_table(spec),
            Self::Alter {
                prior,
                name,
                description,
                changes,
            } => alter_table(prior, name, description, changes),
            Self::Drop { name } => Ok(drop_table(name)),
            Self::Copy { source, target } => Ok(copy_table(source, target)),
        }
    }
}

/// Render a default value according to the field type.
///
/// A `number` default that isn't a valid decimal falls back to `0` rather than
/// failing the whole request.
pub fn render_default(field_type: &FieldType, raw: &str) -> Result<String> {
    let value = match field_type {
        FieldType::Integer => SqlValue::Integer(parse_integer(raw, "default_value")?),
        FieldType::Number => SqlValue::Decimal(
            Decimal::from_str(raw)
                .or_else(|_| Decimal::from_scientific(raw))
                .unwrap_or_else(|_| {
                    warn!("Invalid number default {raw:?}, falling back to 0");
                    Decimal::ZERO
                }),
        ),
        FieldType::Boolean => SqlValue::Boolean(raw.eq_ignore_ascii_case("true")),
        FieldType::Time => SqlValue::Time(raw.to_string()),
        FieldType::String | FieldType::Other(_) => SqlValue::Text(raw.to_string()),
    };
    quote_literal(&value)
}

fn column_definition(spec: &FieldSpec) -> Result<String> {
    let mut definition = format!(
        "{} {}",
        quote_identifier(&spec.name),
        spec.field_type.sql_type()
    );
    if spec.required {
        definition.push_str(" NOT NULL");
    }
    if let Some(default) = &spec.default_value {
        definition.push_str(" DEFAULT ");
        definition.push_str(&render_default(&spec.field_type, default)?);
    }
    Ok(definition)
}

fn comment_text(description: Option<&str>) -> Result<String> {
    match non_blank(description) {
        Some(text) => quote_literal(&SqlValue::Text(text.to_string())),
        None => Ok("NULL".to_string()),
    }
}

fn comment_on_column(table: &str, column: &str, description: Option<&str>) -> Result<String> {
    Ok(format!(
        "COMMENT ON COLUMN {table}.{} IS {}",
        quote_identifier(column),
        comment_text(description)?
    ))
}

pub fn create_table(spec: &TableSpec) -> Result<StatementBlob> {
    let table = quote_identifier(&spec.name);

    let columns = SYSTEM_COLUMNS
        .iter()
        .map(|(name, definition, _)| Ok(format!("{} {definition}", quote_identifier(name))))
        .chain(spec.fields.iter().map(column_definition))
        .collect::<Result<Vec<_>>>()?;

    let mut blob = StatementBlob::default();
    blob.push(format!(
        "CREATE TABLE {table} (\n  {}\n)",
        columns.join(",\n  ")
    ));

    if non_blank(spec.description.as_deref()).is_some() {
        blob.push(format!(
            "COMMENT ON TABLE {table} IS {}",
            comment_text(spec.description.as_deref())?
        ));
    }
    for (name, _, description) in SYSTEM_COLUMNS {
        blob.push(comment_on_column(&table, name, Some(description))?);
    }
    for field in &spec.fields {
        if non_blank(field.description.as_deref()).is_some() {
            blob.push(comment_on_column(&table, &field.name, field.description.as_deref())?);
        }
    }

    Ok(blob)
}

fn prior_user_field<'a>(prior: &'a TableSnapshot, id: i64) -> Result<&'a Field> {
    match prior.field(id) {
        Some(field) if !field.is_system => Ok(field),
        Some(field) => Err(Error::internal(format!(
            "system field {:?} can't be altered",
            field.spec.name
        ))),
        None => Err(Error::internal(format!(
            "field {id} is not part of table {:?}",
            prior.name
        ))),
    }
}

/// Emit only the clauses for attributes that actually changed
fn modify_column(blob: &mut StatementBlob, table: &str, prior: &FieldSpec, next: &FieldSpec) -> Result<()> {
    let mut column = quote_identifier(&prior.name);
    if next.name != prior.name {
        let renamed = quote_identifier(&next.name);
        blob.push(format!("ALTER TABLE {table} RENAME COLUMN {column} TO {renamed}"));
        column = renamed;
    }

    let type_changed = next.field_type != prior.field_type;
    let default_changed = next.default_value != prior.default_value;
    let mut clauses = Vec::new();

    if type_changed {
        // A stored default of the old type may not cast to the new one
        if prior.default_value.is_some() {
            clauses.push(format!("ALTER COLUMN {column} DROP DEFAULT"));
        }
        let sql_type = next.field_type.sql_type();
        clauses.push(format!(
            "ALTER COLUMN {column} SET DATA TYPE {sql_type} USING {column}::{sql_type}"
        ));
    }
    if next.required != prior.required {
        let action = if next.required { "SET" } else { "DROP" };
        clauses.push(format!("ALTER COLUMN {column} {action} NOT NULL"));
    }
    match &next.default_value {
        Some(default) if type_changed || default_changed => clauses.push(format!(
            "ALTER COLUMN {column} SET DEFAULT {}",
            render_default(&next.field_type, default)?
        )),
        None if default_changed && !type_changed => {
            clauses.push(format!("ALTER COLUMN {column} DROP DEFAULT"))
        }
        _ => {}
    }
    if !clauses.is_empty() {
        blob.push(format!("ALTER TABLE {table} {}", clauses.join(", ")));
    }

    if non_blank(next.description.as_deref()) != non_blank(prior.description.as_deref()) {
        blob.push(format!(
            "COMMENT ON COLUMN {table}.{column} IS {}",
            comment_text(next.description.as_deref())?
        ));
    }
    Ok(())
}

pub fn alter_table(
    prior: &TableSnapshot,
    name: &str,
    description: Option<&str>,
    changes: &[ChangeSetItem],
) -> Result<StatementBlob> {
    let mut blob = StatementBlob::default();
    let table = quote_identifier(name);

    if name != prior.name {
        blob.push(format!(
            "ALTER TABLE {} RENAME TO {table}",
            quote_identifier(&prior.name)
        ));
    }
    if non_blank(description) != non_blank(prior.description.as_deref()) {
        blob.push(format!(
            "COMMENT ON TABLE {table} IS {}",
            comment_text(description)?
        ));
    }

    for change in changes.iter().sorted_by_key(|c| c.execution_order()) {
        match change {
            ChangeSetItem::Delete { id } => {
                let field = prior_user_field(prior, *id)?;
                blob.push(format!(
                    "ALTER TABLE {table} DROP COLUMN IF EXISTS {}",
                    quote_identifier(&field.spec.name)
                ));
            }
            ChangeSetItem::Update { id, spec } => {
                let field = prior_user_field(prior, *id)?;
                modify_column(&mut blob, &table, &field.spec, spec)?;
            }
            ChangeSetItem::Insert(spec) => {
                let definition = column_definition(spec)?;
                blob.push(format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {definition}"));
                if non_blank(spec.description.as_deref()).is_some() {
                    blob.push(comment_on_column(&table, &spec.name, spec.description.as_deref())?);
                }
            }
        }
    }

    Ok(blob)
}

pub fn drop_table(name: &str) -> StatementBlob {
    let mut blob = StatementBlob::default();
    blob.push(format!("DROP TABLE IF EXISTS {}", quote_identifier(name)));
    blob
}

pub fn copy_table(source: &str, target: &str) -> StatementBlob {
    let mut blob = StatementBlob::default();
    blob.push(format!(
        "CREATE TABLE {} AS SELECT * FROM {}",
        quote_identifier(target),
        quote_identifier(source)
    ));
    blob
}
