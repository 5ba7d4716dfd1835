//! CSV import/export. Every column is read and written as text; cells are
//! coerced to the declared field types afterwards.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_csv::reader::Format;
use arrow_csv::{ReaderBuilder, WriterBuilder};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::{non_blank, Field, FieldSpec, FieldType, Row};
use crate::sql::render::parse_integer;

fn text_schema<'a>(columns: impl Iterator<Item = &'a str>) -> Arc<Schema> {
    Arc::new(Schema::new(
        columns
            .map(|name| ArrowField::new(name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ))
}

/// Convert a cell to the JSON value the DML compiler expects for the field.
///
/// Decimals are kept as their exact text so that no precision is lost on the
/// way to the backend.
pub fn coerce_cell(spec: &FieldSpec, raw: &str, row_number: usize) -> Result<Value> {
    let label = format!("{} (row {row_number})", spec.name);
    let trimmed = raw.trim();

    Ok(match &spec.field_type {
        FieldType::Integer => Value::from(parse_integer(trimmed, &label)?),
        FieldType::Number => {
            let decimal = Decimal::from_str(trimmed)
                .or_else(|_| Decimal::from_scientific(trimmed))
                .map_err(|_| Error::type_mismatch(&label, "number", raw))?;
            Value::String(decimal.to_string())
        }
        FieldType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => return Err(Error::type_mismatch(&label, "boolean", raw)),
        },
        FieldType::Time => Value::String(trimmed.to_string()),
        FieldType::String | FieldType::Other(_) => Value::String(raw.to_string()),
    })
}

/// Read rows from a CSV file whose header names user fields of the table.
/// Empty cells are left out of the row, so that column defaults apply.
pub fn read_rows<R: Read>(mut input: R, fields: &[Field], max_rows: usize) -> Result<Vec<Row>> {
    let mut content = Vec::new();
    input.read_to_end(&mut content)?;

    let (header, _) = Format::default()
        .with_header(true)
        .infer_schema(content.as_slice(), Some(0))?;
    if header.fields().is_empty() {
        return Err(Error::invalid("the file has no header row"));
    }

    let mut seen = HashSet::new();
    let columns = header
        .fields()
        .iter()
        .map(|column| {
            let name = column.name().trim();
            if !seen.insert(name.to_string()) {
                return Err(Error::invalid(format!("column {name:?} appears twice")));
            }
            fields
                .iter()
                .find(|f| !f.is_system && f.spec.name == name)
                .map(|f| &f.spec)
                .ok_or_else(|| Error::UnknownField {
                    name: name.to_string(),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let reader = ReaderBuilder::new(text_schema(columns.iter().map(|c| c.name.as_str())))
        .with_header(true)
        .build(content.as_slice())?;

    let mut rows: Vec<Row> = Vec::new();
    for batch in reader {
        let batch = batch?;
        if rows.len() + batch.num_rows() > max_rows {
            return Err(Error::LimitExceeded {
                reason: format!("a single import is limited to {max_rows} rows"),
            });
        }

        let cells: Vec<&StringArray> = (0..batch.num_columns())
            .map(|i| batch.column(i).as_string::<i32>())
            .collect();

        for i in 0..batch.num_rows() {
            let row_number = rows.len() + 1;
            let mut row = Row::new();
            for (spec, column) in columns.iter().zip(&cells) {
                if column.is_null(i) {
                    continue;
                }
                row.insert(
                    spec.name.clone(),
                    coerce_cell(spec, column.value(i), row_number)?,
                );
            }
            rows.push(row);
        }
    }

    Ok(rows)
}

/// Columns of a field definition file, in order. Only the first two are
/// mandatory; the header text itself is free.
const FIELD_COLUMNS: [&str; 5] = ["name", "type", "required", "default_value", "description"];

fn parse_required(raw: &str, row_number: usize) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" => Ok(false),
        "true" | "1" => Ok(true),
        _ => Err(Error::type_mismatch(
            &format!("required (row {row_number})"),
            "boolean",
            raw,
        )),
    }
}

/// Read field definitions from a CSV file with one field per line, to create
/// a table from. Blank defaults and descriptions are left unset.
pub fn read_field_specs<R: Read>(mut input: R) -> Result<Vec<FieldSpec>> {
    let mut content = Vec::new();
    input.read_to_end(&mut content)?;

    let (header, _) = Format::default()
        .with_header(true)
        .infer_schema(content.as_slice(), Some(0))?;
    let width = header.fields().len();
    if !(2..=FIELD_COLUMNS.len()).contains(&width) {
        return Err(Error::invalid(format!(
            "a field definition file has between 2 and {} columns, got {width}",
            FIELD_COLUMNS.len()
        )));
    }

    let reader = ReaderBuilder::new(text_schema(FIELD_COLUMNS[..width].iter().copied()))
        .with_header(true)
        .build(content.as_slice())?;

    let mut specs = Vec::new();
    for batch in reader {
        let batch = batch?;
        let cells: Vec<&StringArray> = (0..batch.num_columns())
            .map(|i| batch.column(i).as_string::<i32>())
            .collect();
        let cell = |column: usize, i: usize| {
            cells
                .get(column)
                .copied()
                .filter(|c| !c.is_null(i))
                .map(|c| c.value(i))
                .and_then(|v| non_blank(Some(v)))
        };

        for i in 0..batch.num_rows() {
            let row_number = specs.len() + 1;
            let name = cell(0, i)
                .ok_or_else(|| Error::invalid(format!("row {row_number} has no field name")))?;
            let field_type = cell(1, i).ok_or_else(|| {
                Error::invalid(format!("field {name:?} (row {row_number}) has no type"))
            })?;

            specs.push(FieldSpec {
                name: name.trim().to_string(),
                field_type: FieldType::parse(field_type.trim()),
                required: parse_required(cell(2, i).unwrap_or_default(), row_number)?,
                default_value: cell(3, i).map(str::to_string),
                description: cell(4, i).map(str::to_string),
            });
        }
    }

    Ok(specs)
}

fn cell_text(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Write a header of `columns` followed by one line per row. Missing values
/// are written as empty cells.
pub fn write_rows<W: Write>(output: W, columns: &[&str], rows: &[Row]) -> Result<()> {
    if columns.is_empty() {
        return Ok(());
    }

    let arrays = columns
        .iter()
        .map(|name| {
            let values: StringArray = rows.iter().map(|row| cell_text(row.get(*name))).collect();
            Arc::new(values) as ArrayRef
        })
        .collect();
    let batch = RecordBatch::try_new(text_schema(columns.iter().copied()), arrays)?;

    let mut writer = WriterBuilder::new().with_header(true).build(output);
    writer.write(&batch)?;
    Ok(())
}
