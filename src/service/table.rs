use std::collections::HashSet;
use std::io::Read;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::info;

use crate::context::RequestContext;
use crate::data_types::{DatabaseId, TableId};
use crate::error::{Error, Result};
use crate::import::file::read_field_specs;
use crate::repository::interface::{NewField, TableRecord};
use crate::schema::{
    is_system_field, non_blank, ChangeSetItem, Field, FieldSpec, FieldType, TableSpec,
    CREATE_TIME_FIELD, ID_FIELD, UID_FIELD,
};
use crate::sql::ddl::render_default;
use crate::sql::naming::{copy_name, is_valid_identifier, MAX_IDENTIFIER_LENGTH};
use crate::sql::DdlOperation;

use super::database::MAX_COPY_ATTEMPTS;
use super::{DatabaseService, Page};

lazy_static! {
    /// Types outside the known set are passed to the backend verbatim, so they're
    /// restricted to a plain type name with an optional precision/scale.
    static ref OTHER_TYPE_RE: Regex =
        Regex::new(r"^[A-Za-z][A-Za-z0-9_]*(\(\d+(,\s*\d+)?\))?$").unwrap();
}

/// New name, description and field changes of a table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlterRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub changes: Vec<ChangeSetItem>,
}

fn validate_table_name(name: &str) -> Result<()> {
    if !is_valid_identifier(name) {
        return Err(Error::invalid(format!(
            "table name {name:?} must start with a letter or an underscore, contain only \
             letters, digits and underscores and be at most {MAX_IDENTIFIER_LENGTH} bytes long"
        )));
    }
    Ok(())
}

/// Everything about a single user field that can be checked without the catalog
fn validate_field(spec: &FieldSpec) -> Result<()> {
    if !is_valid_identifier(&spec.name) {
        return Err(Error::invalid(format!(
            "field name {:?} must start with a letter or an underscore, contain only \
             letters, digits and underscores and be at most {MAX_IDENTIFIER_LENGTH} bytes long",
            spec.name
        )));
    }
    if is_system_field(&spec.name) {
        return Err(Error::invalid(format!(
            "field name {:?} is reserved",
            spec.name
        )));
    }
    if let FieldType::Other(name) = &spec.field_type {
        if !OTHER_TYPE_RE.is_match(name) {
            return Err(Error::invalid(format!("unsupported field type {name:?}")));
        }
    }
    if let Some(default) = non_blank(spec.default_value.as_deref()) {
        render_default(&spec.field_type, default)?;
    }
    Ok(())
}

/// Reject two fields with the same name in the final field list
fn check_unique<'a>(names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(Error::NameCollision {
                object: "Field",
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Give a field with a missing or blank default the zero value of its type
fn with_filled_default(mut spec: FieldSpec) -> FieldSpec {
    if non_blank(spec.default_value.as_deref()).is_none() {
        spec.default_value = Some(match spec.field_type {
            FieldType::Integer | FieldType::Number => "0".to_string(),
            FieldType::Boolean => "false".to_string(),
            FieldType::Time => chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            FieldType::String | FieldType::Other(_) => String::new(),
        });
    }
    spec
}

fn system_fields() -> Vec<NewField> {
    [
        FieldSpec::new(ID_FIELD, FieldType::Integer)
            .required()
            .with_description("Primary key id"),
        FieldSpec::new(UID_FIELD, FieldType::String).with_description("uid"),
        FieldSpec::new(CREATE_TIME_FIELD, FieldType::Time)
            .required()
            .with_description("Create time"),
    ]
    .into_iter()
    .map(|spec| NewField {
        spec,
        is_system: true,
    })
    .collect()
}

impl DatabaseService {
    async fn check_table_limit(&self, database_id: DatabaseId) -> Result<()> {
        let count = self.repository.count_tables(database_id).await?;
        if count as u64 >= self.limits.max_tables_per_database {
            return Err(Error::LimitExceeded {
                reason: format!(
                    "a database can't have more than {} tables",
                    self.limits.max_tables_per_database
                ),
            });
        }
        Ok(())
    }

    fn check_field_limit(&self, count: usize) -> Result<()> {
        if count as u64 > self.limits.max_fields_per_table {
            return Err(Error::LimitExceeded {
                reason: format!(
                    "a table can't have more than {} fields",
                    self.limits.max_fields_per_table
                ),
            });
        }
        Ok(())
    }

    async fn check_table_name_free(
        &self,
        database_id: DatabaseId,
        name: &str,
        exclude: Option<TableId>,
    ) -> Result<()> {
        if self
            .repository
            .table_name_exists(database_id, name, exclude)
            .await?
        {
            return Err(Error::NameCollision {
                object: "Table",
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn live_table_record(&self, id: TableId) -> Result<TableRecord> {
        self.repository
            .get_table(id)
            .await?
            .ok_or(Error::NotFound { object: "Table", id })
    }

    pub async fn create_table(
        &self,
        context: &RequestContext,
        database_id: DatabaseId,
        spec: TableSpec,
    ) -> Result<TableRecord> {
        let database = self.live_database(database_id).await?;
        self.check_table_limit(database_id).await?;

        validate_table_name(&spec.name)?;
        if spec.fields.is_empty() {
            return Err(Error::invalid("a table needs at least one field"));
        }
        self.check_field_limit(spec.fields.len())?;
        spec.fields.iter().try_for_each(validate_field)?;
        check_unique(spec.fields.iter().map(|f| f.name.as_str()))?;
        self.check_table_name_free(database_id, &spec.name, None)
            .await?;

        let spec = TableSpec {
            description: non_blank(spec.description.as_deref()).map(str::to_string),
            fields: spec.fields.into_iter().map(with_filled_default).collect(),
            ..spec
        };

        let blob = DdlOperation::Create(&spec).compile()?;
        self.run_ddl(context, &database, &blob).await?;

        let fields: Vec<NewField> = system_fields()
            .into_iter()
            .chain(spec.fields.iter().map(|f| NewField {
                spec: f.clone(),
                is_system: false,
            }))
            .collect();
        let id = self
            .repository
            .create_table(
                database_id,
                &spec.name,
                spec.description.as_deref(),
                &fields,
            )
            .await?;
        info!("Created table {:?} (id {id}) in database {database_id}", spec.name);

        self.live_table_record(id).await
    }

    /// Rename a table, change its description and add, change or drop fields
    pub async fn alter_table(
        &self,
        context: &RequestContext,
        table_id: TableId,
        request: AlterRequest,
    ) -> Result<TableRecord> {
        let (database, table) = self.live_table(table_id).await?;
        let prior = self.snapshot(&table).await?;

        let name = request.name.trim();
        validate_table_name(name)?;
        if name != table.name {
            self.check_table_name_free(database.id, name, Some(table_id))
                .await?;
        }

        let mut touched = HashSet::new();
        let mut changes = Vec::with_capacity(request.changes.len());
        for change in request.changes {
            let change = match change {
                ChangeSetItem::Insert(spec) => {
                    validate_field(&spec)?;
                    ChangeSetItem::Insert(with_filled_default(spec))
                }
                ChangeSetItem::Update { id, mut spec } => {
                    validate_field(&spec)?;
                    // A same-typed field keeps its stored default when none is given
                    if non_blank(spec.default_value.as_deref()).is_none() {
                        if let Some(field) = prior
                            .field(id)
                            .filter(|f| f.spec.field_type == spec.field_type)
                        {
                            spec.default_value = field.spec.default_value.clone();
                        }
                    }
                    ChangeSetItem::Update {
                        id,
                        spec: with_filled_default(spec),
                    }
                }
                delete @ ChangeSetItem::Delete { .. } => delete,
            };

            if let ChangeSetItem::Update { id, .. } | ChangeSetItem::Delete { id } = &change {
                match prior.field(*id) {
                    None => {
                        return Err(Error::UnknownField {
                            name: id.to_string(),
                        })
                    }
                    Some(field) if field.is_system => {
                        return Err(Error::invalid(format!(
                            "system field {:?} can't be changed",
                            field.spec.name
                        )))
                    }
                    Some(_) => {}
                }
                if !touched.insert(*id) {
                    return Err(Error::invalid(format!(
                        "field {id} is changed more than once"
                    )));
                }
            }
            changes.push(change);
        }

        // The user fields as they'll be once the alteration is applied
        let mut resulting: Vec<&str> = prior
            .user_fields()
            .filter(|f| !touched.contains(&f.id))
            .map(|f| f.spec.name.as_str())
            .collect();
        for change in &changes {
            match change {
                ChangeSetItem::Insert(spec) | ChangeSetItem::Update { spec, .. } => {
                    resulting.push(&spec.name)
                }
                ChangeSetItem::Delete { .. } => {}
            }
        }
        check_unique(resulting.iter().copied())?;
        self.check_field_limit(resulting.len())?;

        let description = non_blank(request.description.as_deref());
        let blob = DdlOperation::Alter {
            prior: &prior,
            name,
            description,
            changes: &changes,
        }
        .compile()?;

        if !blob.is_empty() {
            self.run_ddl(context, &database, &blob).await?;
        }
        self.repository
            .alter_table(table_id, name, description, &changes)
            .await?;
        info!(
            "Altered table {table_id} ({} field change(s))",
            changes.len()
        );

        self.live_table_record(table_id).await
    }

    pub async fn drop_table(&self, context: &RequestContext, table_id: TableId) -> Result<()> {
        let (database, table) = self.live_table(table_id).await?;

        let count = self.repository.count_table_references(table_id).await?;
        if count > 0 {
            return Err(Error::StillReferenced {
                object: "Table",
                id: table_id,
                count,
            });
        }

        let blob = DdlOperation::Drop { name: &table.name }.compile()?;
        self.run_ddl(context, &database, &blob).await?;
        self.repository.drop_table(table_id).await?;
        info!("Dropped table {:?} (id {table_id})", table.name);

        Ok(())
    }

    /// Copy a table's structure and data under the first free `_copy` name
    pub async fn copy_table(
        &self,
        context: &RequestContext,
        table_id: TableId,
    ) -> Result<TableRecord> {
        let (database, table) = self.live_table(table_id).await?;
        self.check_table_limit(database.id).await?;

        let mut name = copy_name(&table.name);
        let mut attempts = 1;
        while self
            .repository
            .table_name_exists(database.id, &name, None)
            .await?
        {
            if attempts >= MAX_COPY_ATTEMPTS {
                return Err(Error::NameCollision {
                    object: "Table",
                    name,
                });
            }
            name = copy_name(&name);
            attempts += 1;
        }

        let blob = DdlOperation::Copy {
            source: &table.name,
            target: &name,
        }
        .compile()?;
        self.run_ddl(context, &database, &blob).await?;

        let id = self.repository.copy_table(table_id, &name).await?;
        info!("Copied table {table_id} into {id} ({name:?})");

        self.live_table_record(id).await
    }

    /// Live tables of a database, newest first
    pub async fn list_tables(
        &self,
        _context: &RequestContext,
        database_id: DatabaseId,
    ) -> Result<Vec<TableRecord>> {
        self.live_database(database_id).await?;
        Ok(self.repository.list_tables(database_id).await?)
    }

    pub async fn list_fields(
        &self,
        _context: &RequestContext,
        table_id: TableId,
        page_num: u64,
        page_size: u64,
    ) -> Result<Page<Field>> {
        let (limit, offset) = self.page_bounds(page_num, page_size)?;
        self.live_table(table_id).await?;

        let total = self.repository.count_fields(table_id).await?;
        let records = self
            .repository
            .list_fields(table_id, limit as i64, offset as i64)
            .await?
            .into_iter()
            .map(Field::from)
            .collect();

        Ok(Page { total, records })
    }

    /// Read field definitions from a CSV file and check them the way
    /// `create_table` would, so they can be used for a new table
    pub fn import_field_specs<R: Read>(&self, input: R) -> Result<Vec<FieldSpec>> {
        let specs = read_field_specs(input)?;
        if specs.is_empty() {
            return Err(Error::invalid("the file defines no fields"));
        }
        self.check_field_limit(specs.len())?;
        specs.iter().try_for_each(validate_field)?;
        check_unique(specs.iter().map(|f| f.name.as_str()))?;

        info!("Read {} field definition(s)", specs.len());
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::error::ErrorKind;
    use crate::testutils::{in_memory_service, BackendCall};

    fn alice() -> RequestContext {
        RequestContext::new("alice", None)
    }

    fn orders() -> TableSpec {
        TableSpec {
            name: "orders".to_string(),
            description: Some("Customer orders".to_string()),
            fields: vec![
                FieldSpec::new("qty", FieldType::Integer).required(),
                FieldSpec::new("note", FieldType::String).with_description("Free text"),
            ],
        }
    }

    #[rstest]
    #[case::bad_name(FieldSpec::new("1qty", FieldType::Integer), ErrorKind::InvalidRequest)]
    #[case::reserved(FieldSpec::new("uid", FieldType::String), ErrorKind::InvalidRequest)]
    #[case::bad_type(
        FieldSpec::new("qty", FieldType::Other("INT; DROP TABLE x".to_string())),
        ErrorKind::InvalidRequest
    )]
    #[case::bad_default(
        FieldSpec::new("qty", FieldType::Integer).with_default("1.5"),
        ErrorKind::TypeMismatch
    )]
    fn test_validate_field_rejects(#[case] spec: FieldSpec, #[case] kind: ErrorKind) {
        assert_eq!(validate_field(&spec).unwrap_err().kind(), kind);
    }

    #[test]
    fn test_validate_field_accepts_other_types() {
        validate_field(&FieldSpec::new("price", FieldType::Other("NUMERIC(10, 2)".to_string())))
            .unwrap();
        validate_field(&FieldSpec::new("doc", FieldType::Other("jsonb".to_string()))).unwrap();
    }

    #[test]
    fn test_filled_defaults() {
        let filled = |t| with_filled_default(FieldSpec::new("f", t)).default_value.unwrap();
        assert_eq!(filled(FieldType::Integer), "0");
        assert_eq!(filled(FieldType::Number), "0");
        assert_eq!(filled(FieldType::Boolean), "false");
        assert_eq!(filled(FieldType::String), "");
        assert_eq!(filled(FieldType::Time).len(), "2024-01-01 00:00:00".len());

        let kept = with_filled_default(FieldSpec::new("f", FieldType::Integer).with_default("5"));
        assert_eq!(kept.default_value.as_deref(), Some("5"));

        let blank = with_filled_default(FieldSpec::new("f", FieldType::Integer).with_default("  "));
        assert_eq!(blank.default_value.as_deref(), Some("0"));
    }

    #[rstest]
    #[case::integer(FieldType::Integer, "BIGINT", "0")]
    #[case::number(FieldType::Number, "DECIMAL", "0")]
    #[case::time(FieldType::Time, "TIMESTAMP", "'2")]
    #[tokio::test]
    async fn test_create_table_blank_default(
        #[case] field_type: FieldType,
        #[case] sql_type: &str,
        #[case] default: &str,
    ) {
        let (service, backend) = in_memory_service().await;
        let database = service.create_database(&alice(), "shop", None).await.unwrap();
        backend.clear();

        let spec = TableSpec {
            name: "t".to_string(),
            description: None,
            fields: vec![FieldSpec::new("f", field_type).with_default("")],
        };
        service.create_table(&alice(), database.id, spec).await.unwrap();

        let create = &backend.ddl_statements()[0];
        assert!(
            create.contains(&format!("\"f\" {sql_type} DEFAULT {default}")),
            "{create}"
        );
        assert!(!create.contains("DEFAULT ''"), "{create}");
    }

    #[rstest]
    #[case::integer(FieldType::Integer, "BIGINT", "0")]
    #[case::number(FieldType::Number, "DECIMAL", "0")]
    #[case::time(FieldType::Time, "TIMESTAMP", "'2")]
    #[tokio::test]
    async fn test_alter_table_blank_default(
        #[case] field_type: FieldType,
        #[case] sql_type: &str,
        #[case] default: &str,
    ) {
        let (service, backend) = in_memory_service().await;
        let database = service.create_database(&alice(), "shop", None).await.unwrap();
        let table = service
            .create_table(&alice(), database.id, orders())
            .await
            .unwrap();
        let fields = service.list_fields(&alice(), table.id, 1, 20).await.unwrap();
        let note = fields.records[4].id;
        backend.clear();

        service
            .alter_table(
                &alice(),
                table.id,
                AlterRequest {
                    name: "orders".to_string(),
                    description: Some("Customer orders".to_string()),
                    changes: vec![
                        ChangeSetItem::Insert(
                            FieldSpec::new("added", field_type.clone()).with_default(""),
                        ),
                        ChangeSetItem::Update {
                            id: note,
                            spec: FieldSpec::new("note", field_type)
                                .with_default(" ")
                                .with_description("Free text"),
                        },
                    ],
                },
            )
            .await
            .unwrap();

        let statements = backend.ddl_statements();
        assert_eq!(statements.len(), 2, "{statements:?}");
        assert!(
            statements[0].contains(&format!(
                "SET DATA TYPE {sql_type} USING \"note\"::{sql_type}, ALTER COLUMN \"note\" SET DEFAULT {default}"
            )),
            "{}",
            statements[0]
        );
        assert!(
            statements[1].starts_with(&format!(
                "ALTER TABLE \"orders\" ADD COLUMN IF NOT EXISTS \"added\" {sql_type} DEFAULT {default}"
            )),
            "{}",
            statements[1]
        );
    }

    #[tokio::test]
    async fn test_alter_keeps_stored_default() {
        let (service, backend) = in_memory_service().await;
        let database = service.create_database(&alice(), "shop", None).await.unwrap();
        let spec = TableSpec {
            name: "events".to_string(),
            description: None,
            fields: vec![
                FieldSpec::new("at", FieldType::Time).with_default("2024-01-01 00:00:00"),
                FieldSpec::new("seen", FieldType::Time),
            ],
        };
        let table = service.create_table(&alice(), database.id, spec).await.unwrap();
        let fields = service.list_fields(&alice(), table.id, 1, 20).await.unwrap();
        let (at, seen) = (fields.records[3].clone(), fields.records[4].clone());
        backend.clear();

        // Only the descriptions change, the defaults are left out
        let altered = service
            .alter_table(
                &alice(),
                table.id,
                AlterRequest {
                    name: "events".to_string(),
                    description: None,
                    changes: vec![
                        ChangeSetItem::Update {
                            id: at.id,
                            spec: FieldSpec::new("at", FieldType::Time).with_description("When"),
                        },
                        ChangeSetItem::Update {
                            id: seen.id,
                            spec: FieldSpec::new("seen", FieldType::Time)
                                .with_default("")
                                .with_description("Last seen"),
                        },
                    ],
                },
            )
            .await
            .unwrap();
        assert_eq!(altered.name, "events");

        let statements = backend.ddl_statements();
        assert_eq!(
            statements,
            vec![
                "COMMENT ON COLUMN \"events\".\"at\" IS 'When'",
                "COMMENT ON COLUMN \"events\".\"seen\" IS 'Last seen'",
            ]
        );

        let after = service.list_fields(&alice(), table.id, 1, 20).await.unwrap();
        assert_eq!(after.records[3].spec.default_value.as_deref(), Some("2024-01-01 00:00:00"));
        assert_eq!(after.records[4].spec.default_value, seen.spec.default_value);
    }

    #[tokio::test]
    async fn test_import_field_specs() {
        let (service, backend) = in_memory_service().await;

        let specs = service
            .import_field_specs("name,type,required,default,description\nqty,integer,1,,\n".as_bytes())
            .unwrap();
        assert_eq!(specs, vec![FieldSpec::new("qty", FieldType::Integer).required()]);

        let err = service
            .import_field_specs("name,type\nuid,string\n".as_bytes())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = service
            .import_field_specs("name,type\nqty,integer\nqty,string\n".as_bytes())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameCollision);

        let err = service
            .import_field_specs("name,type,required,default\nqty,integer,0,1.5\n".as_bytes())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);

        let err = service.import_field_specs("name,type\n".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let wide: String = (0..21).map(|i| format!("f{i},string\n")).collect();
        let err = service
            .import_field_specs(format!("name,type\n{wide}").as_bytes())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LimitExceeded);

        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_table_without_fields() {
        let (service, backend) = in_memory_service().await;
        let database = service.create_database(&alice(), "shop", None).await.unwrap();
        backend.clear();

        let spec = TableSpec {
            name: "empty".to_string(),
            description: None,
            fields: vec![],
        };
        let err = service
            .create_table(&alice(), database.id, spec)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(err.to_string().contains("at least one field"));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_table() {
        let (service, backend) = in_memory_service().await;
        let database = service.create_database(&alice(), "shop", None).await.unwrap();
        backend.clear();

        let table = service
            .create_table(&alice(), database.id, orders())
            .await
            .unwrap();
        assert_eq!(table.name, "orders");

        let statements = backend.ddl_statements();
        assert!(statements[0].starts_with("CREATE TABLE \"orders\" ("));
        assert!(statements[0].contains("\"qty\" BIGINT NOT NULL DEFAULT 0"));
        assert!(statements[0].contains("\"note\" VARCHAR DEFAULT ''"));
        assert_eq!(statements[1], "COMMENT ON TABLE \"orders\" IS 'Customer orders'");
        assert_eq!(
            statements.last().unwrap(),
            "COMMENT ON COLUMN \"orders\".\"note\" IS 'Free text'"
        );

        let fields = service
            .list_fields(&alice(), table.id, 1, 20)
            .await
            .unwrap();
        assert_eq!(fields.total, 5);
        let names: Vec<_> = fields
            .records
            .iter()
            .map(|f| (f.spec.name.as_str(), f.is_system))
            .collect();
        assert_eq!(
            names,
            vec![
                ("id", true),
                ("uid", true),
                ("create_time", true),
                ("qty", false),
                ("note", false)
            ]
        );
        assert!(!fields.records[1].spec.required);
    }

    #[tokio::test]
    async fn test_create_table_rejected() {
        let (service, backend) = in_memory_service().await;
        let database = service.create_database(&alice(), "shop", None).await.unwrap();
        service
            .create_table(&alice(), database.id, orders())
            .await
            .unwrap();
        backend.clear();

        let err = service
            .create_table(&alice(), database.id, orders())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameCollision);

        let mut duplicated = orders();
        duplicated.name = "other".to_string();
        duplicated
            .fields
            .push(FieldSpec::new("qty", FieldType::String));
        let err = service
            .create_table(&alice(), database.id, duplicated)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameCollision);

        let mut too_wide = orders();
        too_wide.name = "wide".to_string();
        too_wide.fields = (0..21)
            .map(|i| FieldSpec::new(&format!("f{i}"), FieldType::String))
            .collect();
        let err = service
            .create_table(&alice(), database.id, too_wide)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LimitExceeded);

        let mut bad_name = orders();
        bad_name.name = "orders; DROP TABLE x".to_string();
        let err = service
            .create_table(&alice(), database.id, bad_name)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        // Nothing reached the backend
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_table_limit() {
        let (service, _) = in_memory_service().await;
        let database = service.create_database(&alice(), "shop", None).await.unwrap();

        for i in 0..20 {
            let mut spec = orders();
            spec.name = format!("t{i}");
            service.create_table(&alice(), database.id, spec).await.unwrap();
        }

        let err = service
            .create_table(&alice(), database.id, orders())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LimitExceeded);
    }

    #[tokio::test]
    async fn test_alter_table() {
        let (service, backend) = in_memory_service().await;
        let database = service.create_database(&alice(), "shop", None).await.unwrap();
        let table = service
            .create_table(&alice(), database.id, orders())
            .await
            .unwrap();
        let fields = service.list_fields(&alice(), table.id, 1, 20).await.unwrap();
        let qty = fields.records[3].id;
        let note = fields.records[4].id;
        backend.clear();

        let altered = service
            .alter_table(
                &alice(),
                table.id,
                AlterRequest {
                    name: "purchases".to_string(),
                    description: None,
                    changes: vec![
                        ChangeSetItem::Insert(
                            FieldSpec::new("note", FieldType::Integer).with_default("1"),
                        ),
                        ChangeSetItem::Delete { id: note },
                        ChangeSetItem::Update {
                            id: qty,
                            spec: FieldSpec::new("quantity", FieldType::Integer)
                                .required()
                                .with_default("0"),
                        },
                    ],
                },
            )
            .await
            .unwrap();
        assert_eq!(altered.name, "purchases");
        assert_eq!(altered.description, None);

        assert_eq!(
            backend.ddl_statements(),
            vec![
                "ALTER TABLE \"orders\" RENAME TO \"purchases\"",
                "COMMENT ON TABLE \"purchases\" IS NULL",
                "ALTER TABLE \"purchases\" DROP COLUMN IF EXISTS \"note\"",
                "ALTER TABLE \"purchases\" RENAME COLUMN \"qty\" TO \"quantity\"",
                "ALTER TABLE \"purchases\" ADD COLUMN IF NOT EXISTS \"note\" BIGINT DEFAULT 1",
            ]
        );

        let names: Vec<_> = service
            .list_fields(&alice(), table.id, 1, 20)
            .await
            .unwrap()
            .records
            .into_iter()
            .filter(|f| !f.is_system)
            .map(|f| f.spec.name)
            .collect();
        assert_eq!(names, vec!["quantity", "note"]);
    }

    #[tokio::test]
    async fn test_alter_table_rejected() {
        let (service, backend) = in_memory_service().await;
        let database = service.create_database(&alice(), "shop", None).await.unwrap();
        let table = service
            .create_table(&alice(), database.id, orders())
            .await
            .unwrap();
        let fields = service.list_fields(&alice(), table.id, 1, 20).await.unwrap();
        let id_field = fields.records[0].id;
        backend.clear();

        let request = |changes| AlterRequest {
            name: "orders".to_string(),
            description: None,
            changes,
        };

        let err = service
            .alter_table(
                &alice(),
                table.id,
                request(vec![ChangeSetItem::Delete { id: id_field }]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = service
            .alter_table(
                &alice(),
                table.id,
                request(vec![ChangeSetItem::Delete { id: 9999 }]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownField);

        let err = service
            .alter_table(
                &alice(),
                table.id,
                request(vec![ChangeSetItem::Insert(FieldSpec::new(
                    "qty",
                    FieldType::String,
                ))]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameCollision);

        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_drop_table_referenced_by_flow() {
        let (service, backend) = in_memory_service().await;
        let database = service.create_database(&alice(), "shop", None).await.unwrap();
        let table = service
            .create_table(&alice(), database.id, orders())
            .await
            .unwrap();
        service
            .add_flow_reference(&alice(), database.db_id, "orders", "flow-1")
            .await
            .unwrap();

        let err = service.drop_table(&alice(), table.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StillReferenced);

        let err = service
            .delete_database(&alice(), database.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StillReferenced);

        let other = service
            .create_table(
                &alice(),
                database.id,
                TableSpec {
                    name: "scratch".to_string(),
                    description: None,
                    fields: vec![],
                },
            )
            .await
            .unwrap();
        backend.clear();
        service.drop_table(&alice(), other.id).await.unwrap();
        assert_eq!(
            backend.ddl_statements(),
            vec!["DROP TABLE IF EXISTS \"scratch\""]
        );
        assert_eq!(
            service.list_tables(&alice(), database.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_copy_table() {
        let (service, backend) = in_memory_service().await;
        let database = service.create_database(&alice(), "shop", None).await.unwrap();
        let table = service
            .create_table(&alice(), database.id, orders())
            .await
            .unwrap();
        backend.clear();

        let first = service.copy_table(&alice(), table.id).await.unwrap();
        let second = service.copy_table(&alice(), table.id).await.unwrap();
        assert_eq!(first.name, "orders_copy");
        assert_eq!(second.name, "orders_copy2");
        assert_eq!(
            backend.ddl_statements(),
            vec![
                "CREATE TABLE \"orders_copy\" AS SELECT * FROM \"orders\"",
                "CREATE TABLE \"orders_copy2\" AS SELECT * FROM \"orders\"",
            ]
        );

        let tables = service.list_tables(&alice(), database.id).await.unwrap();
        assert_eq!(tables[0].name, "orders_copy2");
        assert_eq!(
            service
                .list_fields(&alice(), second.id, 1, 20)
                .await
                .unwrap()
                .total,
            5
        );
    }
}
