/// Default implementation for a Repository that factors out common
/// query patterns / SQL queries between Postgres and SQLite.
///
/// Usage:
///
/// The struct has to have certain fields, since this macro relies on them:
///
/// ```ignore
/// pub struct MyRepository {
///     pub executor: sqlx::Pool<sqlx::SqlxDatabaseType>
/// }
///
/// impl MyRepository {
///     pub const MIGRATOR: sqlx::Migrator = sqlx::migrate!("my/migrations");
///     pub const QUERIES: RepositoryQueries = RepositoryQueries {
///         search_operator: "LIKE",
///     }
///     pub fn interpret_error(error: sqlx::Error) -> Error {
///         // Interpret the database-specific error code and turn some sqlx errors
///         // into the Error enum values like UniqueConstraintViolation/FKConstraintViolation
///         // ...
///     }
/// }
///
/// implement_repository!(SqliteRepository)
/// ```
///
/// The PG and SQLite bodies are identical apart from `QUERIES`, but a `Pool<Any>` or an
/// implementation generic over `sqlx::Database` runs into borrow checker errors around
/// `QueryBuilder` (https://github.com/launchbadge/sqlx/issues/1978), hence the macro.
/// This also means there's no compile-time query checking.

/// Queries that are different between SQLite and PG
pub struct RepositoryQueries {
    /// Case-insensitive pattern match used by the database search
    pub search_operator: &'static str,
}

/// Wrap a search term into a `LIKE` pattern, escaping the wildcards it contains
pub fn search_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[macro_export]
macro_rules! implement_repository {
    ($repo: ident) => {
#[async_trait]
impl Repository for $repo {
    async fn setup(&self) -> Result<(), Error> {
        $repo::MIGRATOR
            .run(&self.executor)
            .await
            .map_err(|e| Error::SqlxError(e.into()))
    }

    async fn create_database(&self, database: &NewDatabase<'_>) -> Result<DatabaseId, Error> {
        let now = now();
        let id = sqlx::query(
            r#"INSERT INTO database
                (name, description, uid, space_id, app_id, db_id, create_time, update_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING (id)"#,
        )
        .bind(database.name)
        .bind(database.description)
        .bind(database.uid)
        .bind(database.space_id)
        .bind(database.app_id)
        .bind(database.db_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.executor)
        .await
        .map_err($repo::interpret_error)?
        .try_get("id")
        .map_err($repo::interpret_error)?;

        Ok(id)
    }

    async fn get_database(&self, id: DatabaseId) -> Result<Option<DatabaseRecord>, Error> {
        let database = sqlx::query_as(
            r#"SELECT id, name, description, uid, space_id, app_id, db_id, create_time, update_time
            FROM database WHERE id = $1 AND deleted = FALSE"#,
        )
        .bind(id)
        .fetch_optional(&self.executor)
        .await
        .map_err($repo::interpret_error)?;

        Ok(database)
    }

    async fn database_name_exists(&self, owner: Owner<'_>, name: &str) -> Result<bool, Error> {
        let mut builder: QueryBuilder<_> =
            QueryBuilder::new("SELECT COUNT(*) AS count FROM database WHERE deleted = FALSE AND name = ");
        builder.push_bind(name);

        match owner.space_id {
            Some(space_id) => {
                builder.push(" AND space_id = ");
                builder.push_bind(space_id);
            }
            None => {
                builder.push(" AND space_id IS NULL AND uid = ");
                builder.push_bind(owner.uid);
            }
        }

        let count: i64 = builder
            .build()
            .fetch_one(&self.executor)
            .await
            .map_err($repo::interpret_error)?
            .try_get("count")
            .map_err($repo::interpret_error)?;

        Ok(count > 0)
    }

    async fn list_databases(
        &self,
        owner: Owner<'_>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DatabaseRecord>, Error> {
        let mut builder: QueryBuilder<_> = QueryBuilder::new(
            r#"SELECT id, name, description, uid, space_id, app_id, db_id, create_time, update_time
            FROM database WHERE deleted = FALSE"#,
        );

        match owner.space_id {
            Some(space_id) => {
                builder.push(" AND space_id = ");
                builder.push_bind(space_id);
            }
            None => {
                builder.push(" AND space_id IS NULL AND uid = ");
                builder.push_bind(owner.uid);
            }
        }

        if let Some(search) = search {
            let pattern = search_pattern(search);
            builder.push(format!(" AND (name {} ", $repo::QUERIES.search_operator));
            builder.push_bind(pattern.clone());
            builder.push(format!(
                " ESCAPE '\\' OR description {} ",
                $repo::QUERIES.search_operator
            ));
            builder.push_bind(pattern);
            builder.push(" ESCAPE '\\')");
        }

        builder.push(" ORDER BY create_time DESC, id DESC LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let databases = builder
            .build_query_as()
            .fetch(&self.executor)
            .try_collect()
            .await
            .map_err($repo::interpret_error)?;

        Ok(databases)
    }

    async fn count_databases(
        &self,
        owner: Owner<'_>,
        search: Option<&str>,
    ) -> Result<i64, Error> {
        let mut builder: QueryBuilder<_> =
            QueryBuilder::new("SELECT COUNT(*) AS count FROM database WHERE deleted = FALSE");

        match owner.space_id {
            Some(space_id) => {
                builder.push(" AND space_id = ");
                builder.push_bind(space_id);
            }
            None => {
                builder.push(" AND space_id IS NULL AND uid = ");
                builder.push_bind(owner.uid);
            }
        }

        if let Some(search) = search {
            let pattern = search_pattern(search);
            builder.push(format!(" AND (name {} ", $repo::QUERIES.search_operator));
            builder.push_bind(pattern.clone());
            builder.push(format!(
                " ESCAPE '\\' OR description {} ",
                $repo::QUERIES.search_operator
            ));
            builder.push_bind(pattern);
            builder.push(" ESCAPE '\\')");
        }

        let count = builder
            .build()
            .fetch_one(&self.executor)
            .await
            .map_err($repo::interpret_error)?
            .try_get("count")
            .map_err($repo::interpret_error)?;

        Ok(count)
    }

    async fn update_database_description(
        &self,
        id: DatabaseId,
        description: &str,
    ) -> Result<(), Error> {
        sqlx::query("UPDATE database SET description = $1, update_time = $2 WHERE id = $3")
            .bind(description)
            .bind(now())
            .bind(id)
            .execute(&self.executor)
            .await
            .map_err($repo::interpret_error)?;

        Ok(())
    }

    async fn delete_database(&self, id: DatabaseId) -> Result<(), Error> {
        let now = now();
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        sqlx::query("UPDATE database SET deleted = TRUE, update_time = $1 WHERE id = $2")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;

        sqlx::query(
            "UPDATE db_table SET deleted = TRUE, update_time = $1 WHERE database_id = $2 AND deleted = FALSE",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn copy_database(
        &self,
        source_id: DatabaseId,
        target: &NewDatabase<'_>,
    ) -> Result<DatabaseId, Error> {
        let now = now();
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        let new_database_id: DatabaseId = sqlx::query(
            r#"INSERT INTO database
                (name, description, uid, space_id, app_id, db_id, create_time, update_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING (id)"#,
        )
        .bind(target.name)
        .bind(target.description)
        .bind(target.uid)
        .bind(target.space_id)
        .bind(target.app_id)
        .bind(target.db_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err($repo::interpret_error)?
        .try_get("id")
        .map_err($repo::interpret_error)?;

        let tables: Vec<TableRecord> = sqlx::query_as(
            r#"SELECT id, database_id, name, description, create_time, update_time
            FROM db_table WHERE database_id = $1 AND deleted = FALSE ORDER BY id"#,
        )
        .bind(source_id)
        .fetch_all(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        for table in tables {
            let new_table_id: TableId = sqlx::query(
                r#"INSERT INTO db_table (database_id, name, description, create_time, update_time)
                VALUES ($1, $2, $3, $4, $5) RETURNING (id)"#,
            )
            .bind(new_database_id)
            .bind(&table.name)
            .bind(&table.description)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err($repo::interpret_error)?
            .try_get("id")
            .map_err($repo::interpret_error)?;

            sqlx::query(
                r#"INSERT INTO table_field
                    (table_id, name, type, description, default_value, is_required, is_system, create_time)
                SELECT $1, name, type, description, default_value, is_required, is_system, $2
                FROM table_field WHERE table_id = $3 ORDER BY id"#,
            )
            .bind(new_table_id)
            .bind(now)
            .bind(table.id)
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;
        }

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(new_database_id)
    }

    async fn count_tables(&self, database_id: DatabaseId) -> Result<i64, Error> {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM db_table WHERE database_id = $1 AND deleted = FALSE",
        )
        .bind(database_id)
        .fetch_one(&self.executor)
        .await
        .map_err($repo::interpret_error)?
        .try_get("count")
        .map_err($repo::interpret_error)?;

        Ok(count)
    }

    async fn table_name_exists(
        &self,
        database_id: DatabaseId,
        name: &str,
        exclude: Option<TableId>,
    ) -> Result<bool, Error> {
        let mut builder: QueryBuilder<_> = QueryBuilder::new(
            "SELECT COUNT(*) AS count FROM db_table WHERE deleted = FALSE AND database_id = ",
        );
        builder.push_bind(database_id);
        builder.push(" AND name = ");
        builder.push_bind(name);

        if let Some(table_id) = exclude {
            builder.push(" AND id <> ");
            builder.push_bind(table_id);
        }

        let count: i64 = builder
            .build()
            .fetch_one(&self.executor)
            .await
            .map_err($repo::interpret_error)?
            .try_get("count")
            .map_err($repo::interpret_error)?;

        Ok(count > 0)
    }

    async fn create_table(
        &self,
        database_id: DatabaseId,
        name: &str,
        description: Option<&str>,
        fields: &[NewField],
    ) -> Result<TableId, Error> {
        let now = now();
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        let table_id: TableId = sqlx::query(
            r#"INSERT INTO db_table (database_id, name, description, create_time, update_time)
            VALUES ($1, $2, $3, $4, $5) RETURNING (id)"#,
        )
        .bind(database_id)
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err($repo::interpret_error)?
        .try_get("id")
        .map_err($repo::interpret_error)?;

        if !fields.is_empty() {
            let mut builder: QueryBuilder<_> = QueryBuilder::new(
                "INSERT INTO table_field \
                (table_id, name, type, description, default_value, is_required, is_system, create_time) ",
            );
            builder.push_values(fields, |mut b, field| {
                b.push_bind(table_id)
                    .push_bind(field.spec.name.as_str())
                    .push_bind(field.spec.field_type.as_str())
                    .push_bind(field.spec.description.as_deref())
                    .push_bind(field.spec.default_value.as_deref())
                    .push_bind(field.spec.required)
                    .push_bind(field.is_system)
                    .push_bind(now);
            });

            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err($repo::interpret_error)?;
        }

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(table_id)
    }

    async fn get_table(&self, id: TableId) -> Result<Option<TableRecord>, Error> {
        let table = sqlx::query_as(
            r#"SELECT id, database_id, name, description, create_time, update_time
            FROM db_table WHERE id = $1 AND deleted = FALSE"#,
        )
        .bind(id)
        .fetch_optional(&self.executor)
        .await
        .map_err($repo::interpret_error)?;

        Ok(table)
    }

    async fn find_table_by_name(
        &self,
        db_id: BackendDatabaseId,
        name: &str,
    ) -> Result<Option<TableRecord>, Error> {
        let table = sqlx::query_as(
            r#"SELECT
                db_table.id, db_table.database_id, db_table.name, db_table.description,
                db_table.create_time, db_table.update_time
            FROM db_table
            INNER JOIN database ON database.id = db_table.database_id
            WHERE database.db_id = $1 AND database.deleted = FALSE
                AND db_table.name = $2 AND db_table.deleted = FALSE
            ORDER BY db_table.id DESC"#,
        )
        .bind(db_id)
        .bind(name)
        .fetch_optional(&self.executor)
        .await
        .map_err($repo::interpret_error)?;

        Ok(table)
    }

    async fn list_tables(&self, database_id: DatabaseId) -> Result<Vec<TableRecord>, Error> {
        let tables = sqlx::query_as(
            r#"SELECT id, database_id, name, description, create_time, update_time
            FROM db_table WHERE database_id = $1 AND deleted = FALSE
            ORDER BY create_time DESC, id DESC"#,
        )
        .bind(database_id)
        .fetch(&self.executor)
        .try_collect()
        .await
        .map_err($repo::interpret_error)?;

        Ok(tables)
    }

    async fn get_fields(&self, table_id: TableId) -> Result<Vec<FieldRecord>, Error> {
        let fields = sqlx::query_as(
            r#"SELECT id, table_id, name, type, description, default_value, is_required, is_system, create_time
            FROM table_field WHERE table_id = $1 ORDER BY id"#,
        )
        .bind(table_id)
        .fetch(&self.executor)
        .try_collect()
        .await
        .map_err($repo::interpret_error)?;

        Ok(fields)
    }

    async fn list_fields(
        &self,
        table_id: TableId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FieldRecord>, Error> {
        let fields = sqlx::query_as(
            r#"SELECT id, table_id, name, type, description, default_value, is_required, is_system, create_time
            FROM table_field WHERE table_id = $1 ORDER BY id LIMIT $2 OFFSET $3"#,
        )
        .bind(table_id)
        .bind(limit)
        .bind(offset)
        .fetch(&self.executor)
        .try_collect()
        .await
        .map_err($repo::interpret_error)?;

        Ok(fields)
    }

    async fn count_fields(&self, table_id: TableId) -> Result<i64, Error> {
        let count = sqlx::query("SELECT COUNT(*) AS count FROM table_field WHERE table_id = $1")
            .bind(table_id)
            .fetch_one(&self.executor)
            .await
            .map_err($repo::interpret_error)?
            .try_get("count")
            .map_err($repo::interpret_error)?;

        Ok(count)
    }

    async fn alter_table(
        &self,
        table_id: TableId,
        name: &str,
        description: Option<&str>,
        changes: &[ChangeSetItem],
    ) -> Result<(), Error> {
        let now = now();
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        sqlx::query(
            "UPDATE db_table SET name = $1, description = $2, update_time = $3 WHERE id = $4",
        )
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(table_id)
        .execute(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        for change in changes.iter().sorted_by_key(|c| c.execution_order()) {
            match change {
                ChangeSetItem::Delete { id } => {
                    sqlx::query("DELETE FROM table_field WHERE id = $1 AND table_id = $2")
                        .bind(*id)
                        .bind(table_id)
                        .execute(&mut *tx)
                        .await
                        .map_err($repo::interpret_error)?;
                }
                ChangeSetItem::Update { id, spec } => {
                    sqlx::query(
                        r#"UPDATE table_field
                        SET name = $1, type = $2, description = $3, default_value = $4, is_required = $5
                        WHERE id = $6 AND table_id = $7"#,
                    )
                    .bind(spec.name.as_str())
                    .bind(spec.field_type.as_str())
                    .bind(spec.description.as_deref())
                    .bind(spec.default_value.as_deref())
                    .bind(spec.required)
                    .bind(*id)
                    .bind(table_id)
                    .execute(&mut *tx)
                    .await
                    .map_err($repo::interpret_error)?;
                }
                ChangeSetItem::Insert(spec) => {
                    sqlx::query(
                        r#"INSERT INTO table_field
                            (table_id, name, type, description, default_value, is_required, is_system, create_time)
                        VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7)"#,
                    )
                    .bind(table_id)
                    .bind(spec.name.as_str())
                    .bind(spec.field_type.as_str())
                    .bind(spec.description.as_deref())
                    .bind(spec.default_value.as_deref())
                    .bind(spec.required)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err($repo::interpret_error)?;
                }
            }
        }

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn drop_table(&self, table_id: TableId) -> Result<(), Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        sqlx::query("UPDATE db_table SET deleted = TRUE, update_time = $1 WHERE id = $2")
            .bind(now())
            .bind(table_id)
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;

        sqlx::query("DELETE FROM table_field WHERE table_id = $1")
            .bind(table_id)
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn copy_table(&self, table_id: TableId, new_name: &str) -> Result<TableId, Error> {
        let now = now();
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        let new_table_id: TableId = sqlx::query(
            r#"INSERT INTO db_table (database_id, name, description, create_time, update_time)
            SELECT database_id, $1, description, $2, $3 FROM db_table WHERE id = $4
            RETURNING (id)"#,
        )
        .bind(new_name)
        .bind(now)
        .bind(now)
        .bind(table_id)
        .fetch_one(&mut *tx)
        .await
        .map_err($repo::interpret_error)?
        .try_get("id")
        .map_err($repo::interpret_error)?;

        sqlx::query(
            r#"INSERT INTO table_field
                (table_id, name, type, description, default_value, is_required, is_system, create_time)
            SELECT $1, name, type, description, default_value, is_required, is_system, $2
            FROM table_field WHERE table_id = $3 ORDER BY id"#,
        )
        .bind(new_table_id)
        .bind(now)
        .bind(table_id)
        .execute(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(new_table_id)
    }

    async fn add_flow_reference(
        &self,
        flow_id: &str,
        db_id: BackendDatabaseId,
        table_id: TableId,
    ) -> Result<FlowReferenceId, Error> {
        let id = sqlx::query(
            r#"INSERT INTO flow_db_rel (flow_id, db_id, table_id, create_time)
            VALUES ($1, $2, $3, $4) RETURNING (id)"#,
        )
        .bind(flow_id)
        .bind(db_id)
        .bind(table_id)
        .bind(now())
        .fetch_one(&self.executor)
        .await
        .map_err($repo::interpret_error)?
        .try_get("id")
        .map_err($repo::interpret_error)?;

        Ok(id)
    }

    async fn count_database_references(&self, db_id: BackendDatabaseId) -> Result<i64, Error> {
        let count = sqlx::query("SELECT COUNT(*) AS count FROM flow_db_rel WHERE db_id = $1")
            .bind(db_id)
            .fetch_one(&self.executor)
            .await
            .map_err($repo::interpret_error)?
            .try_get("count")
            .map_err($repo::interpret_error)?;

        Ok(count)
    }

    async fn count_table_references(&self, table_id: TableId) -> Result<i64, Error> {
        let count = sqlx::query("SELECT COUNT(*) AS count FROM flow_db_rel WHERE table_id = $1")
            .bind(table_id)
            .fetch_one(&self.executor)
            .await
            .map_err($repo::interpret_error)?
            .try_get("count")
            .map_err($repo::interpret_error)?;

        Ok(count)
    }
}

    };
}
