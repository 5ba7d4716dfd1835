use std::{fmt::Debug, str::FromStr, time::Duration};

use async_trait::async_trait;
use futures::TryStreamExt;
use itertools::Itertools;
use sqlx::{
    migrate::{MigrateDatabase, Migrator},
    postgres::{PgConnectOptions, PgPoolOptions},
    Executor, PgPool, Postgres, QueryBuilder, Row,
};
use tracing::info;

use crate::{
    data_types::{now, BackendDatabaseId, DatabaseId, FlowReferenceId, TableId},
    implement_repository,
    schema::ChangeSetItem,
    sql::{naming::is_valid_identifier, render::quote_identifier},
};

use super::{
    default::{search_pattern, RepositoryQueries},
    interface::{
        DatabaseRecord, Error, FieldRecord, NewDatabase, NewField, Owner, Repository, Result,
        TableRecord,
    },
};

const MAX_CONNECTIONS: u32 = 16;
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Catalog kept in a dedicated schema of a PostgreSQL database
#[derive(Debug)]
pub struct PostgresRepository {
    pub executor: PgPool,
    pub schema_name: String,
}

impl PostgresRepository {
    pub const MIGRATOR: Migrator = sqlx::migrate!("migrations/postgres");
    pub const QUERIES: RepositoryQueries = RepositoryQueries {
        search_operator: "ILIKE",
    };

    /// Connect to the catalog, creating the database and the schema when they
    /// don't exist yet, and bring the schema up to date
    pub async fn try_new(
        dsn: String,
        schema_name: String,
    ) -> std::result::Result<Self, sqlx::Error> {
        if !is_valid_identifier(&schema_name) {
            return Err(sqlx::Error::Configuration(
                format!("invalid catalog schema name {schema_name:?}").into(),
            ));
        }

        if !Postgres::database_exists(&dsn).await? {
            info!("Creating the catalog database");
            Postgres::create_database(&dsn).await?;
        }

        let repo = Self::connect(&dsn, &schema_name).await?;
        repo.executor
            .execute(
                format!(
                    "CREATE SCHEMA IF NOT EXISTS {}",
                    quote_identifier(&schema_name)
                )
                .as_str(),
            )
            .await?;

        repo.setup().await.map_err(Error::into_inner)?;
        Ok(repo)
    }

    /// Open a pool whose connections resolve catalog tables in `schema_name`
    pub async fn connect(
        dsn: &str,
        schema_name: &str,
    ) -> std::result::Result<Self, sqlx::Error> {
        let options = PgConnectOptions::from_str(dsn)?
            .options([("search_path", format!("{schema_name},public"))]);

        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(MAX_CONNECTIONS)
            .idle_timeout(IDLE_TIMEOUT)
            .test_before_acquire(true)
            .connect_with(options)
            .await?;

        Ok(Self {
            executor: pool,
            schema_name: schema_name.to_string(),
        })
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        // Reference: https://www.postgresql.org/docs/current/errcodes-appendix.html
        let code = match &error {
            sqlx::Error::Database(d) => d.code().map(|c| c.into_owned()),
            _ => None,
        };
        match code.as_deref() {
            Some("23505") => Error::UniqueConstraintViolation(error),
            Some("23503") => Error::FKConstraintViolation(error),
            _ => Error::SqlxError(error),
        }
    }
}

implement_repository!(PostgresRepository);

pub mod testutils {
    use rand::{distributions::Uniform, Rng};

    use super::PostgresRepository;

    /// A throwaway schema name, so that test runs never see each other's catalog
    pub fn get_random_schema() -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(Uniform::new_inclusive(b'a', b'z'))
            .take(12)
            .map(char::from)
            .collect();
        format!("userdb_test_{suffix}")
    }

    pub async fn make_repository(dsn: &str) -> PostgresRepository {
        PostgresRepository::try_new(dsn.to_string(), get_random_schema())
            .await
            .expect("Error setting up the catalog")
    }
}
