use std::{fmt::Debug, str::FromStr};

use async_trait::async_trait;
use futures::TryStreamExt;
use itertools::Itertools;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, QueryBuilder, Row, Sqlite,
};

use crate::{
    data_types::{now, BackendDatabaseId, DatabaseId, FlowReferenceId, TableId},
    schema::ChangeSetItem,
};

use crate::implement_repository;

use super::{
    default::{search_pattern, RepositoryQueries},
    interface::{
        DatabaseRecord, Error, FieldRecord, NewDatabase, NewField, Owner, Repository, Result,
        TableRecord,
    },
};

#[derive(Debug)]
pub struct SqliteRepository {
    pub executor: Pool<Sqlite>,
}

impl SqliteRepository {
    pub const MIGRATOR: Migrator = sqlx::migrate!("migrations/sqlite");
    pub const QUERIES: RepositoryQueries = RepositoryQueries {
        // LIKE is already case-insensitive for ASCII in SQLite
        search_operator: "LIKE",
    };

    pub async fn try_new(dsn: String) -> std::result::Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&dsn)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `sqlite::memory:` gets its own database, so the pool
        // has to stick to a single one that never expires.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let repo = Self { executor: pool };
        repo.setup().await.map_err(Error::into_inner)?;
        Ok(repo)
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        // Extended result codes, see https://www.sqlite.org/rescode.html
        const UNIQUE: [&str; 2] = ["1555", "2067"];
        const FOREIGN_KEY: &str = "787";

        let (code, message) = match &error {
            sqlx::Error::Database(d) => (d.code().map(|c| c.into_owned()), d.message().to_string()),
            _ => (None, String::new()),
        };
        match code.as_deref() {
            Some(c) if UNIQUE.contains(&c) => Error::UniqueConstraintViolation(error),
            Some(FOREIGN_KEY) => Error::FKConstraintViolation(error),
            // Deferred foreign key checks only report the primary code
            _ if message.contains("FOREIGN KEY constraint failed") => {
                Error::FKConstraintViolation(error)
            }
            _ => Error::SqlxError(error),
        }
    }
}

implement_repository!(SqliteRepository);
