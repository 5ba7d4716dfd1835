use std::sync::Arc;

#[cfg(feature = "catalog-postgres")]
use crate::repository::postgres::PostgresRepository;
use crate::{
    backend::{ExecutionBackend, HttpBackend},
    error::Result,
    repository::{interface::Repository, sqlite::SqliteRepository},
    service::DatabaseService,
};

use super::schema;

pub async fn build_repository(config: &schema::Catalog) -> Result<Arc<dyn Repository>> {
    let repository: Arc<dyn Repository> = match config {
        #[cfg(feature = "catalog-postgres")]
        schema::Catalog::Postgres(schema::Postgres { dsn, schema }) => Arc::new(
            PostgresRepository::try_new(dsn.to_string(), schema.to_string()).await?,
        ),
        schema::Catalog::Sqlite(schema::Sqlite { dsn }) => {
            Arc::new(SqliteRepository::try_new(dsn.to_string()).await?)
        }
    };
    Ok(repository)
}

/// Wire up the catalog, the execution backend and the service from a config
pub async fn build_service(config: &schema::UserDbConfig) -> Result<DatabaseService> {
    let repository = build_repository(&config.catalog).await?;
    let backend: Arc<dyn ExecutionBackend> = Arc::new(HttpBackend::new(&config.backend)?);

    Ok(DatabaseService::new(
        repository,
        backend,
        config.limits.clone(),
        config.import.clone(),
    )
    .with_app_id(&config.backend.app_id))
}
