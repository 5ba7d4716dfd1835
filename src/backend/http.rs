use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::backend::{DmlOutcome, ExecutionBackend, ExecutionMode, OperationKind};
use crate::config::schema;
use crate::context::RequestContext;
use crate::data_types::BackendDatabaseId;
use crate::error::{Error, Result};
use crate::schema::{Row, ID_FIELD, UID_FIELD};

pub const TENANT_HEADER: &str = "X-Consumer-Username";

/// `{code, message, data}` envelope every endpoint answers with
#[derive(Debug, Deserialize)]
struct ApiResult {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

fn failure(reason: impl Into<String>) -> Error {
    Error::BackendExecutionFailure {
        reason: reason.into(),
    }
}

/// The backend stores row owners as `<app>:<uid>`; callers only care about
/// the last part. Ids are returned as text so that they survive clients that
/// can't represent 64-bit integers.
fn normalize_row(mut row: Row) -> Row {
    if let Some(Value::String(uid)) = row.get(UID_FIELD) {
        let short = uid.rsplit(':').next().unwrap_or_default().to_string();
        row.insert(UID_FIELD.to_string(), Value::String(short));
    }
    if let Some(id) = row.get(ID_FIELD) {
        let text = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        row.insert(ID_FIELD.to_string(), Value::String(text));
    }
    row
}

fn exec_success(data: &Value) -> Result<&Vec<Value>> {
    data.get("exec_success")
        .and_then(Value::as_array)
        .ok_or_else(|| failure("response has no exec_success list"))
}

#[derive(Debug)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    tenant_id: String,
    app_id: String,
}

impl HttpBackend {
    pub fn new(config: &schema::Backend) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .and_then(|url| url.join(&format!("{}/", config.path_prefix.trim_end_matches('/'))))
            .map_err(|e| Error::invalid(format!("invalid backend URL: {e}")))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            tenant_id: config.tenant_id.clone(),
            app_id: config.app_id.clone(),
        })
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<Value> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| Error::internal(e.to_string()))?;
        debug!("POST {url}: {body}");

        let response = self
            .client
            .post(url)
            .header(TENANT_HEADER, &self.tenant_id)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Backend call {endpoint} returned HTTP {status}");
            return Err(failure(format!("{endpoint} returned HTTP {status}")));
        }

        let result: ApiResult = response.json().await?;
        if result.code != 0 {
            warn!(
                "Backend call {endpoint} failed with code {}: {}",
                result.code, result.message
            );
            return Err(failure(result.message));
        }
        Ok(result.data)
    }

    fn scoped(context: &RequestContext, mut body: Value) -> Value {
        if let (Some(space_id), Value::Object(map)) = (context.space_id, &mut body) {
            map.insert("space_id".to_string(), Value::String(space_id.to_string()));
        }
        body
    }

    fn database_id(data: &Value) -> Result<BackendDatabaseId> {
        data.get("database_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| failure("response has no database_id"))
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    async fn create_database(
        &self,
        context: &RequestContext,
        name: &str,
        description: Option<&str>,
    ) -> Result<BackendDatabaseId> {
        let body = Self::scoped(
            context,
            json!({
                "database_name": name,
                "uid": context.uid,
                "description": description,
            }),
        );
        let data = self.post("create_database", body).await?;
        Self::database_id(&data)
    }

    async fn modify_database(
        &self,
        context: &RequestContext,
        database_id: BackendDatabaseId,
        description: &str,
    ) -> Result<()> {
        let body = json!({
            "database_id": database_id,
            "uid": context.uid,
            "description": description,
        });
        self.post("modify_db_description", body).await?;
        Ok(())
    }

    async fn drop_database(
        &self,
        context: &RequestContext,
        database_id: BackendDatabaseId,
    ) -> Result<()> {
        let body = json!({
            "database_id": database_id,
            "uid": context.uid,
        });
        self.post("drop_database", body).await?;
        Ok(())
    }

    async fn clone_database(
        &self,
        context: &RequestContext,
        database_id: BackendDatabaseId,
        new_name: &str,
    ) -> Result<BackendDatabaseId> {
        let body = json!({
            "database_id": database_id,
            "uid": context.uid,
            "new_database_name": new_name,
        });
        let data = self.post("clone_database", body).await?;
        Self::database_id(&data)
    }

    async fn execute_ddl(
        &self,
        context: &RequestContext,
        database_id: BackendDatabaseId,
        statement: &str,
    ) -> Result<()> {
        let body = Self::scoped(
            context,
            json!({
                "database_id": database_id,
                "uid": context.uid,
                "ddl": statement,
            }),
        );
        self.post("exec_ddl", body).await?;
        Ok(())
    }

    async fn execute_dml(
        &self,
        context: &RequestContext,
        database_id: BackendDatabaseId,
        statement: &str,
        kind: OperationKind,
        mode: ExecutionMode,
    ) -> Result<DmlOutcome> {
        let body = Self::scoped(
            context,
            json!({
                "app_id": self.app_id,
                "database_id": database_id,
                "uid": context.uid,
                "dml": statement,
                "env": mode,
            }),
        );
        let data = self.post("exec_dml", body).await?;

        match kind {
            OperationKind::Select => {
                let rows = exec_success(&data)?
                    .iter()
                    .map(|item| match item {
                        Value::Object(row) => Ok(normalize_row(row.clone())),
                        _ => Err(failure("exec_success entry is not an object")),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(DmlOutcome::Rows(rows))
            }
            OperationKind::Count => {
                let count = exec_success(&data)?
                    .first()
                    .and_then(|row| row.get("count"))
                    .and_then(|count| match count {
                        Value::Number(n) => n.as_i64(),
                        Value::String(s) => s.parse().ok(),
                        _ => None,
                    })
                    .ok_or_else(|| failure("count response has no count"))?;
                Ok(DmlOutcome::Count(count))
            }
            OperationKind::Insert | OperationKind::Update | OperationKind::Delete => {
                let affected = data
                    .get("exec_success")
                    .and_then(Value::as_array)
                    .map(|rows| rows.len() as i64)
                    .unwrap_or_default();
                Ok(DmlOutcome::Count(affected))
            }
        }
    }
}
