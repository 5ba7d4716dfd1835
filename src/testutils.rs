use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::backend::{DmlOutcome, ExecutionBackend, ExecutionMode, OperationKind};
use crate::config::schema::{Import, Limits};
use crate::context::RequestContext;
use crate::data_types::BackendDatabaseId;
use crate::error::{Error, Result};
use crate::repository::sqlite::SqliteRepository;
use crate::schema::Row;
use crate::service::DatabaseService;

/// First identifier handed out for a backend database
const FIRST_DB_ID: BackendDatabaseId = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateDatabase {
        name: String,
    },
    ModifyDatabase {
        db_id: BackendDatabaseId,
        description: String,
    },
    DropDatabase {
        db_id: BackendDatabaseId,
    },
    CloneDatabase {
        db_id: BackendDatabaseId,
        new_name: String,
    },
    Ddl {
        db_id: BackendDatabaseId,
        statement: String,
    },
    Dml {
        db_id: BackendDatabaseId,
        statement: String,
        kind: OperationKind,
        mode: ExecutionMode,
    },
}

/// An execution backend that records every call instead of running it.
///
/// SELECTs return the canned rows (and COUNTs their number). Failures can be
/// injected for statements containing some text, or for the next few DML calls.
#[derive(Debug)]
pub struct RecordingBackend {
    calls: Mutex<Vec<BackendCall>>,
    rows: Mutex<Vec<Row>>,
    failing_needles: Mutex<Vec<String>>,
    transient_failures: AtomicUsize,
    next_db_id: AtomicI64,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self {
            calls: Mutex::new(vec![]),
            rows: Mutex::new(vec![]),
            failing_needles: Mutex::new(vec![]),
            transient_failures: AtomicUsize::new(0),
            next_db_id: AtomicI64::new(FIRST_DB_ID),
        }
    }
}

impl RecordingBackend {
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn ddl_statements(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Ddl { statement, .. } => Some(statement),
                _ => None,
            })
            .collect()
    }

    pub fn dml_statements(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Dml { statement, .. } => Some(statement),
                _ => None,
            })
            .collect()
    }

    pub fn set_rows(&self, rows: Vec<Row>) {
        *self.rows.lock().unwrap() = rows;
    }

    /// Fail every statement that contains `needle`
    pub fn fail_statements_containing(&self, needle: &str) {
        self.failing_needles.lock().unwrap().push(needle.to_string());
    }

    /// Fail the next `count` DML calls, whatever they are
    pub fn fail_next_dml(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_statement(&self, statement: &str) -> Result<()> {
        let needles = self.failing_needles.lock().unwrap();
        match needles.iter().find(|n| statement.contains(n.as_str())) {
            Some(needle) => Err(Error::BackendExecutionFailure {
                reason: format!("statement contains {needle:?}"),
            }),
            None => Ok(()),
        }
    }

    fn new_db_id(&self) -> BackendDatabaseId {
        self.next_db_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionBackend for RecordingBackend {
    async fn create_database(
        &self,
        _context: &RequestContext,
        name: &str,
        _description: Option<&str>,
    ) -> Result<BackendDatabaseId> {
        self.record(BackendCall::CreateDatabase {
            name: name.to_string(),
        });
        Ok(self.new_db_id())
    }

    async fn modify_database(
        &self,
        _context: &RequestContext,
        database_id: BackendDatabaseId,
        description: &str,
    ) -> Result<()> {
        self.record(BackendCall::ModifyDatabase {
            db_id: database_id,
            description: description.to_string(),
        });
        Ok(())
    }

    async fn drop_database(
        &self,
        _context: &RequestContext,
        database_id: BackendDatabaseId,
    ) -> Result<()> {
        self.record(BackendCall::DropDatabase { db_id: database_id });
        Ok(())
    }

    async fn clone_database(
        &self,
        _context: &RequestContext,
        database_id: BackendDatabaseId,
        new_name: &str,
    ) -> Result<BackendDatabaseId> {
        self.record(BackendCall::CloneDatabase {
            db_id: database_id,
            new_name: new_name.to_string(),
        });
        Ok(self.new_db_id())
    }

    async fn execute_ddl(
        &self,
        _context: &RequestContext,
        database_id: BackendDatabaseId,
        statement: &str,
    ) -> Result<()> {
        self.record(BackendCall::Ddl {
            db_id: database_id,
            statement: statement.to_string(),
        });
        self.check_statement(statement)
    }

    async fn execute_dml(
        &self,
        _context: &RequestContext,
        database_id: BackendDatabaseId,
        statement: &str,
        kind: OperationKind,
        mode: ExecutionMode,
    ) -> Result<DmlOutcome> {
        self.record(BackendCall::Dml {
            db_id: database_id,
            statement: statement.to_string(),
            kind,
            mode,
        });

        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(Error::BackendExecutionFailure {
                reason: "connection reset".to_string(),
            });
        }
        self.check_statement(statement)?;

        let rows = self.rows.lock().unwrap().clone();
        Ok(match kind {
            OperationKind::Select => DmlOutcome::Rows(rows),
            OperationKind::Count => DmlOutcome::Count(rows.len() as i64),
            OperationKind::Insert | OperationKind::Update | OperationKind::Delete => {
                DmlOutcome::Count(1)
            }
        })
    }
}

/// A service over an in-memory SQLite catalog and a recording backend
pub async fn in_memory_service() -> (DatabaseService, Arc<RecordingBackend>) {
    let repository = SqliteRepository::try_new("sqlite::memory:".to_string())
        .await
        .expect("Error setting up the in-memory catalog");
    let backend = Arc::new(RecordingBackend::default());

    let service = DatabaseService::new(
        Arc::new(repository),
        backend.clone(),
        Limits::default(),
        Import::default(),
    );
    (service, backend)
}
