use std::fmt;
use std::future::Future;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::schema::Row;
use crate::sql::render::reject_unsafe;

/// Failures listed in an error message; the rest are only counted
const MAX_REPORTED_FAILURES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    /// Zero-based position of the row in the input
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub success: usize,
    pub failed: usize,
    /// Ordered by row index
    pub errors: Vec<RowFailure>,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} row(s) imported, {} row(s) failed",
            self.success, self.failed
        )?;
        for failure in self.errors.iter().take(MAX_REPORTED_FAILURES) {
            write!(f, "\n  row {}: {}", failure.index, failure.message)?;
        }
        if self.errors.len() > MAX_REPORTED_FAILURES {
            write!(
                f,
                "\n  ... and {} more",
                self.errors.len() - MAX_REPORTED_FAILURES
            )?;
        }
        Ok(())
    }
}

/// Applies a row set in fixed-size chunks, retrying rows whose execution
/// failed on the backend. A failing chunk never stops the ones after it.
#[derive(Debug, Clone)]
pub struct BatchImporter {
    chunk_size: usize,
    max_retries: usize,
}

impl BatchImporter {
    pub fn new(chunk_size: usize, max_retries: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_retries,
        }
    }

    pub async fn execute_in_chunks<C, E, F>(
        &self,
        rows: &[Row],
        mut compile: C,
        mut execute: E,
    ) -> ImportSummary
    where
        C: FnMut(&Row) -> Result<String>,
        E: FnMut(String) -> F,
        F: Future<Output = Result<()>>,
    {
        let mut summary = ImportSummary::default();

        for (chunk_number, chunk) in rows.chunks(self.chunk_size).enumerate() {
            let first_index = chunk_number * self.chunk_size;
            let mut failures = Vec::new();
            let mut pending = Vec::with_capacity(chunk.len());

            // Compile errors are deterministic: record them without ever retrying
            for (offset, row) in chunk.iter().enumerate() {
                let index = first_index + offset;
                match compile(row).and_then(|statement| {
                    reject_unsafe(&statement)?;
                    Ok(statement)
                }) {
                    Ok(statement) => pending.push((index, statement)),
                    Err(e) => failures.push(RowFailure {
                        index,
                        message: e.to_string(),
                    }),
                }
            }

            let mut attempt = 0;
            while !pending.is_empty() {
                let mut retry = Vec::new();
                for (index, statement) in pending {
                    match execute(statement.clone()).await {
                        Ok(()) => summary.success += 1,
                        Err(e) if e.is_retryable() && attempt < self.max_retries => {
                            debug!("Row {index} failed on attempt {attempt}: {e}");
                            retry.push((index, statement));
                        }
                        Err(e) => failures.push(RowFailure {
                            index,
                            message: e.to_string(),
                        }),
                    }
                }

                if !retry.is_empty() {
                    attempt += 1;
                    warn!(
                        "Retrying {} row(s) of chunk {chunk_number} (attempt {attempt} of {})",
                        retry.len(),
                        self.max_retries
                    );
                }
                pending = retry;
            }

            failures.sort_by_key(|f| f.index);
            info!(
                "Chunk {chunk_number}: {} row(s), {} failure(s)",
                chunk.len(),
                failures.len()
            );
            summary.failed += failures.len();
            summary.errors.extend(failures);
        }

        summary
    }
}
