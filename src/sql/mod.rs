//! Pure SQL generation: nothing in here talks to the catalog or the backend.

pub mod ddl;
pub mod dml;
pub mod naming;
pub mod render;
pub mod split;

pub use ddl::{DdlOperation, StatementBlob};
pub use dml::{DmlStatement, OperationKind};
pub use render::{quote_identifier, quote_literal, reject_unsafe, require_integer, SqlValue};
pub use split::split;
