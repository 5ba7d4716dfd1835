pub mod executor;
pub mod file;

pub use executor::{BatchImporter, ImportSummary, RowFailure};
