pub mod backend;
pub mod config;
pub mod context;
pub mod data_types;
pub mod error;
pub mod import;
pub mod repository;
pub mod schema;
pub mod service;
pub mod sql;

// Needs to be public (not cfg(test)) so that the integration tests can use the
// recording backend and the in-memory service builder.
pub mod testutils;

extern crate lazy_static;
