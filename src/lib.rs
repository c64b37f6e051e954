pub mod catalog;
pub mod cli;
pub mod config;
pub mod context;
pub mod data_types;
pub mod frontend;
pub mod index;
pub mod ingest;
pub mod repository;
pub mod router;
pub mod schema;
pub mod store;

#[cfg(test)]
pub(crate) mod testutils;
