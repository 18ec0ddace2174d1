pub mod auth;
pub mod dataset;
pub mod ingest;
pub mod profile;
