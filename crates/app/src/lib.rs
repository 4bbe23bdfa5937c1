pub mod cli;
pub mod commands;
pub mod ingest;
pub mod reconcile;
pub mod summary;
