pub mod config;
pub mod error;
pub mod mirror_gate;
pub mod mirror_store;
pub mod replication;
pub mod toggl_client;
