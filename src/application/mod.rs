pub mod bootstrap;
pub mod reconcile;
pub mod sync_day;
pub mod task_store;
pub mod time_entries;
