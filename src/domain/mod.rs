pub mod interval;
pub mod models;
pub mod task_time;
