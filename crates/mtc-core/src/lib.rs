pub mod config;
pub mod device;
pub mod engine;
pub mod logging;
pub mod models;
pub(crate) mod task_context;

pub use task_context::current_worker;
