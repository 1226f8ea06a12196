pub mod policies;
pub mod worker_pool;

pub use worker_pool::Dispatcher;
