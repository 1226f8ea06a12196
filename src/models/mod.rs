pub mod runtime_config;
pub mod neutral;
pub mod governance;
pub mod pricing;
pub mod log_entry;
pub mod mcp;
pub mod plugin_config;
pub mod stream_event;
pub mod error_details;
pub use runtime_config::*;
pub use neutral::*;
pub use log_entry::*;
pub use mcp::*;
