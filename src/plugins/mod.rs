pub mod governance_plugin;
pub mod json_repair;
pub mod logging;

pub use governance_plugin::GovernancePlugin;
pub use json_repair::JsonRepairPlugin;
pub use logging::{LogSubscriber, LoggingPlugin};
