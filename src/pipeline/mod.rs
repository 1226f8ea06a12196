pub mod chain;
pub mod context;
pub mod plugin;

pub use chain::PluginChain;
pub use context::RequestContext;
pub use plugin::Plugin;
