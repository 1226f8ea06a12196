use crate::error::AppError;
use crate::mcp::client::{McpClient, McpClientConfig};
use dashmap::DashMap;
use std::sync::Arc;

/// Live set of configured MCP clients, keyed by name. Mirrors the
/// dispatcher's provider registry shape: a flat map the admin surface
/// mutates and the request path only reads from.
pub struct McpRegistry {
    clients: DashMap<String, Arc<McpClient>>,
}

impl McpRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { clients: DashMap::new() })
    }

    pub async fn register(&self, config: McpClientConfig) -> Result<Arc<McpClient>, AppError> {
        let client = McpClient::new(config);
        client.connect().await?;
        self.clients.insert(client.config.name.clone(), client.clone());
        Ok(client)
    }

    pub fn get(&self, name: &str) -> Option<Arc<McpClient>> {
        self.clients.get(name).map(|c| c.clone())
    }

    pub fn list(&self) -> Vec<Arc<McpClient>> {
        self.clients.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn remove(&self, name: &str) -> Option<Arc<McpClient>> {
        if let Some((_, client)) = self.clients.remove(name) {
            client.disconnect().await;
            Some(client)
        } else {
            None
        }
    }
}
