use crate::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// How a client's tool catalog is reached. Stdio spawns a subprocess and
/// talks over its stdin/stdout; Http and Sse are remote endpoints connected
/// lazily, on first use rather than at registration.
#[derive(Debug, Clone)]
pub enum McpTransport {
    Stdio {
        command: String,
        args: Vec<String>,
        /// Only these variables are copied from the gateway's own
        /// environment into the subprocess's; everything else is withheld.
        env_allowlist: Vec<String>,
    },
    Http { url: String },
    Sse { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Error(String),
}

/// A named external tool endpoint. `allowed_tools` and `skipped_tools` must
/// be disjoint; the tool list a model call actually sees is allow minus
/// skip, computed once the catalog is known.
#[derive(Debug, Clone)]
pub struct McpClientConfig {
    pub name: String,
    pub transport: McpTransport,
    pub allowed_tools: Vec<String>,
    pub skipped_tools: Vec<String>,
}

impl McpClientConfig {
    pub fn new(
        name: impl Into<String>,
        transport: McpTransport,
        allowed_tools: Vec<String>,
        skipped_tools: Vec<String>,
    ) -> Result<Self, AppError> {
        let allow: HashSet<&str> = allowed_tools.iter().map(String::as_str).collect();
        let skip: HashSet<&str> = skipped_tools.iter().map(String::as_str).collect();
        let overlap: Vec<&&str> = allow.intersection(&skip).collect();
        if !overlap.is_empty() {
            return Err(AppError::Configuration(format!(
                "mcp client '{}': allow-list and skip-list overlap on {:?}",
                name.into(),
                overlap
            )));
        }
        Ok(Self {
            name: name.into(),
            transport,
            allowed_tools,
            skipped_tools,
        })
    }

    /// Tools exposed to model calls: the allow-list with any skip-listed
    /// name removed. An empty allow-list means "all tools the endpoint
    /// reports", filtered by skip alone.
    pub fn filter_tools(&self, catalog: &[String]) -> Vec<String> {
        let skip: HashSet<&str> = self.skipped_tools.iter().map(String::as_str).collect();
        let base: Vec<&String> = if self.allowed_tools.is_empty() {
            catalog.iter().collect()
        } else {
            let allow: HashSet<&str> = self.allowed_tools.iter().map(String::as_str).collect();
            catalog.iter().filter(|t| allow.contains(t.as_str())).collect()
        };
        base.into_iter()
            .filter(|t| !skip.contains(t.as_str()))
            .cloned()
            .collect()
    }
}

/// One configured MCP endpoint plus its live connection state. A stdio
/// client owns its spawned child process; http/sse clients carry no
/// persistent handle since the HTTP client itself is stateless.
pub struct McpClient {
    pub config: McpClientConfig,
    state: RwLock<ConnectionState>,
    child: RwLock<Option<Child>>,
}

impl McpClient {
    pub fn new(config: McpClientConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            child: RwLock::new(None),
        })
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    /// Stdio clients spawn immediately. Http/Sse clients mark themselves
    /// connected without a handshake, matching the lazy-connect contract:
    /// the first real tool call is what actually reaches the network.
    pub async fn connect(&self) -> Result<(), AppError> {
        match &self.config.transport {
            McpTransport::Stdio { command, args, env_allowlist } => {
                let mut cmd = Command::new(command);
                cmd.args(args);
                cmd.env_clear();
                for key in env_allowlist {
                    if let Ok(value) = std::env::var(key) {
                        cmd.env(key, value);
                    }
                }
                cmd.stdin(std::process::Stdio::piped());
                cmd.stdout(std::process::Stdio::piped());
                cmd.stderr(std::process::Stdio::null());

                match cmd.spawn() {
                    Ok(child) => {
                        *self.child.write().await = Some(child);
                        *self.state.write().await = ConnectionState::Connected;
                        info!(client = %self.config.name, "mcp stdio client spawned");
                        Ok(())
                    }
                    Err(e) => {
                        let message = e.to_string();
                        *self.state.write().await = ConnectionState::Error(message.clone());
                        warn!(client = %self.config.name, error = %message, "mcp stdio spawn failed");
                        Err(AppError::Configuration(format!(
                            "mcp client '{}' failed to spawn: {message}",
                            self.config.name
                        )))
                    }
                }
            }
            McpTransport::Http { .. } | McpTransport::Sse { .. } => {
                *self.state.write().await = ConnectionState::Connected;
                Ok(())
            }
        }
    }

    pub async fn disconnect(&self) {
        if let Some(mut child) = self.child.write().await.take() {
            let _ = child.kill().await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }
}
