use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpConnectionState {
    Connected,
    Disconnected,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum McpTransport {
    Stdio { command: String, args: Vec<String>, env_allowlist: Vec<String> },
    Http { url: String },
    Sse { url: String },
}

/// A named external tool endpoint whose catalog is filtered by allow/skip
/// lists before exposure to model calls. Disjointness of the two lists is
/// validated at configuration load time, not at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpClient {
    pub name: String,
    pub transport: McpTransport,
    pub state: McpConnectionState,
    pub allow_list: Vec<String>,
    pub skip_list: Vec<String>,
}

impl McpClient {
    /// Returns an error describing the overlap if allow_list and skip_list
    /// intersect; configuration load must reject such a client.
    pub fn validate_disjoint(&self) -> Result<(), String> {
        let allow: HashSet<&str> = self.allow_list.iter().map(String::as_str).collect();
        let overlap: Vec<&str> = self
            .skip_list
            .iter()
            .map(String::as_str)
            .filter(|t| allow.contains(t))
            .collect();
        if overlap.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "mcp client '{}': allow_list and skip_list overlap on {:?}",
                self.name, overlap
            ))
        }
    }

    pub fn tool_permitted(&self, tool: &str) -> bool {
        let allowed = self.allow_list.is_empty() || self.allow_list.iter().any(|t| t == tool);
        let skipped = self.skip_list.iter().any(|t| t == tool);
        allowed && !skipped
    }
}
