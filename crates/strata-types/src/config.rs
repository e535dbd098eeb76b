//! Shared configuration for clients and servers.

use std::path::PathBuf;

use serde::Deserialize;

use crate::BackendKind;

/// Default cap on a single operation's payload size (1 MiB).
pub const DEFAULT_MAX_OPERATION_SIZE: u64 = 1024 * 1024;

/// Default size of the server's per-connection scratch region (1 MiB).
pub const DEFAULT_STRIPE_SIZE: usize = 1024 * 1024;

/// Default cap on pooled connections per server.
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// A configured backend implementation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendSpec {
    /// Implementation name (`"posix"`/`"memory"` for objects,
    /// `"fjall"`/`"memory"` for KV).
    pub name: String,
    /// Where the backend runs: `"client"` or `"server"`.
    pub component: String,
    /// Storage path for disk-backed implementations.
    #[serde(default)]
    pub path: PathBuf,
}

impl BackendSpec {
    /// Whether this backend runs inside the client process.
    pub fn is_client(&self) -> bool {
        self.component == "client"
    }
}

/// Process-wide configuration shared by clients and servers.
///
/// A client without a local backend of some kind contacts the remote servers
/// of that kind instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Object servers, one `host:port` per entry.
    pub object_servers: Vec<String>,
    /// KV servers, one `host:port` per entry.
    pub kv_servers: Vec<String>,
    /// Optional in-process object backend.
    pub object_backend: Option<BackendSpec>,
    /// Optional in-process KV backend.
    pub kv_backend: Option<BackendSpec>,
    /// Operations larger than this are split at the API boundary.
    pub max_operation_size: u64,
    /// Size of the server's per-connection scratch region.
    pub stripe_size: usize,
    /// Cap on pooled connections per `(kind, server)` pair.
    pub max_connections: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            object_servers: Vec::new(),
            kv_servers: Vec::new(),
            object_backend: None,
            kv_backend: None,
            max_operation_size: DEFAULT_MAX_OPERATION_SIZE,
            stripe_size: DEFAULT_STRIPE_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl Configuration {
    /// Number of servers configured for a backend kind.
    pub fn server_count(&self, kind: BackendKind) -> usize {
        match kind {
            BackendKind::Object => self.object_servers.len().max(1),
            BackendKind::Kv => self.kv_servers.len().max(1),
        }
    }

    /// Address of the `index`-th server of a kind.
    pub fn server_address(&self, kind: BackendKind, index: u32) -> Option<&str> {
        let servers = match kind {
            BackendKind::Object => &self.object_servers,
            BackendKind::Kv => &self.kv_servers,
        };
        servers.get(index as usize).map(String::as_str)
    }

    /// The client-side backend spec for a kind, if one is configured.
    pub fn client_backend(&self, kind: BackendKind) -> Option<&BackendSpec> {
        let spec = match kind {
            BackendKind::Object => self.object_backend.as_ref(),
            BackendKind::Kv => self.kv_backend.as_ref(),
        };
        spec.filter(|s| s.is_client())
    }
}
