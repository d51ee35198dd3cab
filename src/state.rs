use std::fmt::{Display, Formatter};

/// Point-in-time snapshot of a pool
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct State {
    /// Idle floor kept by trimming
    pub min_connections: u64,
    /// Maximum live connections allowed
    pub max_connections: u64,
    /// Live connections = idle + borrowed + connecting
    pub connections: u64,
    /// Connections held by callers
    pub borrowed: u64,
    /// Connections waiting in the registry
    pub idle: u64,
    /// Slots reserved for connections being opened
    pub connecting: u64,
    /// Callers inside `get`
    pub waits: u64,
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ min: {}, max: {}, connections: {}, borrowed: {}, idle: {}, connecting: {}, waits: {} }}",
            self.min_connections,
            self.max_connections,
            self.connections,
            self.borrowed,
            self.idle,
            self.connecting,
            self.waits
        )
    }
}
