use std::net::SocketAddr;

/// Errors surfaced by the server's lifecycle operations.
///
/// Faults that belong to a single connection or frame never show up here;
/// they are logged and contained where they happen.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be bound. Fatal at startup.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid listen address {0:?}")]
    InvalidAddress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Components cannot be restarted once stopped.
    #[error("{0} was stopped and cannot be restarted")]
    AlreadyStopped(&'static str),
}

impl ServerError {
    pub fn bind(addr: SocketAddr, source: std::io::Error) -> Self {
        ServerError::Bind {
            addr: addr.to_string(),
            source,
        }
    }
}
