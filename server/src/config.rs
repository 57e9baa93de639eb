//! Command line and runtime configuration.

use clap::{Parser, ValueEnum};
use shared::{MovementFraming, MovementTuning, DEFAULT_PORT, MAX_FRAME_LEN, TICK_RATE};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::error::ServerError;

/// How an already authenticated connection's `register`/`login` is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReauthPolicy {
    /// Run the request through the auth provider again and reply with the
    /// result. The existing session is left untouched.
    #[default]
    Reprocess,
    /// Drop the request without replying.
    Ignore,
    /// Reply with a failure and leave the session untouched.
    Reject,
}

/// Framing of movement frames on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Framing {
    /// Protocol v1: every non-auth frame is movement.
    #[default]
    Lenient,
    /// Protocol v2: movement requires `"type":"move"`.
    Strict,
}

impl From<Framing> for MovementFraming {
    fn from(framing: Framing) -> Self {
        match framing {
            Framing::Lenient => MovementFraming::Lenient,
            Framing::Strict => MovementFraming::Strict,
        }
    }
}

/// Real-time session server
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct ServerConfig {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Simulation ticks per second
    #[arg(short, long, default_value_t = TICK_RATE)]
    pub tick_rate: u32,

    /// Seconds a connection may stay silent before it is dropped
    #[arg(long, default_value_t = 5)]
    pub idle_timeout_secs: u64,

    /// Frames buffered per connection before sends are dropped
    #[arg(long, default_value_t = 64)]
    pub outbound_queue: usize,

    /// Longest inbound frame in bytes; longer lines are discarded
    #[arg(long, default_value_t = MAX_FRAME_LEN)]
    pub max_frame_len: usize,

    /// Handling of auth requests from already authenticated connections
    #[arg(long, value_enum, default_value_t = ReauthPolicy::Reprocess)]
    pub reauth_policy: ReauthPolicy,

    /// Movement frame discriminator rules
    #[arg(long, value_enum, default_value_t = Framing::Lenient)]
    pub framing: Framing,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            tick_rate: TICK_RATE,
            idle_timeout_secs: 5,
            outbound_queue: 64,
            max_frame_len: MAX_FRAME_LEN,
            reauth_policy: ReauthPolicy::default(),
            framing: Framing::default(),
        }
    }
}

impl ServerConfig {
    /// Loopback config on an ephemeral port.
    pub fn local() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Self::default()
        }
    }

    /// Resolves `host` (an IPv4/IPv6 literal or a host name) and `port`.
    pub fn listen_addr(&self) -> Result<SocketAddr, ServerError> {
        let invalid = || ServerError::InvalidAddress(format!("{}:{}", self.host, self.port));
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| invalid())?
            .next()
            .ok_or_else(invalid)
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            write_timeout: Duration::from_secs(self.idle_timeout_secs),
            outbound_queue: self.outbound_queue.max(1),
            max_frame_len: self.max_frame_len.max(1),
            framing: self.framing.into(),
        }
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            reauth_policy: self.reauth_policy,
            tuning: MovementTuning::default(),
        }
    }
}

/// Per-connection settings handed to every connection actor.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub idle_timeout: Duration,
    pub write_timeout: Duration,
    pub outbound_queue: usize,
    /// Longest accepted line, excluding the newline.
    pub max_frame_len: usize,
    pub framing: MovementFraming,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ServerConfig::default().connection()
    }
}

/// Settings of the session orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    pub reauth_policy: ReauthPolicy,
    pub tuning: MovementTuning,
}
