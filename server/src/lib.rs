//! # Session Server Library
//!
//! This library provides an authoritative real-time session server. Clients
//! connect over TCP, authenticate, stream movement input, and receive the
//! state of every authenticated player at a fixed rate.
//!
//! ## Core Responsibilities
//!
//! ### Authentication Gate
//! A fresh connection may only `register` or `login`. Movement from a
//! connection that has not authenticated is dropped, and such a connection
//! never appears in, nor receives, a world broadcast.
//!
//! ### Authoritative Simulation
//! Clients only send intent (`moveX`, `moveZ`, `rotateY`). The server owns
//! every position, velocity and heading and advances them with a fixed time
//! step, so the outcome does not depend on client frame rates.
//!
//! ### State Broadcasting
//! At the end of every tick the server snapshots the world once, encodes it
//! once and fans the same frame out to every authenticated connection.
//!
//! ## Architecture Design
//!
//! ### One Task per Connection
//! Every socket gets a read loop and a writer task. Frames from one peer are
//! handled in the order they were sent; peers do not wait on each other.
//! Outbound frames go through a bounded queue, so a slow peer loses frames
//! instead of stalling the tick.
//!
//! ### Newline-Delimited JSON
//! Both directions carry one JSON object per line with camelCase field
//! names. See [`shared::protocol`] for the frame shapes.
//!
//! ## Module Organization
//!
//! ### Connection Module (`connection`)
//! The per-socket actor: framing, idle timeout, non-blocking sends and a
//! single disconnect notification.
//!
//! ### Listener Module (`listener`)
//! The accept loop. Mints connection ids and tracks live connections.
//!
//! ### Session Module (`session`)
//! The authentication state machine and the world broadcast.
//!
//! ### World and Simulation Modules (`world`, `simulation`)
//! The player registry and the fixed-rate clock that advances it.
//!
//! ### Auth Module (`auth`)
//! The credential provider interface and an in-memory implementation.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::auth::InMemoryAuthProvider;
//! use server::config::ServerConfig;
//! use server::server::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(ServerConfig::default(), Arc::new(InMemoryAuthProvider::new()));
//!
//!     // Binds 0.0.0.0:7777 and starts ticking at 30 Hz
//!     let addr = server.start().await?;
//!     println!("Listening on {}", addr);
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod server;
pub mod session;
pub mod simulation;
pub mod world;

pub use error::ServerError;
