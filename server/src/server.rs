//! Composition root wiring the listener, the simulation clock and the
//! session orchestrator around one shared world.

use log::info;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::AuthProvider;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::listener::Listener;
use crate::session::SessionManager;
use crate::simulation::SimulationClock;
use crate::world::World;

pub struct Server<A> {
    config: ServerConfig,
    world: Arc<World>,
    sessions: Arc<SessionManager<A>>,
    listener: Listener,
    clock: SimulationClock,
}

impl<A: AuthProvider> Server<A> {
    pub fn new(config: ServerConfig, auth: Arc<A>) -> Self {
        let session_config = config.session();
        let world = Arc::new(World::new());
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&world),
            auth,
            session_config,
        ));
        let listener = Listener::new(config.connection());
        let clock = SimulationClock::new(Arc::clone(&world), config.tick_rate, session_config.tuning);

        Self {
            config,
            world,
            sessions,
            listener,
            clock,
        }
    }

    /// Starts the simulation clock, then the listener. Returns the bound
    /// address, which differs from the configured one when port 0 is used.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let addr = self.config.listen_addr()?;

        self.clock.start(Arc::clone(&self.sessions)).await?;
        let bound = match self.listener.start(addr, Arc::clone(&self.sessions)).await {
            Ok(bound) => bound,
            Err(e) => {
                self.clock.stop().await;
                return Err(e);
            }
        };

        info!(
            "Server running on {} at {} Hz",
            bound,
            self.clock.tick_rate()
        );
        Ok(bound)
    }

    /// Stops accepting, closes every connection and stops the clock.
    pub async fn stop(&self) {
        self.listener.stop().await;
        self.clock.stop().await;
        info!("Server stopped");
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().await
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn sessions(&self) -> &Arc<SessionManager<A>> {
        &self.sessions
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
