//! Fixed-rate simulation clock.

use log::{debug, info, warn};
use shared::{tick_delta, MovementTuning};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};

use crate::connection::cancelled;
use crate::error::ServerError;
use crate::world::World;

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Work run at the end of every tick, after the world has advanced.
pub trait TickHandler: Send + Sync + 'static {
    fn on_tick(&self, tick: u64) -> impl Future<Output = ()> + Send;
}

enum ClockState {
    Idle,
    Running {
        shutdown: watch::Sender<bool>,
        task: JoinHandle<()>,
    },
    Stopped,
}

/// Advances the [`World`] by a fixed step at a fixed rate.
///
/// The step is always `1 / tick_rate` seconds regardless of scheduling
/// jitter. Ticks that fall behind are skipped rather than bunched up.
pub struct SimulationClock {
    world: Arc<World>,
    tick_rate: u32,
    tuning: MovementTuning,
    state: Mutex<ClockState>,
}

impl SimulationClock {
    pub fn new(world: Arc<World>, tick_rate: u32, tuning: MovementTuning) -> Self {
        Self {
            world,
            tick_rate: tick_rate.max(1),
            tuning,
            state: Mutex::new(ClockState::Idle),
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate))
    }

    /// Starts ticking. Starting a running clock does nothing.
    pub async fn start<T: TickHandler>(&self, handler: Arc<T>) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        match &*state {
            ClockState::Running { .. } => return Ok(()),
            ClockState::Stopped => return Err(ServerError::AlreadyStopped("simulation clock")),
            ClockState::Idle => {}
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_ticks(
            Arc::clone(&self.world),
            handler,
            self.tick_rate,
            self.tuning,
            shutdown_rx,
        ));
        info!("Simulation clock started at {} Hz", self.tick_rate);

        *state = ClockState::Running {
            shutdown: shutdown_tx,
            task,
        };
        Ok(())
    }

    /// Stops ticking. Once this returns no further tick runs. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let (shutdown, mut task) = match std::mem::replace(&mut *state, ClockState::Stopped) {
            ClockState::Running { shutdown, task } => (shutdown, task),
            ClockState::Idle => {
                *state = ClockState::Idle;
                return;
            }
            ClockState::Stopped => return,
        };

        shutdown.send_replace(true);
        match timeout(STOP_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Simulation task panicked: {}", e),
            Err(_) => {
                warn!("Simulation task did not stop within {:?}, aborting", STOP_TIMEOUT);
                task.abort();
                let _ = task.await;
            }
        }
        info!("Simulation clock stopped");
    }

    pub async fn is_running(&self) -> bool {
        matches!(&*self.state.lock().await, ClockState::Running { .. })
    }
}

async fn run_ticks<T: TickHandler>(
    world: Arc<World>,
    handler: Arc<T>,
    tick_rate: u32,
    tuning: MovementTuning,
    mut shutdown: watch::Receiver<bool>,
) {
    let dt = tick_delta(tick_rate);
    let budget = Duration::from_nanos(1_000_000_000 / u64::from(tick_rate));
    let mut ticker = interval(budget);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The first tick completes immediately
    ticker.tick().await;

    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        tick += 1;
        let started = Instant::now();

        world.advance(dt, &tuning).await;
        handler.on_tick(tick).await;

        let elapsed = started.elapsed();
        if elapsed > budget {
            warn!(
                "Tick {} overran its budget: {:.2}ms > {:.2}ms",
                tick,
                elapsed.as_secs_f64() * 1000.0,
                budget.as_secs_f64() * 1000.0
            );
        }

        if tick % (u64::from(tick_rate) * 10) == 0 {
            debug!("Tick {}: {} players", tick, world.len().await);
        }
    }

    debug!("Simulation loop exited after {} ticks", tick);
}
