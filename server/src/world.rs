//! Authoritative world registry: every authenticated player's kinematic state.

use log::{info, warn};
use shared::{MovementTuning, Player, PlayerId, PlayerInput, PlayerState};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Concurrent map from player identity to kinematic state.
///
/// A single lock guards the whole map, so every read sees complete player
/// records: an input write and the tick's update of the same player never
/// interleave, and a snapshot either contains a player entirely or not at
/// all.
#[derive(Debug, Default)]
pub struct World {
    players: RwLock<HashMap<PlayerId, Player>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a player with default kinematic state. An existing player with
    /// the same id is left as is.
    pub async fn add_player(&self, id: PlayerId) -> PlayerState {
        let mut players = self.players.write().await;
        let player = players.entry(id).or_insert_with(|| {
            info!("Added player {}", id);
            Player::new(id)
        });
        player.state()
    }

    pub async fn remove_player(&self, id: PlayerId) -> bool {
        let removed = self.players.write().await.remove(&id).is_some();
        if removed {
            info!("Removed player {}", id);
        }
        removed
    }

    /// Overwrites the player's pending input. Returns false for unknown ids.
    pub async fn set_input(&self, id: PlayerId, input: PlayerInput) -> bool {
        match self.players.write().await.get_mut(&id) {
            Some(player) => {
                player.set_input(input);
                true
            }
            None => false,
        }
    }

    /// Advances every player by one fixed step.
    ///
    /// A player whose state stops being finite is put back at spawn; the
    /// rest of the world is unaffected.
    pub async fn advance(&self, dt: f32, tuning: &MovementTuning) {
        let mut players = self.players.write().await;
        for player in players.values_mut() {
            player.update(dt, tuning);
            if !player.is_finite() {
                warn!("Player {} left the finite range, respawning", player.id);
                player.reset();
            }
        }
    }

    /// Consistent copy of every player's state, ordered by id.
    pub async fn snapshot(&self) -> Vec<PlayerState> {
        let players = self.players.read().await;
        let mut states: Vec<PlayerState> = players.values().map(Player::state).collect();
        states.sort_by_key(|state| state.player_id);
        states
    }

    pub async fn player(&self, id: PlayerId) -> Option<Player> {
        self.players.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: PlayerId) -> bool {
        self.players.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.players.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.players.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::sync::Arc;

    const DT: f32 = 1.0 / 30.0;

    #[tokio::test]
    async fn test_add_and_remove_player() {
        let world = World::new();

        let state = world.add_player(1).await;
        assert_eq!(state.player_id, 1);
        assert_eq!((state.x, state.y, state.z), (0.0, 0.0, 0.0));
        assert!(world.contains(1).await);
        assert_eq!(world.len().await, 1);

        assert!(world.remove_player(1).await);
        assert!(!world.remove_player(1).await);
        assert!(world.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_existing_player_keeps_state() {
        let world = World::new();
        world.add_player(1).await;
        world.set_input(1, PlayerInput::new(1.0, 0.0, 0.0)).await;
        world.advance(DT, &MovementTuning::default()).await;

        let state = world.add_player(1).await;

        assert!(state.x > 0.0);
        assert_eq!(world.len().await, 1);
    }

    #[tokio::test]
    async fn test_set_input_for_unknown_player() {
        let world = World::new();
        assert!(!world.set_input(42, PlayerInput::new(1.0, 0.0, 0.0)).await);
    }

    #[tokio::test]
    async fn test_advance_consumes_input() {
        let world = World::new();
        world.add_player(1).await;
        world.add_player(2).await;
        world.set_input(1, PlayerInput::new(1.0, 0.0, 0.0)).await;

        world.advance(DT, &MovementTuning::default()).await;

        let moved = world.player(1).await.unwrap();
        let idle = world.player(2).await.unwrap();
        assert_approx_eq!(moved.vel_x, 10.0 * 20.0 * DT, 1e-4);
        assert_approx_eq!(moved.x, moved.vel_x * DT, 1e-6);
        assert!(moved.input.is_idle());
        assert_eq!(idle.x, 0.0);
    }

    #[tokio::test]
    async fn test_non_finite_player_is_respawned() {
        let world = World::new();
        world.add_player(1).await;
        world.add_player(2).await;
        world.set_input(2, PlayerInput::new(1.0, 0.0, 0.0)).await;

        let broken = MovementTuning {
            max_speed: f32::INFINITY,
            ..MovementTuning::default()
        };
        world.set_input(1, PlayerInput::new(1.0, 0.0, 0.0)).await;
        world.advance(DT, &broken).await;

        let snapshot = world.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|s| s.x.is_finite()));
    }

    #[tokio::test]
    async fn test_snapshot_is_sorted() {
        let world = World::new();
        for id in [5, 1, 3] {
            world.add_player(id).await;
        }

        let ids: Vec<PlayerId> = world.snapshot().await.iter().map(|s| s.player_id).collect();

        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_churn_during_ticks() {
        let world = Arc::new(World::new());
        let tuning = MovementTuning::default();

        let ticker = {
            let world = Arc::clone(&world);
            tokio::spawn(async move {
                for _ in 0..200 {
                    world.advance(DT, &tuning).await;
                    for state in world.snapshot().await {
                        assert!(state.x.is_finite());
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let churn: Vec<_> = (1..=8)
            .map(|id| {
                let world = Arc::clone(&world);
                tokio::spawn(async move {
                    for _ in 0..50 {
                        world.add_player(id).await;
                        world.set_input(id, PlayerInput::new(1.0, 1.0, 1.0)).await;
                        world.remove_player(id).await;
                    }
                    world.add_player(id).await;
                })
            })
            .collect();

        for task in churn {
            task.await.unwrap();
        }
        ticker.await.unwrap();

        assert_eq!(world.len().await, 8);
    }
}
