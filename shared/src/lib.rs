//! Types shared between the session server and its clients: the line-delimited
//! JSON protocol and the kinematic player model both sides simulate.

pub mod kinematics;
pub mod protocol;

pub use kinematics::{lerp, wrap_degrees, MovementTuning, Player, PlayerInput};
pub use protocol::{
    decode_frame, encode_frame, parse_frame, ClientMessage, FrameError, MovementFraming,
    PlayerState, ServerMessage,
};

/// In-world player identity. Equal to the identity of the connection that
/// authenticated as this player.
pub type PlayerId = u32;

pub const DEFAULT_PORT: u16 = 7777;
pub const TICK_RATE: u32 = 30;

pub const MAX_SPEED: f32 = 10.0;
pub const ACCELERATION: f32 = 20.0;
pub const MAX_ANGULAR_SPEED: f32 = 10.0;
pub const ANGULAR_ACCELERATION: f32 = 20.0;

/// Longest inbound frame the server accepts, in bytes, excluding the newline.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// `playerId` carried by a failed `authResponse`.
pub const NO_PLAYER_ID: i64 = -1;

/// Fixed simulation step for a given tick rate, in seconds.
pub fn tick_delta(tick_rate: u32) -> f32 {
    1.0 / tick_rate.max(1) as f32
}
