use crate::protocol::PlayerState;
use crate::{PlayerId, ACCELERATION, ANGULAR_ACCELERATION, MAX_ANGULAR_SPEED, MAX_SPEED};

/// Linear interpolation with the factor clamped to `[0, 1]`, so a large step
/// lands on the target instead of overshooting it.
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    a + (b - a) * t
}

/// Wraps an angle in degrees into `[0, 360)`.
pub fn wrap_degrees(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid rounds tiny negative inputs up to exactly 360.0
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// One sample of movement intent as sent by a client.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerInput {
    pub move_x: f32,
    pub move_z: f32,
    pub rotate_y: f32,
}

impl PlayerInput {
    pub fn new(move_x: f32, move_z: f32, rotate_y: f32) -> Self {
        Self {
            move_x,
            move_z,
            rotate_y,
        }
    }

    /// Returns the input with every axis clamped to `[-1, 1]`. Non-finite
    /// components become 0.
    pub fn normalized(self) -> Self {
        fn axis(value: f32) -> f32 {
            if value.is_finite() {
                value.clamp(-1.0, 1.0)
            } else {
                0.0
            }
        }

        Self {
            move_x: axis(self.move_x),
            move_z: axis(self.move_z),
            rotate_y: axis(self.rotate_y),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.move_x == 0.0 && self.move_z == 0.0 && self.rotate_y == 0.0
    }
}

/// Speed limits and approach rates of the movement model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementTuning {
    pub max_speed: f32,
    pub acceleration: f32,
    pub max_angular_speed: f32,
    pub angular_acceleration: f32,
}

impl Default for MovementTuning {
    fn default() -> Self {
        Self {
            max_speed: MAX_SPEED,
            acceleration: ACCELERATION,
            max_angular_speed: MAX_ANGULAR_SPEED,
            angular_acceleration: ANGULAR_ACCELERATION,
        }
    }
}

/// Kinematic state of one player in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Yaw in degrees, always within `[0, 360)`.
    pub rotation_y: f32,
    pub vel_x: f32,
    pub vel_z: f32,
    pub angular_velocity: f32,
    /// Latest input received since the previous tick.
    pub input: PlayerInput,
}

impl Player {
    /// Spawns a player at rest at the origin.
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            rotation_y: 0.0,
            vel_x: 0.0,
            vel_z: 0.0,
            angular_velocity: 0.0,
            input: PlayerInput::default(),
        }
    }

    /// Replaces the pending input. Inputs arriving between two ticks
    /// overwrite each other; only the last one is simulated.
    pub fn set_input(&mut self, input: PlayerInput) {
        self.input = input.normalized();
    }

    /// Advances the player by one fixed step and consumes the pending input.
    pub fn update(&mut self, dt: f32, tuning: &MovementTuning) {
        let dt = dt.max(0.0);
        let input = self.input;

        let linear_t = tuning.acceleration * dt;
        self.vel_x = lerp(self.vel_x, input.move_x * tuning.max_speed, linear_t);
        self.vel_z = lerp(self.vel_z, input.move_z * tuning.max_speed, linear_t);

        self.angular_velocity = lerp(
            self.angular_velocity,
            input.rotate_y * tuning.max_angular_speed,
            tuning.angular_acceleration * dt,
        );

        self.x += self.vel_x * dt;
        self.z += self.vel_z * dt;
        self.rotation_y = wrap_degrees(self.rotation_y + self.angular_velocity * dt);

        self.input = PlayerInput::default();
    }

    pub fn is_finite(&self) -> bool {
        [
            self.x,
            self.y,
            self.z,
            self.rotation_y,
            self.vel_x,
            self.vel_z,
            self.angular_velocity,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    /// Puts the player back at spawn, keeping its identity.
    pub fn reset(&mut self) {
        *self = Player::new(self.id);
    }

    pub fn state(&self) -> PlayerState {
        PlayerState {
            player_id: self.id,
            x: self.x,
            y: self.y,
            z: self.z,
            rotation_y: self.rotation_y,
        }
    }
}
