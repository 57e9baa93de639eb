//! Line-delimited JSON protocol spoken between clients and the session server.
//!
//! Every frame is a single JSON object terminated by `\n`, in both directions.
//! Field names are lower camel case and form the wire contract; changing one
//! requires a protocol version bump.
//!
//! Inbound frames are discriminated by their `type` field (or `action` when
//! `type` is absent). `register` and `login` are authentication requests.
//! Protocol v1 treats every other frame as a movement update; v2 requires an
//! explicit `"type":"move"` (see [`MovementFraming`]).

use log::warn;
use serde::{Deserialize, Serialize};

use crate::kinematics::PlayerInput;
use crate::PlayerId;

/// How frames that are not authentication requests are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MovementFraming {
    /// Protocol v1: any non-auth frame, including one without a type, is a
    /// movement update.
    #[default]
    Lenient,
    /// Protocol v2: only `"type":"move"` is a movement update; anything else
    /// is rejected.
    Strict,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Register {
        username: String,
        email: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    Move(PlayerInput),
}

impl ClientMessage {
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ClientMessage::Register { .. } | ClientMessage::Login { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Register { .. } => "register",
            ClientMessage::Login { .. } => "login",
            ClientMessage::Move(_) => "move",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{kind} frame is missing `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("unexpected frame type {0:?}")]
    UnexpectedType(Option<String>),
}

/// Union of every field an inbound frame may carry. Keys are accepted in
/// camelCase and PascalCase.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type", alias = "Type")]
    kind: Option<String>,
    #[serde(alias = "Action")]
    action: Option<String>,
    #[serde(alias = "Username")]
    username: Option<String>,
    #[serde(alias = "Email")]
    email: Option<String>,
    #[serde(alias = "Password")]
    password: Option<String>,
    #[serde(alias = "MoveX")]
    move_x: Option<f32>,
    #[serde(alias = "MoveZ")]
    move_z: Option<f32>,
    #[serde(alias = "RotateY")]
    rotate_y: Option<f32>,
}

impl RawFrame {
    fn discriminator(&self) -> Option<String> {
        self.kind.clone().or_else(|| self.action.clone())
    }

    fn required(
        value: Option<String>,
        kind: &'static str,
        field: &'static str,
    ) -> Result<String, FrameError> {
        value.ok_or(FrameError::MissingField { kind, field })
    }

    fn into_message(self, framing: MovementFraming) -> Result<ClientMessage, FrameError> {
        let kind = self.discriminator();
        match kind.as_deref() {
            Some("register") => Ok(ClientMessage::Register {
                username: Self::required(self.username, "register", "username")?,
                email: Self::required(self.email, "register", "email")?,
                password: Self::required(self.password, "register", "password")?,
            }),
            Some("login") => Ok(ClientMessage::Login {
                username: Self::required(self.username, "login", "username")?,
                password: Self::required(self.password, "login", "password")?,
            }),
            Some("move") => Ok(self.into_move()),
            _ if framing == MovementFraming::Lenient => Ok(self.into_move()),
            other => Err(FrameError::UnexpectedType(other.map(str::to_owned))),
        }
    }

    fn into_move(self) -> ClientMessage {
        ClientMessage::Move(PlayerInput::new(
            self.move_x.unwrap_or(0.0),
            self.move_z.unwrap_or(0.0),
            self.rotate_y.unwrap_or(0.0),
        ))
    }
}

/// Decodes one frame (without its trailing newline).
pub fn parse_frame(line: &str, framing: MovementFraming) -> Result<ClientMessage, FrameError> {
    let raw: RawFrame = serde_json::from_str(line.trim())?;
    raw.into_message(framing)
}

/// Decodes one frame, logging and discarding anything that does not parse.
pub fn decode_frame(line: &str, framing: MovementFraming) -> Option<ClientMessage> {
    match parse_frame(line, framing) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("Dropping frame {:?}: {}", line, e);
            None
        }
    }
}

/// Kinematic snapshot of one player as broadcast to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "playerState", rename_all = "camelCase")]
pub struct PlayerState {
    pub player_id: PlayerId,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rotation_y: f32,
}

/// Outbound frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    AuthResponse {
        success: bool,
        message: String,
        player_id: i64,
        username: String,
    },
    WorldState { players: Vec<PlayerState> },
}

/// Serializes a message into a complete newline-terminated frame.
pub fn encode_frame(message: &ServerMessage) -> Result<String, serde_json::Error> {
    let mut frame = serde_json::to_string(message)?;
    frame.push('\n');
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_decode_register() {
        let line = r#"{"type":"register","username":"Alice","email":"a@test.com","password":"Passw0rd"}"#;

        let message = decode_frame(line, MovementFraming::Lenient).unwrap();

        assert_eq!(
            message,
            ClientMessage::Register {
                username: "Alice".to_string(),
                email: "a@test.com".to_string(),
                password: "Passw0rd".to_string(),
            }
        );
        assert!(message.is_auth());
    }

    #[test]
    fn test_decode_login_via_action() {
        let line = r#"{"action":"login","username":"Alice","password":"Passw0rd"}"#;

        let message = decode_frame(line, MovementFraming::Lenient).unwrap();

        assert_eq!(message.kind(), "login");
    }

    #[test]
    fn test_register_without_email_is_rejected() {
        let line = r#"{"type":"register","username":"Alice","password":"Passw0rd"}"#;

        let err = parse_frame(line, MovementFraming::Lenient).unwrap_err();

        assert!(matches!(
            err,
            FrameError::MissingField {
                kind: "register",
                field: "email"
            }
        ));
    }

    #[test]
    fn test_decode_explicit_move() {
        let line = r#"{"type":"move","moveX":1,"moveZ":-0.5,"rotateY":0.25}"#;

        let message = decode_frame(line, MovementFraming::Strict).unwrap();

        assert_eq!(message, ClientMessage::Move(PlayerInput::new(1.0, -0.5, 0.25)));
    }

    #[test]
    fn test_pascal_case_keys_are_accepted() {
        let login = r#"{"Type":"login","Username":"Alice","Password":"Passw0rd"}"#;
        let register = r#"{"Action":"register","Username":"Bob","Email":"b@test.com","Password":"Passw0rd"}"#;
        let movement = r#"{"Type":"move","MoveX":1,"MoveZ":-1,"RotateY":0.5}"#;

        assert_eq!(
            decode_frame(login, MovementFraming::Lenient),
            Some(ClientMessage::Login {
                username: "Alice".to_string(),
                password: "Passw0rd".to_string(),
            })
        );
        assert_eq!(
            decode_frame(register, MovementFraming::Lenient).unwrap().kind(),
            "register"
        );
        assert_eq!(
            decode_frame(movement, MovementFraming::Strict),
            Some(ClientMessage::Move(PlayerInput::new(1.0, -1.0, 0.5)))
        );
    }

    #[test]
    fn test_lenient_framing_treats_unknown_types_as_movement() {
        let untyped = decode_frame(r#"{"moveX":0.5}"#, MovementFraming::Lenient).unwrap();
        let other = decode_frame(r#"{"type":"input","moveZ":1}"#, MovementFraming::Lenient);

        assert_eq!(untyped, ClientMessage::Move(PlayerInput::new(0.5, 0.0, 0.0)));
        assert_eq!(
            other,
            Some(ClientMessage::Move(PlayerInput::new(0.0, 1.0, 0.0)))
        );
    }

    #[test]
    fn test_strict_framing_rejects_untyped_movement() {
        assert!(decode_frame(r#"{"moveX":0.5}"#, MovementFraming::Strict).is_none());
        assert!(matches!(
            parse_frame(r#"{"type":"input"}"#, MovementFraming::Strict),
            Err(FrameError::UnexpectedType(Some(kind))) if kind == "input"
        ));
    }

    #[test]
    fn test_malformed_frames_yield_nothing() {
        let frames = [
            "not json",
            "{\"type\":\"move\",\"moveX\":",
            r#"{"type":"move","moveX":"fast"}"#,
            "[1,2,3]",
            "",
        ];

        for frame in frames {
            assert!(
                decode_frame(frame, MovementFraming::Lenient).is_none(),
                "frame should be dropped: {}",
                frame
            );
        }
    }

    #[test]
    fn test_auth_response_wire_format() {
        let frame = encode_frame(&ServerMessage::AuthResponse {
            success: false,
            message: "Invalid password".to_string(),
            player_id: crate::NO_PLAYER_ID,
            username: "Alice".to_string(),
        })
        .unwrap();

        assert!(frame.ends_with('\n'));
        assert_eq!(frame.matches('\n').count(), 1);

        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "authResponse",
                "success": false,
                "message": "Invalid password",
                "playerId": -1,
                "username": "Alice",
            })
        );
    }

    #[test]
    fn test_world_state_wire_format() {
        let frame = encode_frame(&ServerMessage::WorldState {
            players: vec![PlayerState {
                player_id: 2,
                x: 1.5,
                y: 0.0,
                z: -3.0,
                rotation_y: 90.0,
            }],
        })
        .unwrap();

        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "worldState",
                "players": [{
                    "type": "playerState",
                    "playerId": 2,
                    "x": 1.5,
                    "y": 0.0,
                    "z": -3.0,
                    "rotationY": 90.0,
                }],
            })
        );
    }

    #[test]
    fn test_server_message_parses_back() {
        let message = ServerMessage::WorldState {
            players: vec![PlayerState {
                player_id: 5,
                x: 0.25,
                y: 0.0,
                z: 0.5,
                rotation_y: 180.0,
            }],
        };

        let frame = encode_frame(&message).unwrap();
        let parsed: ServerMessage = serde_json::from_str(frame.trim_end()).unwrap();

        assert_eq!(parsed, message);
    }
}
