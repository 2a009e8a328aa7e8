//! Outbound control messages sent to the node over the WebSocket.
//!
//! Every message carries an [`Opcode`] discriminator and the guild ID as a
//! decimal string; guild IDs are never serialized as JSON numbers, since
//! consumers parsing them as doubles would lose precision.
//!
//! [`Opcode`]: ../opcodes/enum.Opcode.html

use serde_json;
use websocket::OwnedMessage;
use ::opcodes::Opcode;
use ::Error;

/// Conversion of a control message into a WebSocket text frame.
pub trait IntoWebSocketMessage {
    fn into_ws_message(self) -> Result<OwnedMessage, Error>;
}

macro_rules! impl_into_ws_message {
    ($($ty:ident),*) => {
        $(
            impl IntoWebSocketMessage for $ty {
                fn into_ws_message(self) -> Result<OwnedMessage, Error> {
                    serde_json::to_string(&self)
                        .map(OwnedMessage::Text)
                        .map_err(From::from)
                }
            }
        )*
    };
}

impl_into_ws_message! { Destroy, Pause, Play, Seek, Stop, VoiceUpdate, Volume }

/// Tears down a guild's player on the node.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Destroy {
    pub op: Opcode,
    pub guild_id: String,
}

impl Destroy {
    pub fn new(guild_id: u64) -> Self {
        Self {
            op: Opcode::Destroy,
            guild_id: guild_id.to_string(),
        }
    }
}

/// Pauses or unpauses a guild's player.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pause {
    pub op: Opcode,
    pub guild_id: String,
    pub pause: bool,
}

impl Pause {
    pub fn new(guild_id: u64, pause: bool) -> Self {
        Self {
            op: Opcode::Pause,
            guild_id: guild_id.to_string(),
            pause,
        }
    }
}

/// Plays a track, identified by its opaque encoded identifier.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Play {
    pub op: Opcode,
    pub guild_id: String,
    pub track: String,
}

impl Play {
    pub fn new(guild_id: u64, track: &str) -> Self {
        Self {
            op: Opcode::Play,
            guild_id: guild_id.to_string(),
            track: track.to_owned(),
        }
    }
}

/// Seeks a guild's player to a position, in milliseconds.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Seek {
    pub op: Opcode,
    pub guild_id: String,
    pub position: i64,
}

impl Seek {
    pub fn new(guild_id: u64, position: i64) -> Self {
        Self {
            op: Opcode::Seek,
            guild_id: guild_id.to_string(),
            position,
        }
    }
}

/// Stops a guild's player without destroying it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub op: Opcode,
    pub guild_id: String,
}

impl Stop {
    pub fn new(guild_id: u64) -> Self {
        Self {
            op: Opcode::Stop,
            guild_id: guild_id.to_string(),
        }
    }
}

/// Forwards the voice session to the node so it can open the voice
/// connection on the client's behalf.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceUpdate {
    pub op: Opcode,
    pub guild_id: String,
    pub session_id: String,
    pub event: VoiceServerUpdateEvent,
}

impl VoiceUpdate {
    pub fn new(guild_id: u64, session_id: &str, token: &str, endpoint: &str) -> Self {
        Self {
            op: Opcode::VoiceUpdate,
            guild_id: guild_id.to_string(),
            session_id: session_id.to_owned(),
            event: VoiceServerUpdateEvent {
                token: token.to_owned(),
                guild_id: guild_id.to_string(),
                endpoint: endpoint.to_owned(),
            },
        }
    }
}

/// The voice gateway's server-update payload, embedded verbatim in a
/// [`VoiceUpdate`]. Note the snake_case `guild_id`: this object mirrors the
/// gateway's wire format, not the node's.
///
/// [`VoiceUpdate`]: struct.VoiceUpdate.html
#[derive(Clone, Debug, Serialize)]
pub struct VoiceServerUpdateEvent {
    pub token: String,
    pub guild_id: String,
    pub endpoint: String,
}

/// Sets the volume of a guild's player.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub op: Opcode,
    pub guild_id: String,
    pub volume: u64,
}

impl Volume {
    pub fn new(guild_id: u64, volume: u64) -> Self {
        Self {
            op: Opcode::Volume,
            guild_id: guild_id.to_string(),
            volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{self, Value};
    use websocket::OwnedMessage;
    use super::{Destroy, IntoWebSocketMessage, Pause, Play, Seek, Stop, VoiceUpdate, Volume};

    fn json_of(message: OwnedMessage) -> Value {
        match message {
            OwnedMessage::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame: {:?}", other),
        }
    }

    fn expected(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_play() {
        let msg = json_of(Play::new(3, "QAAAjQIA").into_ws_message().unwrap());

        assert_eq!(msg, expected(r#"{"op":"play","guildId":"3","track":"QAAAjQIA"}"#));
    }

    #[test]
    fn test_pause_and_stop() {
        let msg = json_of(Pause::new(3, true).into_ws_message().unwrap());
        assert_eq!(msg, expected(r#"{"op":"pause","guildId":"3","pause":true}"#));

        let msg = json_of(Stop::new(3).into_ws_message().unwrap());
        assert_eq!(msg, expected(r#"{"op":"stop","guildId":"3"}"#));
    }

    #[test]
    fn test_seek_and_volume() {
        let msg = json_of(Seek::new(3, 16_000).into_ws_message().unwrap());
        assert_eq!(msg, expected(r#"{"op":"seek","guildId":"3","position":16000}"#));

        let msg = json_of(Volume::new(3, 110).into_ws_message().unwrap());
        assert_eq!(msg, expected(r#"{"op":"volume","guildId":"3","volume":110}"#));
    }

    #[test]
    fn test_destroy() {
        let msg = json_of(Destroy::new(3).into_ws_message().unwrap());

        assert_eq!(msg, expected(r#"{"op":"destroy","guildId":"3"}"#));
    }

    #[test]
    fn test_voice_update_nests_the_gateway_event() {
        let update = VoiceUpdate::new(3, "abc123", "token", "eu-west1.example.com");
        let msg = json_of(update.into_ws_message().unwrap());

        assert_eq!(msg, expected(
            r#"{
                "op": "voiceUpdate",
                "guildId": "3",
                "sessionId": "abc123",
                "event": {
                    "token": "token",
                    "guild_id": "3",
                    "endpoint": "eu-west1.example.com"
                }
            }"#,
        ));
    }

    #[test]
    fn test_guild_ids_serialize_as_strings() {
        let msg = json_of(Play::new(u64::max_value(), "x").into_ws_message().unwrap());

        assert_eq!(msg["guildId"], Value::String("18446744073709551615".to_owned()));
    }
}
