use hyper::error::UriError;
use hyper::{Error as HyperError, StatusCode};
use serde_json::Error as JsonError;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::io::Error as IoError;
use websocket::client::ParseError as WebSocketClientParseError;
use websocket::WebSocketError;

#[derive(Debug)]
pub enum Error {
    /// The voice gateway has not identified yet, so the current user ID -
    /// required by the node handshake - is unknown.
    CurrentUserUnavailable,
    /// An error from the `hyper` crate while performing a REST lookup.
    Hyper(HyperError),
    /// A configuration value was rejected at construction.
    InvalidConfig(&'static str),
    /// An operation was called on a player in a state that does not permit
    /// it, such as pausing a player that is not playing.
    InvalidPlayerState(&'static str),
    /// An error from `std::io`.
    Io(IoError),
    /// An error from the `serde_json` crate.
    Json(JsonError),
    /// No node connection is currently established.
    NotConnected,
    /// A player is already registered for the guild.
    PlayerAlreadyExists,
    /// No player is registered for the guild.
    PlayerNotFound,
    /// The write queue to the node is full. Transient: the message may be
    /// retried once the queue has drained.
    SendQueueFull,
    /// A network call did not complete within the configured timeout.
    TimedOut,
    /// The track identifier was not decodable at all, e.g. invalid base64.
    TrackInvalid,
    /// The track identifier decoded to a truncated or malformed payload.
    TrackMalformed,
    /// The REST lookup returned a non-success status code.
    UnexpectedResponse(StatusCode),
    /// An error while parsing a URI for the REST lookup.
    Uri(UriError),
    /// The voice gateway failed to join the requested channel.
    VoiceJoinFailed,
    /// The requested volume is outside of the accepted `0..=150` range.
    VolumeOutOfRange(u64),
    /// An error from the `websocket` crate.
    WebSocket(WebSocketError),
    /// An error while parsing the node address as a WebSocket URI.
    WebSocketClientParse(WebSocketClientParseError),
}

impl From<HyperError> for Error {
    fn from(err: HyperError) -> Self {
        Error::Hyper(err)
    }
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Self {
        Error::Io(err)
    }
}

impl From<JsonError> for Error {
    fn from(err: JsonError) -> Self {
        Error::Json(err)
    }
}

impl From<UriError> for Error {
    fn from(err: UriError) -> Self {
        Error::Uri(err)
    }
}

impl From<WebSocketError> for Error {
    fn from(err: WebSocketError) -> Self {
        Error::WebSocket(err)
    }
}

impl From<WebSocketClientParseError> for Error {
    fn from(err: WebSocketClientParseError) -> Self {
        Error::WebSocketClientParse(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            Error::CurrentUserUnavailable => {
                write!(f, "the voice gateway's current user is not yet known")
            },
            Error::Hyper(ref inner) => inner.fmt(f),
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Error::InvalidPlayerState(msg) => msg.fmt(f),
            Error::Io(ref inner) => inner.fmt(f),
            Error::Json(ref inner) => inner.fmt(f),
            Error::NotConnected => write!(f, "not connected to a node"),
            Error::PlayerAlreadyExists => {
                write!(f, "a player is already registered for the guild")
            },
            Error::PlayerNotFound => write!(f, "no player is registered for the guild"),
            Error::SendQueueFull => write!(f, "the node write queue is full"),
            Error::TimedOut => write!(f, "the request did not complete in time"),
            Error::TrackInvalid => write!(f, "the track identifier is not valid"),
            Error::TrackMalformed => write!(f, "the track identifier payload is malformed"),
            Error::UnexpectedResponse(status) => {
                write!(f, "unexpected response status: {}", status)
            },
            Error::Uri(ref inner) => inner.fmt(f),
            Error::VoiceJoinFailed => write!(f, "the voice gateway failed to join the channel"),
            Error::VolumeOutOfRange(volume) => {
                write!(f, "volume {} is outside of the accepted 0..=150 range", volume)
            },
            Error::WebSocket(ref inner) => inner.fmt(f),
            Error::WebSocketClientParse(ref inner) => inner.fmt(f),
        }
    }
}

impl StdError for Error {
    fn cause(&self) -> Option<&StdError> {
        match *self {
            Error::Hyper(ref inner) => Some(inner),
            Error::Io(ref inner) => Some(inner),
            Error::Json(ref inner) => Some(inner),
            Error::Uri(ref inner) => Some(inner),
            Error::WebSocket(ref inner) => Some(inner),
            Error::WebSocketClientParse(ref inner) => Some(inner),
            _ => None,
        }
    }
}
