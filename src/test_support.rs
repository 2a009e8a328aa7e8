//! Shared helpers for the crate's tests.

use futures::future::{self, Future};
use futures::unsync::mpsc::{self, Receiver, Sender};
use futures::{Async, Stream};
use serde_json::{self, Value};
use std::cell::RefCell;
use std::rc::Rc;
use websocket::OwnedMessage;
use ::decoder::Track;
use ::stats::RemoteStats;
use ::EventHandler;

/// An event observed by a [`RecordingHandler`].
///
/// [`RecordingHandler`]: struct.RecordingHandler.html
#[derive(Clone, Debug, PartialEq)]
pub enum Recorded {
    JoinVoice(u64, u64),
    LeaveVoice(u64),
    PlayerUpdate(u64, Option<Track>, i64),
    TrackEnd(u64, Option<Track>, String),
    TrackException(u64, Option<Track>, String),
    TrackStuck(u64, Option<Track>, i64),
    Stats(RemoteStats),
}

/// An `EventHandler` that records every call for later assertions.
pub struct RecordingHandler {
    pub user_id: Option<u64>,
    pub fail_join: bool,
    pub events: Rc<RefCell<Vec<Recorded>>>,
}

impl RecordingHandler {
    pub fn new(user_id: Option<u64>) -> (Self, Rc<RefCell<Vec<Recorded>>>) {
        let events = Rc::new(RefCell::new(Vec::new()));
        let handler = Self {
            user_id,
            fail_join: false,
            events: Rc::clone(&events),
        };

        (handler, events)
    }
}

impl EventHandler for RecordingHandler {
    fn current_user_id(&mut self) -> Option<u64> {
        self.user_id
    }

    fn join_voice(&mut self, guild_id: u64, channel_id: u64)
        -> Box<Future<Item = (), Error = ()>> {
        self.events.borrow_mut().push(Recorded::JoinVoice(guild_id, channel_id));

        if self.fail_join {
            Box::new(future::err(()))
        } else {
            Box::new(future::ok(()))
        }
    }

    fn leave_voice(&mut self, guild_id: u64) -> Box<Future<Item = (), Error = ()>> {
        self.events.borrow_mut().push(Recorded::LeaveVoice(guild_id));

        Box::new(future::ok(()))
    }

    fn player_update(&mut self, guild_id: u64, track: Option<Track>, position: i64) {
        self.events.borrow_mut().push(Recorded::PlayerUpdate(guild_id, track, position));
    }

    fn track_end(&mut self, guild_id: u64, track: Option<Track>, reason: &str) {
        self.events.borrow_mut().push(Recorded::TrackEnd(guild_id, track, reason.to_owned()));
    }

    fn track_exception(&mut self, guild_id: u64, track: Option<Track>, error: &str) {
        self.events.borrow_mut().push(Recorded::TrackException(guild_id, track, error.to_owned()));
    }

    fn track_stuck(&mut self, guild_id: u64, track: Option<Track>, threshold_ms: i64) {
        self.events.borrow_mut().push(Recorded::TrackStuck(guild_id, track, threshold_ms));
    }

    fn stats(&mut self, stats: RemoteStats) {
        self.events.borrow_mut().push(Recorded::Stats(stats));
    }
}

/// A write queue like the one the node hands to players.
pub fn channel_pair() -> (Sender<OwnedMessage>, Receiver<OwnedMessage>) {
    mpsc::channel(64)
}

/// Drains every queued text frame and parses each as JSON.
pub fn drain(receiver: &mut Receiver<OwnedMessage>) -> Vec<Value> {
    future::lazy(|| -> Result<Vec<Value>, ()> {
        let mut out = Vec::new();

        while let Ok(Async::Ready(Some(message))) = receiver.poll() {
            if let OwnedMessage::Text(text) = message {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }

        Ok(out)
    }).wait().unwrap()
}

/// A track with plausible metadata and a stand-in identifier.
pub fn sample_track() -> Track {
    Track {
        track: "QAAAjQIAJVJpY2sg".to_owned(),
        title: "Rick Astley - Never Gonna Give You Up".to_owned(),
        author: "RickAstleyVEVO".to_owned(),
        identifier: "dQw4w9WgXcQ".to_owned(),
        length: 212_000,
        is_seekable: true,
        is_stream: false,
        uri: Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_owned()),
        source: Some("youtube".to_owned()),
        position: 0,
    }
}
