//! The node's REST lookup, used to resolve search queries and URLs into
//! playable tracks.

use futures::future::{self, Either, Future};
use futures::Stream;
use hyper::client::{Client, HttpConnector, Request};
use hyper::{Method, Uri};
use percent_encoding::{utf8_percent_encode, QUERY_ENCODE_SET};
use serde_json::{self, Value};
use std::time::Duration;
use std::u64;
use tokio_core::reactor::{Handle, Timeout};
use ::decoder::Track;
use ::Error;

define_encode_set! {
    /// The query encode set, extended with the separators that would corrupt
    /// the identifier were it spliced into the query string raw.
    pub IDENTIFIER_ENCODE_SET = [QUERY_ENCODE_SET] | {'&', '+', '='}
}

/// The node's verdict on a lookup, reported by protocol version 3 nodes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadType {
    /// A single track was resolved.
    TrackLoaded,
    /// The identifier named a playlist; all of its tracks are included.
    PlaylistLoaded,
    /// The identifier was a search query; the results are included.
    SearchResult,
    /// Nothing matched the identifier.
    NoMatches,
    /// The node failed to load anything for the identifier.
    LoadFailed,
}

/// Playlist metadata attached to a `PLAYLIST_LOADED` response.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: Option<String>,
    /// Index of the track the identifier pointed into the playlist at.
    pub selected_track: Option<i64>,
}

/// A parsed `/loadtracks` response.
///
/// Protocol version 2 nodes answer with a bare JSON array of tracks, version
/// 3 nodes with an object carrying a `loadType`, the `tracks` array and -
/// for playlists - `playlistInfo`. Both shapes parse into this one type;
/// [`load_type`] is `None` for the older shape.
///
/// [`load_type`]: #structfield.load_type
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedTracks {
    pub load_type: Option<LoadType>,
    pub tracks: Vec<Track>,
    pub playlist_info: Option<PlaylistInfo>,
}

#[derive(Deserialize)]
struct ApiTrack {
    track: String,
    info: ApiTrackInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTrackInfo {
    identifier: String,
    is_seekable: bool,
    author: String,
    length: u64,
    is_stream: bool,
    position: u64,
    title: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    source_name: Option<String>,
}

impl From<ApiTrack> for Track {
    fn from(track: ApiTrack) -> Track {
        let info = track.info;

        Track {
            track: track.track,
            length: if info.is_stream { u64::MAX } else { info.length },
            author: info.author,
            identifier: info.identifier,
            is_seekable: info.is_seekable,
            is_stream: info.is_stream,
            position: info.position,
            source: info.source_name,
            title: info.title,
            uri: info.uri,
        }
    }
}

/// Issues a `GET /loadtracks` to the node and parses the response.
///
/// Resolves to `None` when the response carries no track array at all; a
/// lookup that matched nothing resolves to an empty [`LoadedTracks`] instead.
/// Failures - transport errors, a non-success status, the timeout - resolve
/// to an error and are not retried.
///
/// [`LoadedTracks`]: struct.LoadedTracks.html
pub fn load_tracks(
    client: &Client<HttpConnector>,
    handle: &Handle,
    http_host: &str,
    password: &str,
    identifier: &str,
    timeout: Duration,
) -> Box<Future<Item = Option<LoadedTracks>, Error = Error>> {
    let encoded = utf8_percent_encode(identifier, IDENTIFIER_ENCODE_SET);
    let url = format!("{}/loadtracks?identifier={}", http_host, encoded);

    let uri = match url.parse::<Uri>() {
        Ok(uri) => uri,
        Err(why) => return Box::new(future::err(Error::Uri(why))),
    };

    let timer = match Timeout::new(timeout, handle) {
        Ok(timer) => timer,
        Err(why) => return Box::new(future::err(Error::Io(why))),
    };

    let mut request = Request::new(Method::Get, uri);
    request.headers_mut().set_raw("Authorization", password.to_owned());

    let done = client.request(request)
        .and_then(|response| {
            let status = response.status();

            response.body().concat2().map(move |body| (status, body))
        })
        .map_err(Error::Hyper)
        .select2(timer.map_err(Error::Io))
        .then(|result| match result {
            Ok(Either::A(((status, body), _))) => {
                if !status.is_success() {
                    return Err(Error::UnexpectedResponse(status));
                }

                parse_load_response(&body)
            },
            Ok(Either::B(_)) => Err(Error::TimedOut),
            Err(Either::A((why, _))) | Err(Either::B((why, _))) => Err(why),
        });

    Box::new(done)
}

/// Parses a `/loadtracks` body of either protocol shape.
pub(crate) fn parse_load_response(body: &[u8]) -> Result<Option<LoadedTracks>, Error> {
    let json = serde_json::from_slice::<Value>(body)?;

    match json {
        Value::Array(tracks) => Ok(Some(LoadedTracks {
            load_type: None,
            tracks: parse_tracks(tracks)?,
            playlist_info: None,
        })),
        Value::Object(mut map) => {
            let tracks = match map.remove("tracks") {
                Some(Value::Array(tracks)) => parse_tracks(tracks)?,
                _ => return Ok(None),
            };

            let load_type = map.remove("loadType")
                .and_then(|value| serde_json::from_value(value).ok());
            let playlist_info = map.remove("playlistInfo")
                .and_then(|value| serde_json::from_value::<PlaylistInfo>(value).ok())
                .filter(|info| info.name.is_some() || info.selected_track.is_some());

            Ok(Some(LoadedTracks {
                load_type,
                tracks,
                playlist_info,
            }))
        },
        _ => Ok(None),
    }
}

fn parse_tracks(tracks: Vec<Value>) -> Result<Vec<Track>, Error> {
    tracks.into_iter()
        .map(|track| {
            serde_json::from_value::<ApiTrack>(track)
                .map(Track::from)
                .map_err(From::from)
        })
        .collect()
}
