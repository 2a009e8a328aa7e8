//! Decoder for the node's opaque track identifiers.
//!
//! An identifier is a base64-encoded, length-prefixed binary blob produced by
//! the node's audio library. It both names the track to the node (it is sent
//! back verbatim in `play` messages) and carries enough metadata to be
//! displayed without a REST round-trip. All multi-byte integers are
//! big-endian.

use base64;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::u64;
use ::Error;

/// Metadata for a single track.
///
/// Produced either by the REST lookup ([`rest`]) or by [`decode_track`]. The
/// decoder leaves [`is_seekable`] false: seekability is not part of the
/// binary layout.
///
/// [`decode_track`]: fn.decode_track.html
/// [`is_seekable`]: #structfield.is_seekable
/// [`rest`]: ../rest/index.html
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    /// The opaque encoded identifier. Send this verbatim to play the track.
    pub track: String,
    /// The track's title.
    pub title: String,
    /// The name of the track's author or uploader.
    pub author: String,
    /// The source-level identifier, e.g. a video ID.
    pub identifier: String,
    /// The track length in milliseconds. `u64::MAX` for live streams, whose
    /// length is unbounded.
    pub length: u64,
    /// Whether the node can seek within the track.
    pub is_seekable: bool,
    /// Whether the track is a live stream.
    pub is_stream: bool,
    /// The canonical URL of the track, if it has one.
    pub uri: Option<String>,
    /// The name of the source that produced the track, e.g. `"youtube"`.
    /// Informational only; not populated by REST lookups against nodes that
    /// predate the field.
    pub source: Option<String>,
    /// The position to start playback at, in milliseconds. Always 0 for
    /// node-issued tracks.
    pub position: u64,
}

/// Decodes a track identifier into a [`Track`].
///
/// Returns [`Error::TrackMalformed`] when the payload declares more bytes
/// than it holds, and [`Error::TrackInvalid`] when the identifier is not
/// decodable at all (bad base64, text that is not UTF-8).
///
/// [`Error::TrackInvalid`]: ../enum.Error.html#variant.TrackInvalid
/// [`Error::TrackMalformed`]: ../enum.Error.html#variant.TrackMalformed
/// [`Track`]: struct.Track.html
pub fn decode_track(track_id: &str) -> Result<Track, Error> {
    let bytes = base64::decode(track_id).map_err(|_| Error::TrackInvalid)?;
    let mut cursor = Cursor::new(&bytes[..]);

    // Size-and-flags word (2 high bits are flags, the rest is the payload
    // size) and the message version. Neither is validated.
    cursor.read_u32::<BigEndian>().map_err(|_| Error::TrackMalformed)?;
    cursor.read_u8().map_err(|_| Error::TrackMalformed)?;

    let title = read_text(&mut cursor)?;
    let author = read_text(&mut cursor)?;
    let length = cursor.read_u64::<BigEndian>().map_err(|_| Error::TrackMalformed)?;
    let identifier = read_text(&mut cursor)?;
    let is_stream = read_bool(&mut cursor)?;

    let uri = if read_bool(&mut cursor)? {
        Some(read_text(&mut cursor)?)
    } else {
        None
    };

    let source = read_text(&mut cursor)?;

    // Only these two sources carry a container type, and nothing downstream
    // wants it; skip over it.
    if source == "http" || source == "local" {
        skip_text(&mut cursor)?;
    }

    let position = cursor.read_u64::<BigEndian>().map_err(|_| Error::TrackMalformed)?;

    Ok(Track {
        track: track_id.to_owned(),
        length: if is_stream { u64::MAX } else { length },
        is_seekable: false,
        source: Some(source),
        author,
        identifier,
        is_stream,
        position,
        title,
        uri,
    })
}

fn read_text(cursor: &mut Cursor<&[u8]>) -> Result<String, Error> {
    let len = cursor.read_u16::<BigEndian>().map_err(|_| Error::TrackMalformed)?;
    let mut buf = vec![0; len as usize];
    cursor.read_exact(&mut buf).map_err(|_| Error::TrackMalformed)?;

    String::from_utf8(buf).map_err(|_| Error::TrackInvalid)
}

fn skip_text(cursor: &mut Cursor<&[u8]>) -> Result<(), Error> {
    let len = cursor.read_u16::<BigEndian>().map_err(|_| Error::TrackMalformed)?;
    let mut buf = vec![0; len as usize];

    cursor.read_exact(&mut buf).map_err(|_| Error::TrackMalformed)
}

fn read_bool(cursor: &mut Cursor<&[u8]>) -> Result<bool, Error> {
    cursor.read_u8().map(|b| b != 0).map_err(|_| Error::TrackMalformed)
}
