// TuneVault - Music Library Downloader
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Response decoding
//!
//! Bodies arrive encrypted (the request asks for it with `e_r`), so decoding
//! is: decrypt, parse JSON, check the `code` envelope, then pull typed values
//! out of the nested payload. Extraction never returns partial results: one
//! malformed entry in a list fails the whole call with the entry's index.

use crate::api::lyrics::{decode_block, LyricBundle};
use crate::api::models::{Album, Artist, StreamResolution, Track, TrackList, UserProfile};
use crate::crypto::codec::{decrypt_text, Encoding};
use crate::error::{ProtocolError, Result, TuneVaultError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope code the backend uses for success
const SUCCESS_CODE: i64 = 200;

/// How response bodies are encoded on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Ciphertext in the given text encoding
    Encrypted(Encoding),
    /// JSON without encryption
    Plain,
}

impl Default for ResponseFormat {
    fn default() -> Self {
        ResponseFormat::Encrypted(Encoding::Hex)
    }
}

/// Turn a raw body into the validated JSON envelope
pub fn decode_body(body: &[u8], format: ResponseFormat) -> Result<Value> {
    let text = match format {
        ResponseFormat::Encrypted(encoding) => decrypt_text(body, encoding)?,
        ResponseFormat::Plain => String::from_utf8(body.to_vec())
            .map_err(|_| ProtocolError::MalformedJson("body is not UTF-8".to_string()))?,
    };

    let value: Value = serde_json::from_str(&text)?;
    check_envelope(value)
}

/// Require `code == 200`, surfacing the backend message otherwise
pub fn check_envelope(value: Value) -> Result<Value> {
    let code = value
        .get("code")
        .and_then(Value::as_i64)
        .ok_or_else(|| TuneVaultError::missing_field("code", None))?;

    if code != SUCCESS_CODE {
        let message = value
            .get("message")
            .or_else(|| value.get("msg"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(ProtocolError::Backend { code, message }.into());
    }

    Ok(value)
}

/// Walk a dotted path (`data.resources`) through nested objects
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, key| current.get(key))
        .filter(|v| !v.is_null())
}

fn require<'a>(value: &'a Value, path: &str, index: Option<usize>) -> Result<&'a Value> {
    lookup(value, path).ok_or_else(|| TuneVaultError::missing_field(path, index))
}

fn require_i64(value: &Value, path: &str, index: Option<usize>) -> Result<i64> {
    require(value, path, index)?
        .as_i64()
        .ok_or_else(|| TuneVaultError::missing_field(path, index))
}

fn require_str(value: &Value, path: &str, index: Option<usize>) -> Result<String> {
    require(value, path, index)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| TuneVaultError::missing_field(path, index))
}

fn optional_str(value: &Value, path: &str) -> Option<String> {
    lookup(value, path)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn require_array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>> {
    require(value, path, None)?
        .as_array()
        .ok_or_else(|| TuneVaultError::missing_field(path, None))
}

/// Decode one song entry `{id, name, ar:[{id, name}], al:{id, name, picUrl}}`
///
/// Artists and albums the backend does not know come back with null names or
/// ids; those decode to empty strings and zero.
pub fn decode_song(song: &Value, index: Option<usize>) -> Result<Track> {
    let id = require_i64(song, "id", index)?;
    let title = require_str(song, "name", index)?;

    let artists = require(song, "ar", index)?
        .as_array()
        .ok_or_else(|| TuneVaultError::missing_field("ar", index))?
        .iter()
        .map(|artist| Artist {
            name: artist
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            id: artist.get("id").and_then(Value::as_i64).unwrap_or_default(),
        })
        .collect();

    let album = require(song, "al", index)?;
    let album = Album {
        name: album
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        id: album.get("id").and_then(Value::as_i64).unwrap_or_default(),
        cover_url: optional_str(album, "picUrl"),
    };

    Ok(Track {
        id,
        title,
        artists,
        album,
    })
}

fn decode_songs(songs: &[Value]) -> Result<Vec<Track>> {
    songs
        .iter()
        .enumerate()
        .map(|(i, song)| decode_song(song, Some(i)))
        .collect()
}

/// Search results: `data.resources[].baseInfo.simpleSongData`
pub fn decode_search(value: &Value) -> Result<Vec<Track>> {
    let resources = match lookup(value, "data.resources") {
        Some(resources) => resources
            .as_array()
            .ok_or_else(|| TuneVaultError::missing_field("data.resources", None))?,
        // No hits
        None => return Ok(Vec::new()),
    };

    resources
        .iter()
        .enumerate()
        .map(|(i, resource)| {
            let song = require(resource, "baseInfo.simpleSongData", Some(i))?;
            decode_song(song, Some(i))
        })
        .collect()
}

/// Stream URL of the first entry in `data[]`
pub fn decode_stream_resolution(value: &Value) -> Result<StreamResolution> {
    let first = require_array(value, "data")?
        .first()
        .ok_or_else(|| TuneVaultError::missing_field("data", Some(0)))?;

    let url = require_str(first, "url", Some(0))?;
    let level = first
        .get("level")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(StreamResolution::new(url, level))
}

/// All six lyric blocks; absent blocks decode to empty strings
pub fn decode_lyrics(value: &Value) -> LyricBundle {
    let block = |name: &str| {
        lookup(value, &format!("{name}.lyric"))
            .and_then(Value::as_str)
            .map(decode_block)
            .unwrap_or_default()
    };

    LyricBundle {
        primary: block("lrc"),
        translated: block("tlyric"),
        romanized: block("romalrc"),
        enhanced_primary: block("yrc"),
        enhanced_translated: block("ytlrc"),
        enhanced_romanized: block("yromalrc"),
    }
}

/// Playlist detail: `playlist{id, name, coverImgUrl, tracks[]}`
pub fn decode_playlist(value: &Value) -> Result<TrackList> {
    let playlist = require(value, "playlist", None)?;
    Ok(TrackList {
        id: require_i64(playlist, "id", None)?,
        name: require_str(playlist, "name", None)?,
        cover_url: optional_str(playlist, "coverImgUrl"),
        tracks: decode_songs(require_array(playlist, "tracks")?)?,
    })
}

/// Album detail: `album{id, name, picUrl}` plus top-level `songs[]`
pub fn decode_album(value: &Value) -> Result<TrackList> {
    let album = require(value, "album", None)?;
    Ok(TrackList {
        id: require_i64(album, "id", None)?,
        name: require_str(album, "name", None)?,
        cover_url: optional_str(album, "picUrl"),
        tracks: decode_songs(require_array(value, "songs")?)?,
    })
}

/// Account owner: `profile{nickname, avatarUrl}`
pub fn decode_user_profile(value: &Value) -> Result<UserProfile> {
    let profile = require(value, "profile", None)?;
    Ok(UserProfile {
        name: require_str(profile, "nickname", None)?,
        avatar_url: optional_str(profile, "avatarUrl"),
    })
}
