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


//! Typed request builders and the request signer
//!
//! Every backend operation has a small `Serialize` struct whose field order
//! is the exact order the backend hashes. The signer turns a request into
//! the plaintext query
//!
//! ```text
//! {path}-36cd479b6b5-{json}-36cd479b6b5-{md5("nobody" + path + "use" + json + "md5forencrypt")}
//! ```
//!
//! and encrypts it with the cipher codec into the upper-case hex value sent
//! as the `params` form field. Any deviation in literals or field order
//! yields a signature the backend rejects.

use crate::crypto::codec::encrypt_hex;
use crate::error::Result;
use md5::{Digest, Md5};
use serde::Serialize;

/// Separator between the segments of the plaintext query
pub const QUERY_MARKER: &str = "-36cd479b6b5-";

/// Digest prefix
const SIGN_SALT: &str = "nobody";

/// Digest literal between path and body
const SIGN_INFIX: &str = "use";

/// Digest suffix
const SIGN_SUFFIX: &str = "md5forencrypt";

/// Prefix of signing paths
const API_PREFIX: &str = "/api/";

/// Prefix of HTTP endpoints
const EAPI_PREFIX: &str = "/eapi/";

/// Backend operations supported by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Search,
    ResolveStreamUrl,
    FetchLyrics,
    FetchPlaylist,
    FetchAlbum { id: i64 },
    FetchUserDetail,
    SendCaptcha,
    LoginByCaptcha,
}

impl Operation {
    /// Path hashed into the signature
    pub fn api_path(&self) -> String {
        match self {
            Self::Search => "/api/search/song/list/page".to_string(),
            Self::ResolveStreamUrl => "/api/song/enhance/player/url/v1".to_string(),
            Self::FetchLyrics => "/api/song/lyric/v1".to_string(),
            Self::FetchPlaylist => "/api/v6/playlist/detail".to_string(),
            Self::FetchAlbum { id } => format!("/api/v1/album/{id}"),
            Self::FetchUserDetail => "/api/nuser/account/get".to_string(),
            Self::SendCaptcha => "/api/sms/captcha/sent".to_string(),
            Self::LoginByCaptcha => "/api/w/login/cellphone".to_string(),
        }
    }

    /// HTTP path the encrypted request is posted to
    pub fn endpoint(&self) -> String {
        let path = self.api_path();
        match path.strip_prefix(API_PREFIX) {
            Some(rest) => format!("{EAPI_PREFIX}{rest}"),
            None => path,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::ResolveStreamUrl => "resolve-stream-url",
            Self::FetchLyrics => "fetch-lyrics",
            Self::FetchPlaylist => "fetch-playlist",
            Self::FetchAlbum { .. } => "fetch-album",
            Self::FetchUserDetail => "fetch-user-detail",
            Self::SendCaptcha => "send-captcha",
            Self::LoginByCaptcha => "login-by-captcha",
        }
    }
}

/// A request body bound to its operation
pub trait ApiRequest: Serialize {
    fn operation(&self) -> Operation;
}

/// Body wrapper adding the flag that asks the backend to encrypt its answer
#[derive(Serialize)]
struct Envelope<'a, R: Serialize> {
    #[serde(flatten)]
    request: &'a R,
    e_r: bool,
}

/// Request ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub operation: Operation,
    /// HTTP path (e.g. `/eapi/song/lyric/v1`)
    pub endpoint: String,
    /// Upper-case hex ciphertext for the `params` form field
    pub params: String,
}

/// Serialize, sign and encrypt a request
pub fn sign<R: ApiRequest>(request: &R) -> Result<SignedRequest> {
    let operation = request.operation();
    let body = request_body(request)?;
    let query = build_query(&operation.api_path(), &body);

    Ok(SignedRequest {
        operation,
        endpoint: operation.endpoint(),
        params: encrypt_hex(&query),
    })
}

/// JSON body exactly as it is hashed and sent
pub fn request_body<R: ApiRequest>(request: &R) -> Result<String> {
    Ok(serde_json::to_string(&Envelope { request, e_r: true })?)
}

/// Plaintext query before encryption
pub fn build_query(path: &str, body: &str) -> String {
    format!(
        "{path}{QUERY_MARKER}{body}{QUERY_MARKER}{}",
        signature(path, body)
    )
}

/// Lower-case hex MD5 over the salted path and body
pub fn signature(path: &str, body: &str) -> String {
    let message = format!("{SIGN_SALT}{path}{SIGN_INFIX}{body}{SIGN_SUFFIX}");
    hex::encode(Md5::digest(message.as_bytes()))
}

// ============================================================================
// Request bodies
// ============================================================================

/// Song search by keyword
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub keyword: String,
    pub scene: &'static str,
    pub limit: u32,
    pub offset: u32,
    pub need_correct: &'static str,
}

impl SearchRequest {
    pub fn new<S: Into<String>>(keyword: S, limit: u32, offset: u32) -> Self {
        Self {
            keyword: keyword.into(),
            scene: "NORMAL",
            limit,
            offset,
            need_correct: "true",
        }
    }
}

impl ApiRequest for SearchRequest {
    fn operation(&self) -> Operation {
        Operation::Search
    }
}

/// Stream URL resolution at a requested quality
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUrlRequest {
    /// JSON array literal of ids, e.g. `[1234]`
    pub ids: String,
    pub level: String,
    pub encode_type: &'static str,
}

impl StreamUrlRequest {
    pub fn new(track_id: i64, level: crate::api::models::QualityLevel) -> Self {
        Self {
            ids: format!("[{track_id}]"),
            level: level.as_str().to_string(),
            encode_type: "flac",
        }
    }
}

impl ApiRequest for StreamUrlRequest {
    fn operation(&self) -> Operation {
        Operation::ResolveStreamUrl
    }
}

/// All six lyric variants of a track
#[derive(Debug, Clone, Serialize)]
pub struct LyricsRequest {
    pub id: i64,
    pub cp: bool,
    pub lv: i32,
    pub tv: i32,
    pub rv: i32,
    pub kv: i32,
    pub yv: i32,
    pub ytv: i32,
    pub yrv: i32,
}

impl LyricsRequest {
    pub fn new(track_id: i64) -> Self {
        // Version -1 asks for the latest revision of every variant
        Self {
            id: track_id,
            cp: false,
            lv: -1,
            tv: -1,
            rv: -1,
            kv: -1,
            yv: -1,
            ytv: -1,
            yrv: -1,
        }
    }
}

impl ApiRequest for LyricsRequest {
    fn operation(&self) -> Operation {
        Operation::FetchLyrics
    }
}

/// Playlist detail including the full track list
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistRequest {
    pub id: i64,
    /// Maximum number of tracks returned inline
    pub n: u32,
    /// Number of recent subscribers returned
    pub s: u32,
}

impl PlaylistRequest {
    pub fn new(playlist_id: i64) -> Self {
        Self {
            id: playlist_id,
            n: 100_000,
            s: 8,
        }
    }
}

impl ApiRequest for PlaylistRequest {
    fn operation(&self) -> Operation {
        Operation::FetchPlaylist
    }
}

/// Album detail; the id travels in the path
#[derive(Debug, Clone, Serialize)]
pub struct AlbumRequest {
    #[serde(skip)]
    pub id: i64,
}

impl AlbumRequest {
    pub fn new(album_id: i64) -> Self {
        Self { id: album_id }
    }
}

impl ApiRequest for AlbumRequest {
    fn operation(&self) -> Operation {
        Operation::FetchAlbum { id: self.id }
    }
}

/// Account of the session cookie's owner
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserDetailRequest {}

impl ApiRequest for UserDetailRequest {
    fn operation(&self) -> Operation {
        Operation::FetchUserDetail
    }
}

/// SMS captcha for phone login
#[derive(Debug, Clone, Serialize)]
pub struct SendCaptchaRequest {
    pub cellphone: String,
    pub ctcode: String,
}

impl SendCaptchaRequest {
    pub fn new<S: Into<String>>(cellphone: S, country_code: S) -> Self {
        Self {
            cellphone: cellphone.into(),
            ctcode: country_code.into(),
        }
    }
}

impl ApiRequest for SendCaptchaRequest {
    fn operation(&self) -> Operation {
        Operation::SendCaptcha
    }
}

/// Phone + captcha login
#[derive(Debug, Clone, Serialize)]
pub struct CaptchaLoginRequest {
    pub phone: String,
    pub countrycode: String,
    pub captcha: String,
    pub remember: &'static str,
    #[serde(rename = "type")]
    pub login_type: &'static str,
}

impl CaptchaLoginRequest {
    pub fn new<S: Into<String>>(phone: S, country_code: S, captcha: S) -> Self {
        Self {
            phone: phone.into(),
            countrycode: country_code.into(),
            captcha: captcha.into(),
            remember: "true",
            login_type: "1",
        }
    }
}

impl ApiRequest for CaptchaLoginRequest {
    fn operation(&self) -> Operation {
        Operation::LoginByCaptcha
    }
}
