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


//! HTTP transport for the music service
//!
//! `MusicClient` posts signed, encrypted requests and decodes the encrypted
//! answers. It is constructed explicitly and shared behind an `Arc`; there is
//! no process-wide instance.
//!
//! # Timeouts
//!
//! API calls use a 10 s connect timeout and a 20 s whole-response timeout.
//! Audio streams only get the connect timeout here because a large file can
//! legitimately take minutes; the downloader applies a per-chunk read timeout
//! instead.
//!
//! # Example
//! ```rust,no_run
//! use tunevault_core::api::client::{Credentials, MusicClient};
//!
//! # async fn example() -> tunevault_core::error::Result<()> {
//! let client = MusicClient::new()?;
//! let credentials = Credentials::new("MUSIC_U=...");
//! let tracks = client.search(&credentials, "daft punk", 20, 0).await?;
//! # Ok(())
//! # }
//! ```

use crate::api::lyrics::LyricBundle;
use crate::api::models::{QualityLevel, StreamResolution, Track, TrackList, UserProfile};
use crate::api::request::{
    sign, AlbumRequest, ApiRequest, CaptchaLoginRequest, LyricsRequest, PlaylistRequest,
    SearchRequest, SendCaptchaRequest, StreamUrlRequest, UserDetailRequest,
};
use crate::api::response::{self, ResponseFormat};
use crate::error::{Result, TransportError, TuneVaultError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Default API host
pub const DEFAULT_BASE_URL: &str = "https://interface3.music.163.com";

/// Connect timeout for every request
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Whole-response timeout for API calls
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Session cookie sent with every API call
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    cookie: String,
}

impl Credentials {
    pub fn new<S: Into<String>>(cookie: S) -> Self {
        Self {
            cookie: cookie.into(),
        }
    }

    /// No session; enough for search and captcha login
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    pub fn is_anonymous(&self) -> bool {
        self.cookie.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked = if self.is_anonymous() { "<none>" } else { "<redacted>" };
        f.debug_struct("Credentials").field("cookie", &masked).finish()
    }
}

/// Configuration for MusicClient
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub response_format: ResponseFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            response_format: ResponseFormat::default(),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.config.response_format = format;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// An open audio stream
pub struct AudioStream {
    /// `Content-Length`, when the server sent one
    pub content_length: Option<u64>,
    pub chunks: BoxStream<'static, Result<Bytes>>,
}

impl fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Backend capabilities the download pipeline depends on
#[async_trait]
pub trait TrackSource: Send + Sync {
    /// Resolve the stream URL of `track` at `quality`
    async fn resolve_stream(
        &self,
        track: &Track,
        quality: QualityLevel,
        credentials: &Credentials,
    ) -> Result<StreamResolution>;

    /// Open a streaming GET on a resolved URL
    async fn open_stream(&self, url: &str) -> Result<AudioStream>;

    /// Fetch and decode all lyric blocks of a track
    async fn fetch_lyrics(&self, track_id: i64, credentials: &Credentials) -> Result<LyricBundle>;

    /// Fetch cover art bytes
    async fn fetch_cover(&self, url: &str) -> Result<Bytes>;
}

/// Client for the music service API
#[derive(Debug, Clone)]
pub struct MusicClient {
    /// API calls, with the whole-response timeout
    http: Client,
    /// CDN downloads, connect timeout only
    media: Client,
    base_url: Url,
    config: ClientConfig,
}

impl MusicClient {
    /// Create a client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a client with custom configuration
    ///
    /// # Errors
    /// Returns `InvalidInput` for an unparseable base URL or user agent.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            TuneVaultError::invalid_input(format!("Invalid base URL {}: {}", config.base_url, e))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| TuneVaultError::invalid_input(format!("Invalid user agent: {}", e)))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .default_headers(headers.clone())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        let media = Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            media,
            base_url,
            config,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Search songs by keyword
    pub async fn search(
        &self,
        credentials: &Credentials,
        keyword: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Track>> {
        if keyword.trim().is_empty() {
            return Err(TuneVaultError::invalid_input("Search keyword is empty"));
        }
        let value = self
            .call(&SearchRequest::new(keyword, limit, offset), credentials)
            .await?;
        response::decode_search(&value)
    }

    /// Resolve a stream URL for one track
    pub async fn stream_url(
        &self,
        credentials: &Credentials,
        track_id: i64,
        quality: QualityLevel,
    ) -> Result<StreamResolution> {
        let value = self
            .call(&StreamUrlRequest::new(track_id, quality), credentials)
            .await?;
        response::decode_stream_resolution(&value)
    }

    /// Fetch all lyric blocks of a track
    pub async fn lyrics(&self, credentials: &Credentials, track_id: i64) -> Result<LyricBundle> {
        let value = self.call(&LyricsRequest::new(track_id), credentials).await?;
        Ok(response::decode_lyrics(&value))
    }

    /// Playlist with all its tracks
    pub async fn playlist(&self, credentials: &Credentials, playlist_id: i64) -> Result<TrackList> {
        let value = self
            .call(&PlaylistRequest::new(playlist_id), credentials)
            .await?;
        response::decode_playlist(&value)
    }

    /// Album with all its tracks
    pub async fn album(&self, credentials: &Credentials, album_id: i64) -> Result<TrackList> {
        let value = self.call(&AlbumRequest::new(album_id), credentials).await?;
        response::decode_album(&value)
    }

    /// Profile of the cookie's owner
    pub async fn user_detail(&self, credentials: &Credentials) -> Result<UserProfile> {
        if credentials.is_anonymous() {
            return Err(TuneVaultError::invalid_input("No session cookie supplied"));
        }
        let value = self.call(&UserDetailRequest::default(), credentials).await?;
        response::decode_user_profile(&value)
    }

    /// Ask the backend to text a login captcha to `phone`
    pub async fn send_captcha(&self, phone: &str, country_code: &str) -> Result<()> {
        self.call(
            &SendCaptchaRequest::new(phone, country_code),
            &Credentials::anonymous(),
        )
        .await?;
        Ok(())
    }

    /// Log in with a phone captcha and return the session cookie
    pub async fn login_by_captcha(
        &self,
        phone: &str,
        country_code: &str,
        captcha: &str,
    ) -> Result<Credentials> {
        let (_, cookies) = self
            .exchange(
                &CaptchaLoginRequest::new(phone, country_code, captcha),
                &Credentials::anonymous(),
            )
            .await?;

        if cookies.is_empty() {
            return Err(TuneVaultError::missing_field("Set-Cookie", None));
        }
        Ok(Credentials::new(cookies.join("; ")))
    }

    async fn call<R: ApiRequest>(&self, request: &R, credentials: &Credentials) -> Result<Value> {
        let (value, _) = self.exchange(request, credentials).await?;
        Ok(value)
    }

    /// Sign, post and decode one request; also returns `name=value` pairs
    /// from `Set-Cookie`
    async fn exchange<R: ApiRequest>(
        &self,
        request: &R,
        credentials: &Credentials,
    ) -> Result<(Value, Vec<String>)> {
        let signed = sign(request)?;
        let url = self.base_url.join(&signed.endpoint).map_err(|e| {
            TuneVaultError::invalid_input(format!("Invalid endpoint {}: {}", signed.endpoint, e))
        })?;

        tracing::debug!(operation = signed.operation.name(), endpoint = %signed.endpoint, "Posting request");

        let mut builder = self
            .http
            .post(url)
            .form(&[("params", signed.params.as_str())]);
        if !credentials.is_anonymous() {
            builder = builder.header(COOKIE, credentials.cookie());
        }

        let response = builder.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(TransportError::Status {
                status: status.as_u16(),
                endpoint: signed.endpoint,
            }
            .into());
        }

        let cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .map(|pair| pair.trim().to_string())
            .filter(|pair| !pair.is_empty())
            .collect();

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(TransportError::EmptyBody {
                endpoint: signed.endpoint,
            }
            .into());
        }

        let value = response::decode_body(&body, self.config.response_format)?;
        Ok((value, cookies))
    }

    async fn get_checked(&self, client: &Client, url: &str) -> Result<reqwest::Response> {
        let response = client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let endpoint = response.url().path().to_string();
            return Err(TransportError::Status {
                status: status.as_u16(),
                endpoint,
            }
            .into());
        }
        Ok(response)
    }
}

#[async_trait]
impl TrackSource for MusicClient {
    async fn resolve_stream(
        &self,
        track: &Track,
        quality: QualityLevel,
        credentials: &Credentials,
    ) -> Result<StreamResolution> {
        self.stream_url(credentials, track.id, quality).await
    }

    async fn open_stream(&self, url: &str) -> Result<AudioStream> {
        let response = self.get_checked(&self.media, url).await?;
        let content_length = response.content_length();
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TuneVaultError::from))
            .boxed();

        Ok(AudioStream {
            content_length,
            chunks,
        })
    }

    async fn fetch_lyrics(&self, track_id: i64, credentials: &Credentials) -> Result<LyricBundle> {
        self.lyrics(credentials, track_id).await
    }

    async fn fetch_cover(&self, url: &str) -> Result<Bytes> {
        let response = self.get_checked(&self.http, url).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(TransportError::EmptyBody {
                endpoint: url.to_string(),
            }
            .into());
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::codec::{encrypt, Encoding};
    use crate::error::ProtocolError;
    use mockito::{Matcher, Server};

    fn encrypted(json: &str) -> Vec<u8> {
        encrypt(json.as_bytes(), Encoding::Raw, Encoding::Hex).unwrap()
    }

    fn client_for(server: &Server) -> MusicClient {
        let config = ClientConfig::builder().base_url(server.url()).build();
        MusicClient::with_config(config).unwrap()
    }

    #[test]
    fn test_credentials_debug_is_masked() {
        let debug = format!("{:?}", Credentials::new("MUSIC_U=secret"));
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let config = ClientConfig::builder().base_url("not a url").build();
        assert!(matches!(
            MusicClient::with_config(config),
            Err(TuneVaultError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_search_posts_params_with_cookie() {
        let mut server = Server::new_async().await;
        let body = r#"{"code":200,"data":{"resources":[{"baseInfo":{"simpleSongData":
            {"id":1,"name":"One","ar":[{"id":2,"name":"A"}],"al":{"id":3,"name":"R","picUrl":null}}}}]}}"#;
        let mock = server
            .mock("POST", "/eapi/search/song/list/page")
            .match_header("cookie", "MUSIC_U=abc")
            .match_body(Matcher::Regex("^params=[0-9A-F]+$".to_string()))
            .with_status(200)
            .with_body(encrypted(body))
            .create_async()
            .await;

        let client = client_for(&server);
        let tracks = client
            .search(&Credentials::new("MUSIC_U=abc"), "one", 10, 0)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "One");
    }

    #[tokio::test]
    async fn test_non_200_status_is_transport_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/eapi/song/lyric/v1")
            .with_status(503)
            .create_async()
            .await;

        let err = client_for(&server)
            .lyrics(&Credentials::anonymous(), 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TuneVaultError::Transport(TransportError::Status { status: 503, .. })
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_body_is_transport_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/eapi/v1/album/7")
            .with_status(200)
            .create_async()
            .await;

        let err = client_for(&server)
            .album(&Credentials::anonymous(), 7)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TuneVaultError::Transport(TransportError::EmptyBody { .. })
        ));
    }

    #[tokio::test]
    async fn test_backend_code_surfaces_message() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/eapi/nuser/account/get")
            .with_status(200)
            .with_body(encrypted(r#"{"code":301,"message":"not logged in"}"#))
            .create_async()
            .await;

        let err = client_for(&server)
            .user_detail(&Credentials::new("MUSIC_U=expired"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TuneVaultError::Protocol(ProtocolError::Backend { code: 301, .. })
        ));
    }

    #[tokio::test]
    async fn test_send_captcha_is_anonymous() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/eapi/sms/captcha/sent")
            .match_header("cookie", Matcher::Missing)
            .with_status(200)
            .with_body(encrypted(r#"{"code":200,"data":true}"#))
            .create_async()
            .await;

        client_for(&server)
            .send_captcha("13800000000", "86")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_collects_cookies() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/eapi/w/login/cellphone")
            .with_status(200)
            .with_header("set-cookie", "MUSIC_U=token; Path=/; HttpOnly")
            .with_header("set-cookie", "__csrf=xyz; Path=/")
            .with_body(encrypted(r#"{"code":200}"#))
            .create_async()
            .await;

        let credentials = client_for(&server)
            .login_by_captcha("13800000000", "86", "1234")
            .await
            .unwrap();
        assert_eq!(credentials.cookie(), "MUSIC_U=token; __csrf=xyz");
    }

    #[tokio::test]
    async fn test_open_stream_reports_length() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/audio.mp3")
            .with_status(200)
            .with_body(vec![0u8; 64])
            .create_async()
            .await;

        let client = client_for(&server);
        let url = format!("{}/audio.mp3", server.url());
        let mut stream = client.open_stream(&url).await.unwrap();
        assert_eq!(stream.content_length, Some(64));

        let mut total = 0;
        while let Some(chunk) = stream.chunks.next().await {
            total += chunk.unwrap().len();
        }
        assert_eq!(total, 64);
    }
}
