#![forbid(unsafe_code)]

//! Blocking client for YouTube Music's InnerTube API.
//!
//! The client serves two roles: it is the primary stream source (the `player`
//! endpoint lists every rendition of a track) and it backs the thin
//! search/browse endpoints of the HTTP API. Every call is a single JSON POST
//! made with `ureq`, so callers run it on tokio's blocking pool.

pub mod parsers;

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::formats::{FormatDescriptor, Ranking};
use crate::resolver::{Extraction, ResolveStrategy};

pub const DEFAULT_API_BASE: &str = "https://music.youtube.com/youtubei/v1";

const MUSIC_ORIGIN: &str = "https://music.youtube.com";
const CLIENT_NAME: &str = "WEB_REMIX";
const CLIENT_ID: &str = "67";
const CLIENT_VERSION: &str = "1.20260121.03.00";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/144.0.0.0 Safari/537.36";

/// Headers from a browser export that must not be replayed verbatim.
const SKIPPED_HEADERS: [&str; 3] = ["accept-encoding", "content-length", "host"];

/// Search filters understood by the music search endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFilter {
    Songs,
    Podcasts,
}

impl SearchFilter {
    fn params(self) -> &'static str {
        match self {
            SearchFilter::Songs => "EgWKAQIIAWoKEAkQBRAKEAMQBA%3D%3D",
            SearchFilter::Podcasts => "EgWKAQJQAWoKEAkQBRAKEAMQBA%3D%3D",
        }
    }
}

/// How requests to the music API are authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MusicAuth {
    #[default]
    Anonymous,
    /// Extra headers sent with every request (OAuth bearer or browser export).
    Headers(Vec<(String, String)>),
}

impl MusicAuth {
    /// Loads credentials when the file exists. Missing, unreadable or malformed
    /// files leave the client unauthenticated.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!(
                "no credentials at {}; music API runs unauthenticated",
                path.display()
            );
            return Self::Anonymous;
        }
        match Self::from_file(path) {
            Ok(auth) => {
                info!("loaded music API credentials from {}", path.display());
                auth
            }
            Err(err) => {
                warn!("could not use credentials, running unauthenticated: {err:#}");
                Self::Anonymous
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing credentials in {}", path.display()))?;
        Self::from_json(&value)
    }

    fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| anyhow!("credentials must be a JSON object"))?;

        if let Some(token) = object.get("access_token").and_then(Value::as_str) {
            let token_type = object
                .get("token_type")
                .and_then(Value::as_str)
                .filter(|kind| !kind.trim().is_empty())
                .unwrap_or("Bearer");
            return Ok(Self::Headers(vec![(
                "Authorization".to_string(),
                format!("{token_type} {token}"),
            )]));
        }

        let headers: Vec<(String, String)> = object
            .iter()
            .filter(|(key, _)| !SKIPPED_HEADERS.contains(&key.to_ascii_lowercase().as_str()))
            .filter_map(|(key, value)| value.as_str().map(|text| (key.clone(), text.to_string())))
            .collect();
        if headers.is_empty() {
            bail!("credentials contain neither an access token nor headers");
        }
        Ok(Self::Headers(headers))
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Headers(_))
    }

    fn headers(&self) -> &[(String, String)] {
        match self {
            Self::Anonymous => &[],
            Self::Headers(headers) => headers,
        }
    }
}

pub struct MusicClient {
    agent: ureq::Agent,
    api_base: String,
    auth: MusicAuth,
}

impl MusicClient {
    pub fn new(auth: MusicAuth, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            api_base: DEFAULT_API_BASE.to_string(),
            auth,
        }
    }

    /// Points the client at another InnerTube-compatible host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn auth(&self) -> &MusicAuth {
        &self.auth
    }

    fn context() -> Value {
        json!({
            "client": {
                "clientName": CLIENT_NAME,
                "clientVersion": CLIENT_VERSION,
                "hl": "en",
                "gl": "US",
            },
            "user": {},
        })
    }

    fn post(&self, endpoint: &str, mut body: Map<String, Value>) -> Result<Value> {
        let url = format!("{}/{}?prettyPrint=false", self.api_base, endpoint);
        body.insert("context".to_string(), Self::context());

        let mut request = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("Origin", MUSIC_ORIGIN)
            .set("X-Origin", MUSIC_ORIGIN)
            .set("X-YouTube-Client-Name", CLIENT_ID)
            .set("X-YouTube-Client-Version", CLIENT_VERSION);
        for (name, value) in self.auth.headers() {
            request = request.set(name, value);
        }

        debug!(endpoint, "music API request");
        let response = request
            .send_json(Value::Object(body))
            .with_context(|| format!("music API request to {endpoint} failed"))?;
        response
            .into_json::<Value>()
            .with_context(|| format!("decoding music API response from {endpoint}"))
    }

    fn browse(&self, browse_id: &str, params: Option<&str>) -> Result<Value> {
        let mut body = Map::new();
        body.insert("browseId".to_string(), browse_id.into());
        if let Some(params) = params {
            body.insert("params".to_string(), params.into());
        }
        self.post("browse", body)
    }

    /// Raw `player` response for a track: playability, details and formats.
    pub fn get_song(&self, video_id: &str) -> Result<PlayerResponse> {
        let mut body = Map::new();
        body.insert("videoId".to_string(), video_id.into());
        body.insert(
            "playbackContext".to_string(),
            json!({ "contentPlaybackContext": { "html5Preference": "HTML5_PREF_WANTS" } }),
        );
        let raw = self.post("player", body)?;
        serde_json::from_value(raw).context("decoding player response")
    }

    pub fn search(&self, query: &str, filter: SearchFilter) -> Result<Vec<Value>> {
        let mut body = Map::new();
        body.insert("query".to_string(), query.into());
        body.insert("params".to_string(), filter.params().into());
        let response = self.post("search", body)?;
        Ok(parsers::parse_search_results(&response))
    }

    pub fn search_suggestions(&self, query: &str) -> Result<Vec<String>> {
        let mut body = Map::new();
        body.insert("input".to_string(), query.into());
        let response = self.post("music/get_search_suggestions", body)?;
        Ok(parsers::parse_suggestions(&response))
    }

    /// Home feed shelves. Empty feeds are reported as errors so callers can
    /// fall back to something else.
    pub fn home(&self) -> Result<Vec<Value>> {
        let response = self.browse("FEmusic_home", None)?;
        let shelves = parsers::parse_shelves(&response);
        if shelves.is_empty() {
            bail!("home feed returned no shelves");
        }
        Ok(shelves)
    }

    pub fn library_playlists(&self) -> Result<Vec<Value>> {
        if !self.auth.is_authenticated() {
            bail!("library playlists require credentials");
        }
        let response = self.browse("FEmusic_liked_playlists", None)?;
        Ok(parsers::parse_shelf_items(&response)
            .into_iter()
            .filter(|item| item.get("playlistId").is_some())
            .collect())
    }

    pub fn mood_categories(&self) -> Result<Value> {
        let response = self.browse("FEmusic_moods_and_genres", None)?;
        Ok(Value::Object(parsers::parse_mood_categories(&response)))
    }

    pub fn mood_playlists(&self, params: &str) -> Result<Vec<Value>> {
        let response = self.browse("FEmusic_moods_and_genres_category", Some(params))?;
        Ok(parsers::parse_shelf_items(&response)
            .into_iter()
            .filter(|item| item.get("playlistId").is_some())
            .collect())
    }

    pub fn charts(&self, country: Option<&str>) -> Result<Value> {
        let mut body = Map::new();
        body.insert("browseId".to_string(), "FEmusic_charts".into());
        if let Some(country) = country {
            body.insert(
                "formData".to_string(),
                json!({ "selectedValues": [country] }),
            );
        }
        let response = self.post("browse", body)?;
        Ok(json!({
            "country": country.unwrap_or("ZZ"),
            "sections": parsers::parse_shelves(&response),
        }))
    }
}

impl ResolveStrategy for MusicClient {
    fn name(&self) -> &'static str {
        "music-api"
    }

    fn extract(&self, video_id: &str) -> Result<Option<Extraction>> {
        let response = self.get_song(video_id)?;
        if let Some(status) = response.playability_status() {
            debug!(video_id, status, "player playability");
        }
        Ok(Some(Extraction::Candidates {
            formats: response.into_formats(),
            ranking: Ranking::PinnedTags,
        }))
    }
}

/// The parts of a `player` response the stream resolver reads.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResponse {
    #[serde(default)]
    playability_status: Option<PlayabilityStatus>,
    #[serde(default)]
    streaming_data: Option<StreamingData>,
}

#[derive(Debug, Default, Deserialize)]
struct PlayabilityStatus {
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingData {
    #[serde(default)]
    adaptive_formats: Vec<PlayerFormat>,
    #[serde(default)]
    formats: Vec<PlayerFormat>,
}

/// `itag` arrives as a number from the API but is sometimes stored as text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Tag {
    Number(i64),
    Text(String),
}

impl Tag {
    fn into_text(self) -> String {
        match self {
            Tag::Number(value) => value.to_string(),
            Tag::Text(value) => value,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerFormat {
    itag: Option<Tag>,
    audio_quality: Option<String>,
    mime_type: Option<String>,
    bitrate: Option<u64>,
    url: Option<String>,
}

impl From<PlayerFormat> for FormatDescriptor {
    fn from(format: PlayerFormat) -> Self {
        FormatDescriptor {
            tag: format.itag.map(Tag::into_text).unwrap_or_default(),
            audio_quality: format.audio_quality,
            mime_type: format.mime_type,
            bitrate: format.bitrate,
            url: format.url,
            ..FormatDescriptor::default()
        }
    }
}

impl PlayerResponse {
    pub fn playability_status(&self) -> Option<&str> {
        self.playability_status.as_ref()?.status.as_deref()
    }

    /// Adaptive formats when there are any, muxed formats otherwise.
    pub fn into_formats(self) -> Vec<FormatDescriptor> {
        let Some(data) = self.streaming_data else {
            return Vec::new();
        };
        let formats = if data.adaptive_formats.is_empty() {
            data.formats
        } else {
            data.adaptive_formats
        };
        formats.into_iter().map(FormatDescriptor::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn player(value: Value) -> PlayerResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn player_prefers_adaptive_formats() {
        let response = player(json!({
            "playabilityStatus": { "status": "OK" },
            "streamingData": {
                "adaptiveFormats": [
                    { "itag": "141", "mimeType": "audio/mp4", "url": "http://a" },
                    { "itag": "250", "bitrate": 50000, "url": "http://b" }
                ],
                "formats": [
                    { "itag": 18, "mimeType": "video/mp4", "url": "http://muxed" }
                ]
            }
        }));
        assert_eq!(response.playability_status(), Some("OK"));
        let formats = response.into_formats();
        assert_eq!(formats.len(), 2);
        let extraction = Extraction::Candidates {
            formats,
            ranking: Ranking::PinnedTags,
        };
        let stream = extraction.select().unwrap();
        assert_eq!(stream.url, "http://a");
        assert_eq!(stream.mime_type, "audio/mp4");
    }

    #[test]
    fn player_falls_back_to_muxed_formats() {
        let formats = player(json!({
            "streamingData": {
                "adaptiveFormats": [],
                "formats": [
                    { "itag": 18, "audioQuality": "AUDIO_QUALITY_LOW", "url": "http://muxed" }
                ]
            }
        }))
        .into_formats();
        assert_eq!(formats.len(), 1);
        assert_eq!(formats[0].tag, "18");
        assert_eq!(formats[0].audio_quality.as_deref(), Some("AUDIO_QUALITY_LOW"));
    }

    #[test]
    fn player_without_streaming_data_has_no_formats() {
        let formats = player(json!({ "playabilityStatus": { "status": "LOGIN_REQUIRED" } }))
            .into_formats();
        assert!(formats.is_empty());
    }

    #[test]
    fn ciphered_formats_carry_no_url() {
        let formats = player(json!({
            "streamingData": {
                "adaptiveFormats": [
                    { "itag": 251, "mimeType": "audio/webm", "signatureCipher": "s=abc&url=x" }
                ]
            }
        }))
        .into_formats();
        assert!(formats[0].url.is_none());
        assert!(Ranking::PinnedTags.select(&formats).is_none());
    }

    #[test]
    fn oauth_credentials_become_authorization_header() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"access_token": "tok", "token_type": "Bearer", "refresh_token": "r"}}"#
        )
        .unwrap();
        let auth = MusicAuth::load(file.path());
        assert_eq!(
            auth,
            MusicAuth::Headers(vec![("Authorization".into(), "Bearer tok".into())])
        );
        assert!(auth.is_authenticated());
    }

    #[test]
    fn browser_headers_are_replayed_without_transport_headers() {
        let auth = MusicAuth::from_json(&json!({
            "cookie": "SAPISID=1",
            "x-goog-authuser": "0",
            "Accept-Encoding": "gzip, br",
            "ignored-number": 3
        }))
        .unwrap();
        let MusicAuth::Headers(headers) = auth else {
            panic!("expected headers");
        };
        assert_eq!(headers.len(), 2);
        assert!(headers.iter().any(|(key, _)| key == "cookie"));
        assert!(!headers.iter().any(|(key, _)| key == "Accept-Encoding"));
    }

    #[test]
    fn missing_or_broken_credentials_run_anonymous() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            MusicAuth::load(&dir.path().join("oauth.json")),
            MusicAuth::Anonymous
        );

        let mut broken = NamedTempFile::new().unwrap();
        write!(broken, "not json").unwrap();
        assert_eq!(MusicAuth::load(broken.path()), MusicAuth::Anonymous);
    }

    #[test]
    fn library_playlists_need_credentials() {
        let client = MusicClient::new(MusicAuth::Anonymous, Duration::from_secs(1));
        assert!(!client.auth().is_authenticated());
        let err = client.library_playlists().unwrap_err();
        assert!(err.to_string().contains("require credentials"));
    }

    async fn fake_music_api(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn extract_posts_player_request_with_context() {
        let app = Router::new().route(
            "/player",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["videoId"], "abc");
                assert_eq!(body["context"]["client"]["clientName"], CLIENT_NAME);
                Json(json!({
                    "streamingData": {
                        "adaptiveFormats": [
                            { "itag": 251, "mimeType": "audio/webm; codecs=\"opus\"", "url": "http://opus" }
                        ]
                    }
                }))
            }),
        );
        let base = fake_music_api(app).await;
        let extraction = tokio::task::spawn_blocking(move || {
            MusicClient::new(MusicAuth::Anonymous, Duration::from_secs(5))
                .with_api_base(base)
                .extract("abc")
        })
        .await
        .unwrap()
        .unwrap()
        .unwrap();
        let stream = extraction.select().unwrap();
        assert_eq!(stream.url, "http://opus");
        assert_eq!(stream.mime_type, "audio/webm");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn extract_reports_http_errors() {
        let app = Router::new().route(
            "/player",
            post(|| async { (axum::http::StatusCode::FORBIDDEN, "nope") }),
        );
        let base = fake_music_api(app).await;
        let result = tokio::task::spawn_blocking(move || {
            MusicClient::new(MusicAuth::Anonymous, Duration::from_secs(5))
                .with_api_base(base)
                .extract("abc")
        })
        .await
        .unwrap();
        assert!(result.is_err());
    }
}
