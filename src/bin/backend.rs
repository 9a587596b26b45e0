#![forbid(unsafe_code)]

//! Axum backend for the Moosic player.
//!
//! `/stream/{video_id}` resolves a track to one audio URL (music API first,
//! yt-dlp second) and relays the remote body in fixed-size chunks. Every other
//! route is a thin JSON pass-through to the music API with a per-route
//! fallback when the upstream call fails.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use moosic_backend::config::{RuntimeOverrides, resolve_runtime_settings};
use moosic_backend::music::{MusicAuth, MusicClient, SearchFilter};
use moosic_backend::relay::StreamRelay;
use moosic_backend::resolver::{ResolveStrategy, StreamResolver};
use moosic_backend::ytdlp::YtDlp;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const NO_STREAMS_FOUND: &str = "No audio streams found";
const TRENDING_QUERY: &str = "Trending Music";
const DEFAULT_PODCAST_QUERY: &str = "Podcasts";

#[derive(Debug, Clone)]
struct BackendArgs {
    listen_host: IpAddr,
    port: u16,
    credentials_path: PathBuf,
    ytdlp_bin: PathBuf,
    metadata_timeout: Duration,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut host_override: Option<IpAddr> = None;
        let mut port_override: Option<u16> = None;
        let mut credentials_override: Option<PathBuf> = None;
        let mut ytdlp_override: Option<PathBuf> = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--host=") {
                host_override = Some(parse_host_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                port_override = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--credentials=") {
                credentials_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--yt-dlp=") {
                ytdlp_override = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    host_override = Some(parse_host_arg(&value)?);
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    port_override = Some(parse_port_arg(&value)?);
                }
                "--credentials" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--credentials requires a value"))?;
                    credentials_override = Some(PathBuf::from(value));
                }
                "--yt-dlp" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--yt-dlp requires a value"))?;
                    ytdlp_override = Some(PathBuf::from(value));
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let settings = resolve_runtime_settings(RuntimeOverrides {
            port: port_override,
            credentials_path: credentials_override,
            ytdlp_bin: ytdlp_override,
            ..RuntimeOverrides::default()
        })?;
        let listen_host = match host_override {
            Some(host) => host,
            None => parse_host_arg(&settings.host)?,
        };

        Ok(Self {
            listen_host,
            port: settings.port,
            credentials_path: settings.credentials_path,
            ytdlp_bin: settings.ytdlp_bin,
            metadata_timeout: settings.metadata_timeout,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/MOOSIC_HOST")
}

#[derive(Clone)]
struct AppState {
    resolver: Arc<StreamResolver>,
    music: Arc<MusicClient>,
    relay: StreamRelay,
}

impl AppState {
    /// Music API first, yt-dlp second.
    fn new(music: Arc<MusicClient>, ytdlp: YtDlp, relay: StreamRelay) -> Self {
        let strategies: Vec<Box<dyn ResolveStrategy>> =
            vec![Box::new(Arc::clone(&music)), Box::new(ytdlp)];
        Self {
            resolver: Arc::new(StreamResolver::new(strategies)),
            music,
            relay,
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let BackendArgs {
        listen_host,
        port,
        credentials_path,
        ytdlp_bin,
        metadata_timeout,
    } = BackendArgs::parse()?;

    let auth = MusicAuth::load(&credentials_path);
    let music = Arc::new(MusicClient::new(auth, metadata_timeout));
    let ytdlp = YtDlp::new(ytdlp_bin);
    info!(
        authenticated = music.auth().is_authenticated(),
        yt_dlp = %ytdlp.binary().display(),
        "stream sources configured"
    );
    let relay = StreamRelay::new()?;
    let state = AppState::new(music, ytdlp, relay);
    info!(
        sources = ?state.resolver.strategy_names(),
        "stream resolver ready"
    );

    let addr = SocketAddr::new(listen_host, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("Moosic backend listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/stream/{video_id}", get(stream_audio))
        .route("/search", get(search))
        .route("/suggestions", get(suggestions))
        .route("/recommendations", get(recommendations))
        .route("/playlists", get(playlists))
        .route("/moods", get(moods))
        .route("/mood_playlists", get(mood_playlists))
        .route("/charts", get(charts))
        .route("/podcasts", get(podcasts))
        .with_state(state)
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("failed to install Ctrl+C handler: {err}");
    }
    info!("shutting down");
}

/// Runs a blocking music API call on tokio's blocking pool.
async fn blocking_music<T, F>(music: &Arc<MusicClient>, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&MusicClient) -> Result<T> + Send + 'static,
{
    let music = Arc::clone(music);
    tokio::task::spawn_blocking(move || call(&music))
        .await
        .context("music API task panicked")?
}

fn or_internal<T>(what: &str, result: Result<T>) -> ApiResult<Json<T>> {
    result.map(Json).map_err(|err| {
        error!("{what} failed: {err:#}");
        ApiError::internal(err.to_string())
    })
}

fn or_fallback<T>(what: &str, result: Result<T>, fallback: T) -> Json<T> {
    match result {
        Ok(value) => Json(value),
        Err(err) => {
            warn!("{what} unavailable, answering with an empty default: {err:#}");
            Json(fallback)
        }
    }
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Moosic Backend is Running" }))
}

/// Resolves the stream before answering so a miss can still be a 404. Once
/// the headers are out, relay failures only cut the body short.
async fn stream_audio(
    State(state): State<AppState>,
    AxumPath(video_id): AxumPath<String>,
) -> ApiResult<Response> {
    let resolver = Arc::clone(&state.resolver);
    let lookup_id = video_id.clone();
    let resolved = tokio::task::spawn_blocking(move || resolver.resolve(&lookup_id))
        .await
        .map_err(|err| {
            error!(video_id = %video_id, "stream resolution task failed: {err}");
            ApiError::internal(err.to_string())
        })?;
    let Some(stream) = resolved else {
        return Err(ApiError::not_found(NO_STREAMS_FOUND));
    };

    let body = Body::from_stream(state.relay.open(stream.url, video_id));
    Ok(([(header::CONTENT_TYPE, stream.mime_type)], body).into_response())
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
}

async fn search(
    State(state): State<AppState>,
    Query(SearchQuery { q }): Query<SearchQuery>,
) -> ApiResult<Json<Vec<Value>>> {
    let result = blocking_music(&state.music, move |music| {
        music.search(&q, SearchFilter::Songs)
    })
    .await;
    or_internal("search", result)
}

async fn suggestions(
    State(state): State<AppState>,
    Query(SearchQuery { q }): Query<SearchQuery>,
) -> ApiResult<Json<Vec<String>>> {
    let result = blocking_music(&state.music, move |music| music.search_suggestions(&q)).await;
    or_internal("search suggestions", result)
}

/// Home feed, or trending songs when the feed is unavailable.
async fn recommendations(State(state): State<AppState>) -> ApiResult<Json<Vec<Value>>> {
    match blocking_music(&state.music, |music| music.home()).await {
        Ok(shelves) => return Ok(Json(shelves)),
        Err(err) => warn!("home feed unavailable, searching trending songs: {err:#}"),
    }
    let result = blocking_music(&state.music, |music| {
        music.search(TRENDING_QUERY, SearchFilter::Songs)
    })
    .await;
    or_internal("recommendations", result)
}

async fn playlists(State(state): State<AppState>) -> Json<Vec<Value>> {
    let result = blocking_music(&state.music, |music| music.library_playlists()).await;
    or_fallback("library playlists", result, Vec::new())
}

async fn moods(State(state): State<AppState>) -> Json<Value> {
    let result = blocking_music(&state.music, |music| music.mood_categories()).await;
    or_fallback("mood categories", result, Value::Object(Map::new()))
}

#[derive(Debug, Deserialize)]
struct MoodQuery {
    params: String,
}

async fn mood_playlists(
    State(state): State<AppState>,
    Query(MoodQuery { params }): Query<MoodQuery>,
) -> Json<Vec<Value>> {
    let result = blocking_music(&state.music, move |music| music.mood_playlists(&params)).await;
    or_fallback("mood playlists", result, Vec::new())
}

#[derive(Debug, Deserialize)]
struct ChartsQuery {
    country: Option<String>,
}

async fn charts(
    State(state): State<AppState>,
    Query(ChartsQuery { country }): Query<ChartsQuery>,
) -> Json<Value> {
    let result = blocking_music(&state.music, move |music| music.charts(country.as_deref())).await;
    or_fallback("charts", result, Value::Object(Map::new()))
}

#[derive(Debug, Deserialize)]
struct PodcastQuery {
    #[serde(default = "default_podcast_query")]
    q: String,
}

fn default_podcast_query() -> String {
    DEFAULT_PODCAST_QUERY.to_string()
}

async fn podcasts(
    State(state): State<AppState>,
    Query(PodcastQuery { q }): Query<PodcastQuery>,
) -> Json<Vec<Value>> {
    let result = blocking_music(&state.music, move |music| {
        music.search(&q, SearchFilter::Podcasts)
    })
    .await;
    or_fallback("podcasts", result, Vec::new())
}
