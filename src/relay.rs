#![forbid(unsafe_code)]

//! Forwards a remote audio body to the caller without buffering it whole.
//!
//! The outbound request is only sent once the response body is polled, i.e.
//! after the caller has already received its `200` headers. Failures past that
//! point can only end the body early; they are logged and never retried.

use std::convert::Infallible;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use reqwest::{Client, Response, header, redirect};
use tracing::{debug, warn};

/// Size of every chunk handed to the caller; only the last one may be shorter.
pub const RELAY_CHUNK_SIZE: usize = 128 * 1024;
/// Applies to both connecting and each read from the upstream host.
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(15);

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const MAX_REDIRECTS: usize = 10;

#[derive(Clone)]
pub struct StreamRelay {
    http: Client,
}

enum RelayState {
    Connecting {
        http: Client,
        url: String,
        label: String,
    },
    Streaming {
        response: Response,
        buffer: BytesMut,
        label: String,
        relayed: u64,
    },
    Done,
}

impl StreamRelay {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .connect_timeout(RELAY_TIMEOUT)
            .read_timeout(RELAY_TIMEOUT)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .context("building relay HTTP client")?;
        Ok(Self { http })
    }

    /// Lazily fetches `url` and yields its body in [`RELAY_CHUNK_SIZE`] pieces.
    /// `label` only shows up in logs.
    pub fn open(
        &self,
        url: String,
        label: String,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let initial = RelayState::Connecting {
            http: self.http.clone(),
            url,
            label,
        };
        futures::stream::unfold(initial, next_chunk)
    }
}

async fn connect(http: &Client, url: &str) -> reqwest::Result<Response> {
    http.get(url)
        .header(header::CONNECTION, "keep-alive")
        .send()
        .await?
        .error_for_status()
}

async fn next_chunk(mut state: RelayState) -> Option<(Result<Bytes, Infallible>, RelayState)> {
    loop {
        state = match state {
            RelayState::Connecting { http, url, label } => match connect(&http, &url).await {
                Ok(response) => {
                    debug!(label = %label, status = %response.status(), "relay connected");
                    RelayState::Streaming {
                        response,
                        buffer: BytesMut::with_capacity(RELAY_CHUNK_SIZE),
                        label,
                        relayed: 0,
                    }
                }
                Err(err) => {
                    warn!(label = %label, "relay failed before streaming: {err}");
                    return None;
                }
            },
            RelayState::Streaming {
                mut response,
                mut buffer,
                label,
                relayed,
            } => {
                // Drain full chunks before reading again so the buffer never
                // holds more than one chunk plus one upstream frame.
                if buffer.len() >= RELAY_CHUNK_SIZE {
                    let chunk = buffer.split_to(RELAY_CHUNK_SIZE).freeze();
                    let relayed = relayed + chunk.len() as u64;
                    return Some((
                        Ok(chunk),
                        RelayState::Streaming {
                            response,
                            buffer,
                            label,
                            relayed,
                        },
                    ));
                }
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        buffer.extend_from_slice(&bytes);
                        RelayState::Streaming {
                            response,
                            buffer,
                            label,
                            relayed,
                        }
                    }
                    Ok(None) => {
                        let total = relayed + buffer.len() as u64;
                        debug!(label = %label, bytes = total, "relay finished");
                        if buffer.is_empty() {
                            return None;
                        }
                        return Some((Ok(buffer.freeze()), RelayState::Done));
                    }
                    Err(err) => {
                        warn!(label = %label, bytes = relayed, "relay interrupted: {err}");
                        return None;
                    }
                }
            }
            RelayState::Done => return None,
        };
    }
}
