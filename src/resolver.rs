#![forbid(unsafe_code)]

//! Turns a media identifier into one fetchable audio URL.
//!
//! Sources are tried in order. Each one reports an [`Extraction`] or an error;
//! errors are logged and the next source runs. The first extraction that
//! yields a URL wins.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::formats::{DEFAULT_MIME_TYPE, FormatDescriptor, Ranking};

/// What a single source produced for a media identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// The source already resolved one URL; no selection needed.
    Direct {
        url: String,
        mime_type: Option<String>,
    },
    /// Candidates still to be ranked with the source's own rule.
    Candidates {
        formats: Vec<FormatDescriptor>,
        ranking: Ranking,
    },
}

impl Extraction {
    pub fn select(&self) -> Option<ResolvedStream> {
        match self {
            Extraction::Direct { url, mime_type } if !url.is_empty() => Some(ResolvedStream {
                url: url.clone(),
                mime_type: mime_type
                    .as_deref()
                    .map(crate::formats::mime_essence)
                    .filter(|mime| !mime.is_empty())
                    .unwrap_or(DEFAULT_MIME_TYPE)
                    .to_string(),
                tag: None,
            }),
            Extraction::Direct { .. } => None,
            Extraction::Candidates { formats, ranking } => {
                let best = ranking.select(formats)?;
                let url = best.url.clone()?;
                Some(ResolvedStream {
                    url,
                    mime_type: best.mime_essence().unwrap_or(DEFAULT_MIME_TYPE).to_string(),
                    tag: Some(best.tag.clone()),
                })
            }
        }
    }
}

/// The URL a relay should fetch plus the content type to announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub url: String,
    pub mime_type: String,
    pub tag: Option<String>,
}

/// A single extraction source.
///
/// Implementations are blocking (HTTP via `ureq`, child processes) and are
/// expected to run on tokio's blocking pool.
pub trait ResolveStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means the source had nothing for this identifier.
    fn extract(&self, video_id: &str) -> Result<Option<Extraction>>;
}

impl<T: ResolveStrategy + ?Sized> ResolveStrategy for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn extract(&self, video_id: &str) -> Result<Option<Extraction>> {
        (**self).extract(video_id)
    }
}

pub struct StreamResolver {
    strategies: Vec<Box<dyn ResolveStrategy>>,
}

impl StreamResolver {
    pub fn new(strategies: Vec<Box<dyn ResolveStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    /// Walks the sources in order and returns the first usable stream.
    /// `None` means no source produced a URL.
    pub fn resolve(&self, video_id: &str) -> Option<ResolvedStream> {
        for strategy in &self.strategies {
            let source = strategy.name();
            match strategy.extract(video_id) {
                Ok(Some(extraction)) => match extraction.select() {
                    Some(stream) => {
                        info!(
                            video_id,
                            source,
                            tag = stream.tag.as_deref().unwrap_or("-"),
                            mime = %stream.mime_type,
                            "resolved audio stream"
                        );
                        return Some(stream);
                    }
                    None => debug!(video_id, source, "no usable audio format"),
                },
                Ok(None) => debug!(video_id, source, "source returned nothing"),
                Err(err) => warn!(video_id, source, "extraction failed: {err:#}"),
            }
        }
        warn!(video_id, "no audio streams found");
        None
    }
}
