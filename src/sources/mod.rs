pub mod ytdlp;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use ytdlp::YtDlpResolver;

/// Un track resuelto y listo para entregar al transporte de audio.
///
/// Inmutable una vez creado: el resolver lo construye, la cola lo guarda y el
/// worker lo consume durante la reproducción.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    title: String,
    stream_url: String,
    page_url: String,
}

impl Track {
    pub fn new(
        title: impl Into<String>,
        stream_url: impl Into<String>,
        page_url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            stream_url: stream_url.into(),
            page_url: page_url.into(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Opaque reference handed to the transport when building a source.
    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    /// Canonical page for display purposes.
    pub fn page_url(&self) -> &str {
        &self.page_url
    }
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("no results found for \"{0}\"")]
    NotFound(String),
    #[error("resolver failed: {0}")]
    Failed(String),
    #[error("resolver timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),
}

/// Turns a search query or URL into a playable [`Track`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<Track, ResolutionError>;

    /// Nombre de la fuente, solo para logs
    fn source_name(&self) -> &'static str;
}

/// Resolves `query` bounded by `limit`.
///
/// The resolver is usually a network call (or a child process doing one), so
/// callers never wait on it unbounded.
pub async fn resolve_with_timeout<R>(
    resolver: &R,
    query: &str,
    limit: Duration,
) -> Result<Track, ResolutionError>
where
    R: MediaResolver + ?Sized,
{
    match tokio::time::timeout(limit, resolver.resolve(query)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                "⏰ {} no respondió en {} para: {}",
                resolver.source_name(),
                humantime::format_duration(limit),
                query
            );
            Err(ResolutionError::Timeout(limit))
        }
    }
}
