use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use url::Url;

use super::{MediaResolver, ResolutionError, Track};

/// Resolver respaldado por el binario `yt-dlp`.
pub struct YtDlpResolver {
    binary: String,
    // Limitar procesos concurrentes para evitar rate limiting
    rate_limiter: tokio::sync::Semaphore,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    entries: Option<Vec<YtDlpInfo>>,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            rate_limiter: tokio::sync::Semaphore::new(3),
        }
    }

    /// Verifica que yt-dlp esté disponible y funcional
    pub async fn verify(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.binary).arg("--version").output().await?;
        if !output.status.success() {
            anyhow::bail!("{} --version exited with {}", self.binary, output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<Track, ResolutionError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ResolutionError::Failed(e.to_string()))?;

        let target = search_target(query);
        info!("🔍 Resolviendo con yt-dlp: {}", target);

        let output = Command::new(&self.binary)
            .args([
                "--dump-single-json",
                "--no-playlist",
                "--format",
                "bestaudio/best",
                "--default-search",
                "ytsearch1",
                "--no-warnings",
                "--quiet",
                target.as_str(),
            ])
            // Si el timeout descarta este future, el proceso muere con él
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ResolutionError::Failed(format!("could not run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp falló para {}: {}", query, stderr.trim());
            return Err(ResolutionError::Failed(error_message(&stderr)));
        }

        let track = parse_output(query, &output.stdout)?;
        debug!("✅ Resuelto {} -> {}", query, track.title());
        Ok(track)
    }

    fn source_name(&self) -> &'static str {
        "yt-dlp"
    }
}

/// URLs se pasan tal cual; todo lo demás se convierte en búsqueda del primer resultado.
fn search_target(query: &str) -> String {
    let query = query.trim();
    match Url::parse(query) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => query.to_string(),
        _ => format!("ytsearch1:{}", query),
    }
}

fn parse_output(query: &str, stdout: &[u8]) -> Result<Track, ResolutionError> {
    let info: YtDlpInfo = serde_json::from_slice(stdout)
        .map_err(|e| ResolutionError::Failed(format!("unreadable yt-dlp output: {}", e)))?;

    // Las búsquedas devuelven una lista de entradas; nos quedamos con el primer resultado
    let info = match info.entries {
        Some(entries) => entries
            .into_iter()
            .next()
            .ok_or_else(|| ResolutionError::NotFound(query.to_string()))?,
        None => info,
    };

    let stream_url = info
        .url
        .ok_or_else(|| ResolutionError::NotFound(query.to_string()))?;
    let title = info.title.unwrap_or_else(|| query.to_string());
    let page_url = info.webpage_url.unwrap_or_else(|| query.to_string());

    Ok(Track::new(title, stream_url, page_url))
}

fn error_message(stderr: &str) -> String {
    static ERROR_LINE: OnceLock<Regex> = OnceLock::new();
    let re = ERROR_LINE.get_or_init(|| Regex::new(r"(?m)^ERROR:\s*(.+)$").expect("valid regex"));

    re.captures(stderr)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| {
            let trimmed = stderr.trim();
            if trimmed.is_empty() {
                "yt-dlp exited without output".to_string()
            } else {
                trimmed.to_string()
            }
        })
}
