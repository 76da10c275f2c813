use anyhow::{Context, Result};
use std::time::Duration;

use crate::{audio::WorkerSettings, bot::dispatcher::DispatchSettings};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Reproducción
    pub poll_interval: Duration,
    pub resolve_timeout: Duration,
    pub default_volume: f32,
    pub max_volume_percent: u32,

    // Resolver
    pub ytdlp_path: String,

    // Rendimiento
    pub worker_threads: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            command_prefix: std::env::var("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            poll_interval: env_duration("POLL_INTERVAL", defaults.poll_interval)?,
            resolve_timeout: env_duration("RESOLVE_TIMEOUT", defaults.resolve_timeout)?,
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| defaults.default_volume.to_string())
                .parse()
                .context("DEFAULT_VOLUME inválido")?,
            max_volume_percent: std::env::var("MAX_VOLUME_PERCENT")
                .unwrap_or_else(|_| defaults.max_volume_percent.to_string())
                .parse()
                .context("MAX_VOLUME_PERCENT inválido")?,

            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),

            worker_threads: match std::env::var("WORKER_THREADS") {
                Ok(val) if !val.trim().is_empty() => val.parse().context("WORKER_THREADS inválido")?,
                _ => defaults.worker_threads,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Command prefix must not be empty or contain whitespace
    /// - Poll interval and resolve timeout must be non-zero
    /// - Default volume must be between 0.0 and 2.0
    /// - Worker threads must be > 0
    pub fn validate(&self) -> Result<()> {
        if self.command_prefix.is_empty() || self.command_prefix.chars().any(char::is_whitespace) {
            anyhow::bail!("Command prefix must be non-empty without spaces, got: {:?}", self.command_prefix);
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("Poll interval must be greater than 0");
        }

        if self.resolve_timeout.is_zero() {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.worker_threads == 0 {
            anyhow::bail!("Worker threads must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix {:?}\n  \
            Playback: poll every {}, {}% default vol, {}% max vol\n  \
            Resolver: {} (timeout {})\n  \
            Runtime: {} worker threads",
            self.command_prefix,
            humantime::format_duration(self.poll_interval),
            (self.default_volume * 100.0).round() as u32,
            self.max_volume_percent,
            self.ytdlp_path,
            humantime::format_duration(self.resolve_timeout),
            self.worker_threads,
        )
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            poll_interval: self.poll_interval,
            default_volume: self.default_volume,
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            resolve_timeout: self.resolve_timeout,
            max_volume_percent: self.max_volume_percent,
            prefix: self.command_prefix.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin default para el token)
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            poll_interval: Duration::from_secs(1),
            resolve_timeout: Duration::from_secs(30),
            default_volume: 1.0,
            max_volume_percent: 200,

            ytdlp_path: "yt-dlp".to_string(),

            worker_threads: num_cpus::get(),
        }
    }
}

fn env_duration(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => humantime::parse_duration(raw.trim())
            .with_context(|| format!("{} inválido: {:?}", key, raw)),
        _ => Ok(default),
    }
}
