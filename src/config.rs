use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Límites de espera para cada llamada externa bloqueante.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Timeouts {
    /// Búsqueda o consulta de metadata
    pub resolve: Duration,
    /// Espera hasta que la conexión de voz queda `Ready`
    pub connect: Duration,
    /// Ventana de gracia tras una desconexión inesperada
    pub reconnect_grace: Duration,
    /// Espera hasta que el reproductor confirma `Playing`
    pub player_ready: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            resolve: Duration::from_secs(20),
            connect: Duration::from_secs(15),
            reconnect_grace: Duration::from_secs(5),
            player_ready: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: u8,
    pub max_queue_size: usize,

    // Resolución
    pub ytdlp_path: String,

    // Tiempos
    pub timeouts: Timeouts,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Timeouts::default();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            application_id: std::env::var("APPLICATION_ID")
                .context("APPLICATION_ID no definido")?
                .parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Audio
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,

            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),

            timeouts: Timeouts {
                resolve: duration_var("RESOLVE_TIMEOUT", defaults.resolve)?,
                connect: duration_var("CONNECT_TIMEOUT", defaults.connect)?,
                reconnect_grace: duration_var("RECONNECT_GRACE", defaults.reconnect_grace)?,
                player_ready: duration_var("PLAYER_READY_TIMEOUT", defaults.player_ready)?,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Default volume must be between 0 and 100
    /// - Queue size must be greater than 0
    /// - Every timeout must be non-zero
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 100 {
            anyhow::bail!("Default volume must be between 0 and 100, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.ytdlp_path.trim().is_empty() {
            anyhow::bail!("YTDLP_PATH cannot be empty");
        }

        let timeouts = [
            ("RESOLVE_TIMEOUT", self.timeouts.resolve),
            ("CONNECT_TIMEOUT", self.timeouts.connect),
            ("RECONNECT_GRACE", self.timeouts.reconnect_grace),
            ("PLAYER_READY_TIMEOUT", self.timeouts.player_ready),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}% vol, {} max queue\n  \
            Timeouts: resolve {}, connect {}, grace {}, player {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_volume,
            self.max_queue_size,
            humantime::format_duration(self.timeouts.resolve),
            humantime::format_duration(self.timeouts.connect),
            humantime::format_duration(self.timeouts.reconnect_grace),
            humantime::format_duration(self.timeouts.player_ready),
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_volume: 50,
            max_queue_size: 1000,

            ytdlp_path: "yt-dlp".to_string(),

            timeouts: Timeouts::default(),
        }
    }
}

fn duration_var(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(val) if !val.trim().is_empty() => humantime::parse_duration(val.trim())
            .with_context(|| format!("{} no es una duración válida: {}", name, val)),
        _ => Ok(default),
    }
}
