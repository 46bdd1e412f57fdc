use anyhow::{Context, Result};
use async_process::Command;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::SearchHit;

/// Información extraída de yt-dlp (`--dump-json`)
#[derive(Debug, Deserialize)]
pub struct YtDlpInfo {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub thumbnails: Option<Vec<Thumbnail>>,
    pub webpage_url: Option<String>,
    pub url: Option<String>,
    pub is_live: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

impl YtDlpInfo {
    /// Las entradas planas (`--flat-playlist`) solo traen `url`
    pub fn into_hit(self) -> SearchHit {
        let thumbnail = self
            .thumbnail
            .or_else(|| self.thumbnails.and_then(|t| t.into_iter().last().map(|t| t.url)));

        SearchHit {
            title: self.title.unwrap_or_else(|| "Unknown".to_string()),
            url: self.webpage_url.or(self.url),
            duration: self
                .duration
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(Duration::from_secs_f64),
            thumbnail,
        }
    }
}

/// Envoltorio compartido sobre el binario de yt-dlp
#[derive(Clone)]
pub struct YtDlp {
    binary: String,
    // Limitar procesos concurrentes para evitar rate limiting
    rate_limiter: Arc<Semaphore>,
}

impl YtDlp {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            rate_limiter: Arc::new(Semaphore::new(3)),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Ejecuta yt-dlp y parsea una línea JSON por resultado
    pub async fn dump_json(&self, args: &[&str], target: &str) -> Result<Vec<YtDlpInfo>> {
        let stdout = self.run(args, target).await?;

        let results = stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<YtDlpInfo>(line) {
                Ok(info) => Some(info),
                Err(e) => {
                    debug!("Línea de yt-dlp ignorada: {}", e);
                    None
                }
            })
            .collect();

        Ok(results)
    }

    /// URL directa del mejor formato de audio
    pub async fn media_url(&self, url: &str) -> Result<String> {
        let stdout = self
            .run(&["--no-playlist", "-f", "bestaudio/best", "--get-url"], url)
            .await?;

        let media_url = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("yt-dlp no devolvió URL de stream"))?;

        Ok(media_url)
    }

    /// Verifica que yt-dlp esté disponible
    pub async fn version(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("No se pudo ejecutar {}", self.binary))?;

        if !output.status.success() {
            anyhow::bail!("{} --version falló", self.binary);
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("✅ yt-dlp versión: {}", version);
        Ok(version)
    }

    async fn run(&self, args: &[&str], target: &str) -> Result<String> {
        let _permit = self.rate_limiter.acquire().await?;

        debug!("🔧 yt-dlp {:?} {}", args, target);

        let output = Command::new(&self.binary)
            .args(args)
            .args(["--no-warnings", "--socket-timeout", "15"])
            .arg(target)
            .kill_on_drop(true)
            .output()
            .await
            .context("Error al ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
