use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

use super::{ytdlp::YtDlp, MusicSource, SearchHit, SearchStrategy, SourceKind};

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?v=|embed/|v/|shorts/)|youtu\.be/|music\.youtube\.com/)")
        .expect("regex de YouTube válida")
});

/// Cliente para interactuar con YouTube/yt-dlp
pub struct YouTubeClient {
    ytdlp: YtDlp,
}

impl YouTubeClient {
    pub fn new(ytdlp: YtDlp) -> Self {
        Self { ytdlp }
    }

    /// Verifica si una URL es válida para YouTube
    pub fn is_youtube_url(url: &str) -> bool {
        YOUTUBE_URL.is_match(url)
    }

    /// Argumentos de yt-dlp para cada estrategia de búsqueda
    fn search_args(strategy: SearchStrategy) -> Vec<&'static str> {
        let mut args = vec!["--flat-playlist", "--dump-json", "--skip-download"];
        if strategy == SearchStrategy::Filtered {
            // Solo videos: sin directos y con duración conocida
            args.extend(["--match-filter", "!is_live & duration > 0"]);
        }
        args
    }
}

#[async_trait]
impl MusicSource for YouTubeClient {
    fn kind(&self) -> SourceKind {
        SourceKind::YouTube
    }

    async fn search(&self, query: &str, strategy: SearchStrategy) -> Result<Vec<SearchHit>> {
        info!("🔍 Buscando en YouTube ({:?}): {}", strategy, query);

        let target = format!("ytsearch{}:{}", strategy.result_limit(), query);
        let infos = self
            .ytdlp
            .dump_json(&Self::search_args(strategy), &target)
            .await?;

        let hits: Vec<SearchHit> = infos
            .into_iter()
            .filter(|info| strategy != SearchStrategy::Filtered || !info.is_live.unwrap_or(false))
            .map(|info| info.into_hit())
            .collect();

        debug!("YouTube devolvió {} resultados", hits.len());
        Ok(hits)
    }

    async fn fetch_metadata(&self, url: &str) -> Result<SearchHit> {
        if !Self::is_youtube_url(url) {
            anyhow::bail!("URL no es de YouTube: {}", url);
        }

        debug!("📊 Obteniendo info de: {}", url);

        let info = self
            .ytdlp
            .dump_json(&["--no-playlist", "--dump-json", "--skip-download"], url)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("yt-dlp no devolvió metadata para {}", url))?;

        Ok(info.into_hit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_url_detection() {
        assert!(YouTubeClient::is_youtube_url(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        ));
        assert!(YouTubeClient::is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(YouTubeClient::is_youtube_url(
            "https://music.youtube.com/watch?v=test"
        ));
        assert!(!YouTubeClient::is_youtube_url("https://example.com/video"));
    }

    #[test]
    fn test_filtered_strategy_adds_match_filter() {
        assert!(!YouTubeClient::search_args(SearchStrategy::Exact).contains(&"--match-filter"));
        assert!(YouTubeClient::search_args(SearchStrategy::Filtered).contains(&"--match-filter"));
        assert!(!YouTubeClient::search_args(SearchStrategy::Widened).contains(&"--match-filter"));
    }
}
