use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{ytdlp::YtDlp, MusicSource, SearchHit, SearchStrategy, SourceKind};

/// Cliente de SoundCloud sobre el extractor `scsearch` de yt-dlp
pub struct SoundCloudClient {
    ytdlp: YtDlp,
}

impl SoundCloudClient {
    pub fn new(ytdlp: YtDlp) -> Self {
        Self { ytdlp }
    }

    pub fn is_valid_url(url: &str) -> bool {
        url.contains("soundcloud.com")
    }
}

#[async_trait]
impl MusicSource for SoundCloudClient {
    fn kind(&self) -> SourceKind {
        SourceKind::SoundCloud
    }

    async fn search(&self, query: &str, strategy: SearchStrategy) -> Result<Vec<SearchHit>> {
        info!("🔍 Buscando en SoundCloud: {}", query);

        let target = format!("scsearch{}:{}", strategy.result_limit(), query);
        let hits: Vec<SearchHit> = self
            .ytdlp
            .dump_json(&["--flat-playlist", "--dump-json", "--skip-download"], &target)
            .await?
            .into_iter()
            .map(|info| info.into_hit())
            .collect();

        debug!("SoundCloud devolvió {} resultados", hits.len());
        Ok(hits)
    }

    async fn fetch_metadata(&self, url: &str) -> Result<SearchHit> {
        if !Self::is_valid_url(url) {
            anyhow::bail!("URL no es de SoundCloud: {}", url);
        }

        self.ytdlp
            .dump_json(&["--no-playlist", "--dump-json", "--skip-download"], url)
            .await?
            .into_iter()
            .next()
            .map(|info| info.into_hit())
            .ok_or_else(|| anyhow::anyhow!("yt-dlp no devolvió metadata para {}", url))
    }
}
