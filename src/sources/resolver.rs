//! Track resolution with multi-source fallback.
//!
//! Explicit URLs never fall back: a YouTube URL either yields canonical
//! metadata within the resolve timeout or fails. Free-text queries under
//! [`SourcePreference::Auto`] walk the YouTube strategy chain and then try
//! SoundCloud exactly once. A failure that looks like a bot check skips the
//! rest of the YouTube chain, since retrying would hit the same wall.

use regex::Regex;
use serenity::model::id::UserId;
use std::{sync::Arc, sync::LazyLock, time::Duration};
use tracing::{info, warn};
use url::Url;

use super::{
    classify, DirectUrlClient, MusicSource, QueryKind, SearchStrategy, SourceKind, SourcePreference, Track,
};
use crate::{
    deadline::with_timeout,
    error::{EngineError, EngineResult},
};

static BOT_CHECK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(sign in to confirm|not a bot|captcha|confirm your age|age[- ]restricted|inappropriate for some users|unusual traffic)",
    )
    .expect("regex de bot-check válida")
});

/// Detecta mensajes de error de verificación anti-bot
pub fn is_bot_check(message: &str) -> bool {
    BOT_CHECK.is_match(message)
}

pub struct TrackResolver {
    youtube: Arc<dyn MusicSource>,
    soundcloud: Arc<dyn MusicSource>,
    direct: DirectUrlClient,
    timeout: Duration,
}

impl TrackResolver {
    pub fn new(youtube: Arc<dyn MusicSource>, soundcloud: Arc<dyn MusicSource>, timeout: Duration) -> Self {
        Self {
            youtube,
            soundcloud,
            direct: DirectUrlClient::new(),
            timeout,
        }
    }

    /// Convierte una búsqueda o URL en una pista reproducible
    pub async fn resolve(&self, query: &str, preference: SourcePreference, requested_by: UserId) -> EngineResult<Track> {
        match classify(query)? {
            QueryKind::Url { url, platform } => self.resolve_url(&url, platform, requested_by).await,
            QueryKind::Search(text) => match preference {
                SourcePreference::YouTubeOnly => {
                    self.search_once(self.youtube.as_ref(), &text, SearchStrategy::Exact, requested_by)
                        .await
                }
                SourcePreference::SoundCloudOnly => {
                    self.search_once(self.soundcloud.as_ref(), &text, SearchStrategy::Exact, requested_by)
                        .await
                }
                SourcePreference::Auto => self.resolve_auto(&text, requested_by).await,
            },
        }
    }

    async fn resolve_url(&self, url: &Url, platform: SourceKind, requested_by: UserId) -> EngineResult<Track> {
        match platform {
            SourceKind::YouTube => {
                info!("📊 Metadata de URL de YouTube: {}", url);
                let hit = with_timeout(self.timeout, "youtube-metadata", self.youtube.fetch_metadata(url.as_str()))
                    .await
                    .map_err(|e| EngineError::resolution(e.to_string()))?
                    .map_err(|e| EngineError::resolution(format!("{:#}", e)))?;

                // La URL canónica puede faltar; la del usuario ya está validada
                let hit = super::SearchHit {
                    url: hit.url.or_else(|| Some(url.to_string())),
                    ..hit
                };
                hit.into_track(SourceKind::YouTube, requested_by)
            }
            SourceKind::SoundCloud | SourceKind::Direct => self.direct.track_from_url(url, platform, requested_by),
        }
    }

    async fn resolve_auto(&self, text: &str, requested_by: UserId) -> EngineResult<Track> {
        let mut youtube_error = None;

        for strategy in SearchStrategy::CHAIN {
            match self.search_once(self.youtube.as_ref(), text, strategy, requested_by).await {
                Ok(track) => return Ok(track),
                Err(e) => {
                    let message = e.to_string();
                    warn!("❌ YouTube ({:?}) falló: {}", strategy, message);
                    let bot_check = is_bot_check(&message);
                    youtube_error = Some(message);
                    if bot_check {
                        warn!("🤖 Verificación anti-bot detectada, pasando a SoundCloud");
                        break;
                    }
                }
            }
        }

        info!("🔄 Fallback a SoundCloud para: {}", text);
        self.search_once(self.soundcloud.as_ref(), text, SearchStrategy::Exact, requested_by)
            .await
            .map_err(|e| {
                EngineError::resolution(format!(
                    "YouTube: {}; SoundCloud: {}",
                    youtube_error.unwrap_or_default(),
                    e
                ))
            })
    }

    /// Una búsqueda acotada por timeout; siempre toma el primer resultado
    async fn search_once(
        &self,
        source: &dyn MusicSource,
        text: &str,
        strategy: SearchStrategy,
        requested_by: UserId,
    ) -> EngineResult<Track> {
        let hits = with_timeout(self.timeout, "search", source.search(text, strategy))
            .await
            .map_err(|e| EngineError::resolution(e.to_string()))?
            .map_err(|e| EngineError::resolution(format!("{:#}", e)))?;

        let first = hits
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::resolution(format!("sin resultados en {} para '{}'", source.kind(), text)))?;

        first.into_track(source.kind(), requested_by)
    }
}
