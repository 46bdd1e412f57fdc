//! # Sources Module
//!
//! Turns user queries into playable [`Track`]s.
//!
//! - [`youtube`] / [`soundcloud`]: yt-dlp backed search and metadata clients
//! - [`direct_url`]: accepts SoundCloud pages and plain stream URLs as-is
//! - [`resolver`]: classification plus the multi-source fallback chain
//!
//! Every track that leaves this module carries a validated absolute
//! `http(s)` stream URL.

pub mod direct_url;
pub mod resolver;
pub mod soundcloud;
pub mod youtube;
pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::{fmt, str::FromStr, time::Duration};
use url::Url;

use crate::error::{EngineError, EngineResult};

pub use direct_url::DirectUrlClient;
pub use resolver::TrackResolver;
pub use soundcloud::SoundCloudClient;
pub use youtube::YouTubeClient;
pub use ytdlp::YtDlp;

/// Plataforma de origen de una pista
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    YouTube,
    SoundCloud,
    Direct,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::YouTube => "youtube",
            SourceKind::SoundCloud => "soundcloud",
            SourceKind::Direct => "direct",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preferencia de fuente para búsquedas de texto libre
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourcePreference {
    #[default]
    Auto,
    YouTubeOnly,
    SoundCloudOnly,
}

impl FromStr for SourcePreference {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "youtube" => Ok(Self::YouTubeOnly),
            "soundcloud" => Ok(Self::SoundCloudOnly),
            other => Err(EngineError::validation(format!("fuente desconocida: {}", other))),
        }
    }
}

/// Pista resuelta y lista para reproducir. Inmutable una vez creada.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    title: String,
    stream_url: Url,
    source: SourceKind,
    duration: Option<Duration>,
    thumbnail: Option<String>,
    requested_by: UserId,
    added_at: DateTime<Utc>,
}

impl Track {
    /// Crea una pista validando la URL de stream
    pub fn new(
        title: impl Into<String>,
        stream_url: &str,
        source: SourceKind,
        requested_by: UserId,
    ) -> EngineResult<Self> {
        let stream_url = validate_stream_url(stream_url)?;
        let title = title.into();
        let title = if title.trim().is_empty() {
            "Unknown".to_string()
        } else {
            title.trim().to_string()
        };

        Ok(Self {
            title,
            stream_url,
            source,
            duration: None,
            thumbnail: None,
            requested_by,
            added_at: Utc::now(),
        })
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: String) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    // Getters
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn stream_url(&self) -> &Url {
        &self.stream_url
    }
    pub fn source(&self) -> SourceKind {
        self.source
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn duration_seconds(&self) -> u64 {
        self.duration.map(|d| d.as_secs()).unwrap_or(0)
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }
    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }
}

/// Valida que `raw` sea una URL absoluta http(s), nunca un identificador suelto
/// ni literales como "undefined" o "null".
pub fn validate_stream_url(raw: &str) -> EngineResult<Url> {
    let raw = raw.trim();

    if raw.is_empty() || raw.eq_ignore_ascii_case("undefined") || raw.eq_ignore_ascii_case("null") {
        return Err(EngineError::validation(format!("URL de stream inválida: {:?}", raw)));
    }

    let url = Url::parse(raw)
        .map_err(|e| EngineError::validation(format!("URL de stream mal formada ({}): {}", e, raw)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(EngineError::validation(format!("URL de stream no soportada: {}", raw)));
    }

    Ok(url)
}

/// Resultado de clasificar la entrada del usuario
#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
    Url { url: Url, platform: SourceKind },
    Search(String),
}

/// Decide si la entrada es una URL y, si lo es, de qué plataforma
pub fn classify(input: &str) -> EngineResult<QueryKind> {
    let input = input.trim();
    if input.is_empty() {
        return Err(EngineError::validation("la búsqueda está vacía"));
    }

    let lower = input.to_ascii_lowercase();
    let input = if lower.starts_with("http://") || lower.starts_with("https://") {
        input.to_string()
    } else if is_schemeless_platform_link(&lower) {
        format!("https://{}", input)
    } else {
        return Ok(QueryKind::Search(input.to_string()));
    };

    let url = validate_stream_url(&input)?;
    let platform = platform_of(&url);

    Ok(QueryKind::Url { url, platform })
}

/// `youtu.be/...` o `www.youtube.com/watch?...` pegados sin esquema
fn is_schemeless_platform_link(lower: &str) -> bool {
    const HOSTS: [&str; 3] = ["youtube.com/", "youtu.be/", "soundcloud.com/"];

    if lower.contains(char::is_whitespace) {
        return false;
    }
    let host = ["www.", "m.", "music."]
        .iter()
        .fold(lower, |rest, prefix| rest.strip_prefix(*prefix).unwrap_or(rest));

    HOSTS.iter().any(|h| host.starts_with(h))
}

/// Plataforma según el host de la URL
pub fn platform_of(url: &Url) -> SourceKind {
    let host = url
        .host_str()
        .unwrap_or_default()
        .trim_start_matches("www.")
        .to_ascii_lowercase();

    match host.as_str() {
        "youtube.com" | "m.youtube.com" | "music.youtube.com" | "youtu.be" => SourceKind::YouTube,
        "soundcloud.com" | "m.soundcloud.com" | "on.soundcloud.com" => SourceKind::SoundCloud,
        _ => SourceKind::Direct,
    }
}

/// Estrategias de búsqueda, de la más precisa a la más amplia
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Un único resultado exacto
    Exact,
    /// Solo videos (sin directos ni playlists)
    Filtered,
    /// Más resultados, primer candidato válido
    Widened,
}

impl SearchStrategy {
    /// Cadena de escalado usada en modo `auto`
    pub const CHAIN: [SearchStrategy; 3] = [Self::Exact, Self::Filtered, Self::Widened];

    pub fn result_limit(&self) -> usize {
        match self {
            Self::Exact => 1,
            Self::Filtered => 5,
            Self::Widened => 10,
        }
    }
}

/// Resultado crudo de una búsqueda o consulta de metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: Option<String>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
}

impl SearchHit {
    /// Convierte el resultado en una pista. Falla si no trae URL válida.
    pub fn into_track(self, source: SourceKind, requested_by: UserId) -> EngineResult<Track> {
        let url = self
            .url
            .ok_or_else(|| EngineError::resolution(format!("'{}' no tiene URL de stream", self.title)))?;

        let mut track = Track::new(self.title, &url, source, requested_by)
            .map_err(|e| EngineError::resolution(e.to_string()))?;

        if let Some(duration) = self.duration {
            track = track.with_duration(duration);
        }
        if let Some(thumbnail) = self.thumbnail {
            track = track.with_thumbnail(thumbnail);
        }

        Ok(track)
    }
}

/// Trait común para las fuentes con búsqueda
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MusicSource: Send + Sync {
    /// Plataforma que atiende este cliente
    fn kind(&self) -> SourceKind;

    /// Busca pistas; el primer resultado es el preferido
    async fn search(&self, query: &str, strategy: SearchStrategy) -> Result<Vec<SearchHit>>;

    /// Metadata canónica de una URL concreta
    async fn fetch_metadata(&self, url: &str) -> Result<SearchHit>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rejects_bogus_stream_urls() {
        for raw in ["", "   ", "undefined", "null", "NULL", "dQw4w9WgXcQ", "/relative/path", "ftp://host/file.mp3"] {
            assert!(validate_stream_url(raw).is_err(), "debería rechazar {:?}", raw);
        }
        assert!(validate_stream_url("https://cdn.example.com/a.mp3").is_ok());
    }

    #[test]
    fn test_classify_urls() {
        let cases = [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", SourceKind::YouTube),
            ("https://youtu.be/dQw4w9WgXcQ", SourceKind::YouTube),
            ("https://music.youtube.com/watch?v=x", SourceKind::YouTube),
            ("https://soundcloud.com/artist/song", SourceKind::SoundCloud),
            ("http://radio.example.com:8000/stream", SourceKind::Direct),
        ];

        for (input, expected) in cases {
            match classify(input).unwrap() {
                QueryKind::Url { platform, .. } => assert_eq!(platform, expected, "{}", input),
                other => panic!("{} clasificado como {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_classify_links_without_scheme() {
        let cases = [
            ("www.youtube.com/watch?v=dQw4w9WgXcQ", SourceKind::YouTube),
            ("youtu.be/dQw4w9WgXcQ", SourceKind::YouTube),
            ("music.youtube.com/watch?v=x", SourceKind::YouTube),
            ("soundcloud.com/artist/song", SourceKind::SoundCloud),
        ];

        for (input, expected) in cases {
            match classify(input).unwrap() {
                QueryKind::Url { url, platform } => {
                    assert_eq!(platform, expected, "{}", input);
                    assert_eq!(url.scheme(), "https");
                }
                other => panic!("{} clasificado como {:?}", input, other),
            }
        }

        // Texto que solo menciona la plataforma sigue siendo búsqueda
        assert!(matches!(classify("youtube.com/ lofi mix"), Ok(QueryKind::Search(_))));
        assert!(matches!(classify("youtube.com"), Ok(QueryKind::Search(_))));
    }

    #[test]
    fn test_classify_search_text() {
        assert_eq!(
            classify("  never gonna give you up ").unwrap(),
            QueryKind::Search("never gonna give you up".to_string())
        );
        assert!(matches!(classify("   "), Err(EngineError::Validation(_))));
        assert!(matches!(classify("https://"), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_hit_without_url_is_rejected() {
        let hit = SearchHit {
            title: "sin url".into(),
            ..Default::default()
        };
        assert!(matches!(
            hit.into_track(SourceKind::YouTube, UserId::new(1)),
            Err(EngineError::Resolution(_))
        ));

        let hit = SearchHit {
            title: "literal".into(),
            url: Some("undefined".into()),
            ..Default::default()
        };
        assert!(hit.into_track(SourceKind::YouTube, UserId::new(1)).is_err());
    }

    #[test]
    fn test_hit_into_track_keeps_metadata() {
        let hit = SearchHit {
            title: "Song".into(),
            url: Some("https://www.youtube.com/watch?v=abc".into()),
            duration: Some(Duration::from_secs(212)),
            thumbnail: Some("https://i.ytimg.com/vi/abc/hq.jpg".into()),
        };
        let track = hit.into_track(SourceKind::YouTube, UserId::new(42)).unwrap();

        assert_eq!(track.title(), "Song");
        assert_eq!(track.duration_seconds(), 212);
        assert_eq!(track.thumbnail(), Some("https://i.ytimg.com/vi/abc/hq.jpg"));
        assert_eq!(track.requested_by(), UserId::new(42));
    }

    #[test]
    fn test_source_preference_parsing() {
        assert_eq!("auto".parse::<SourcePreference>().unwrap(), SourcePreference::Auto);
        assert_eq!("YouTube".parse::<SourcePreference>().unwrap(), SourcePreference::YouTubeOnly);
        assert_eq!("soundcloud".parse::<SourcePreference>().unwrap(), SourcePreference::SoundCloudOnly);
        assert!("spotify".parse::<SourcePreference>().is_err());
    }
}
