use serenity::model::id::UserId;
use tracing::debug;
use url::Url;

use super::{SourceKind, Track};
use crate::error::EngineResult;

/// Acepta URLs de SoundCloud y streams directos sin consultar ninguna API
pub struct DirectUrlClient;

impl DirectUrlClient {
    pub fn new() -> Self {
        Self
    }

    /// Crea la pista tal cual; el título sale del path de la URL
    pub fn track_from_url(&self, url: &Url, platform: SourceKind, requested_by: UserId) -> EngineResult<Track> {
        let title = Self::title_from_path(url);
        debug!("🔗 URL aceptada sin metadata ({}): {}", platform, title);

        Track::new(title, url.as_str(), platform, requested_by)
    }

    /// "https://host/music/my_song-live.mp3" -> "my song live"
    pub fn title_from_path(url: &Url) -> String {
        let segment = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(|s| urlencoding::decode(s).map(|c| c.into_owned()).unwrap_or_else(|_| s.to_string()));

        let title = segment
            .map(|s| match s.rsplit_once('.') {
                Some((stem, ext)) if !stem.is_empty() && ext.len() <= 4 => stem.to_string(),
                _ => s,
            })
            .map(|s| s.replace(['-', '_'], " ").trim().to_string())
            .filter(|s| !s.is_empty());

        title
            .or_else(|| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

impl Default for DirectUrlClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn title(raw: &str) -> String {
        DirectUrlClient::title_from_path(&Url::parse(raw).unwrap())
    }

    #[test]
    fn test_title_from_path() {
        assert_eq!(title("https://cdn.example.com/music/my_song-live.mp3"), "my song live");
        assert_eq!(title("https://soundcloud.com/artist/some-track"), "some track");
        assert_eq!(title("https://cdn.example.com/a%20b.ogg"), "a b");
        assert_eq!(title("http://radio.example.com:8000/"), "radio.example.com");
    }

    #[test]
    fn test_track_from_url() {
        let url = Url::parse("https://soundcloud.com/artist/some-track").unwrap();
        let track = DirectUrlClient::new()
            .track_from_url(&url, SourceKind::SoundCloud, UserId::new(7))
            .unwrap();

        assert_eq!(track.title(), "some track");
        assert_eq!(track.source(), SourceKind::SoundCloud);
        assert_eq!(track.stream_url().as_str(), "https://soundcloud.com/artist/some-track");
    }
}
