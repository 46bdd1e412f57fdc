//! # Playback Controller
//!
//! Drives a guild's player through `Idle -> Playing <-> Paused`, reacting to
//! natural-end and error events delivered over a per-connection channel.
//!
//! Every started resource gets a fresh token. Events carry the token they were
//! issued for and are dropped unless it matches the guild's active token, so a
//! resource that was stopped, replaced or abandoned on a ready timeout can never
//! advance the queue twice.
//!
//! Advancing is a bounded loop: at most `pending.len()` attempts per call, each
//! failed track discarded with its error recorded in `last_error`.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        connection::ConnectionManager,
        queue::{LoopMode, PlayerStatus, QueueSnapshot, QueueState},
        registry::{GuildQueue, QueueRegistry},
    },
    config::Timeouts,
    deadline::with_timeout,
    error::{EngineError, EngineResult},
    sources::{SourceKind, Track},
};

/// Volumen validado en [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Volume(u8);

impl Volume {
    pub const MAX: u8 = 100;

    pub fn level(&self) -> u8 {
        self.0
    }

    /// Ganancia lineal: 0 -> 0.0, 100 -> 1.0
    pub fn gain(&self) -> f32 {
        f32::from(self.0) / f32::from(Self::MAX)
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self(50)
    }
}

impl TryFrom<i64> for Volume {
    type Error = EngineError;

    fn try_from(level: i64) -> Result<Self, Self::Error> {
        match u8::try_from(level) {
            Ok(level) if level <= Self::MAX => Ok(Self(level)),
            _ => Err(EngineError::validation(format!(
                "el volumen debe estar entre 0 y {} (recibido {})",
                Self::MAX,
                level
            ))),
        }
    }
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

fn next_token() -> u64 {
    NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEventKind {
    /// Fin natural (o forzado con `stop`)
    Finished,
    Errored(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEvent {
    pub token: u64,
    pub kind: PlayerEventKind,
}

pub type PlayerEventSender = mpsc::UnboundedSender<PlayerEvent>;

/// Forma de convertir la URL de una pista en audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePath {
    Primary,
    /// Solo YouTube: URL de medios directa vía yt-dlp, luego HTTP
    Secondary,
}

impl DecodePath {
    pub fn for_source(source: SourceKind) -> &'static [DecodePath] {
        match source {
            SourceKind::YouTube => &[DecodePath::Primary, DecodePath::Secondary],
            SourceKind::SoundCloud | SourceKind::Direct => &[DecodePath::Primary],
        }
    }
}

/// Reproductor suscrito a una conexión de voz
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Adjunta un recurso nuevo. Sus eventos se emiten con `token`.
    async fn play(&self, track: &Track, path: DecodePath, token: u64) -> EngineResult<Box<dyn ActiveTrack>>;
}

/// Recurso de audio adjunto al reproductor
#[async_trait]
pub trait ActiveTrack: Send + Sync {
    /// Resuelve cuando el reproductor confirma `Playing`
    async fn wait_until_playing(&self) -> EngineResult<()>;

    fn pause(&self) -> EngineResult<()>;

    fn resume(&self) -> EngineResult<()>;

    /// Detiene el recurso; emite `Finished` con su token
    fn stop(&self);

    fn supports_gain(&self) -> bool;

    fn set_gain(&self, gain: f32) -> EngineResult<()>;
}

/// Resultado estructurado de `play` para la capa de comandos
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayOutcome {
    pub track_title: String,
    /// 0 si empezó a sonar; si no, posición 1-based en la cola
    pub queue_position: usize,
    pub started: bool,
}

#[derive(Clone)]
pub struct PlaybackController {
    registry: Arc<QueueRegistry>,
    connections: Arc<ConnectionManager>,
    timeouts: Timeouts,
}

impl PlaybackController {
    pub fn new(registry: Arc<QueueRegistry>, connections: Arc<ConnectionManager>, timeouts: Timeouts) -> Self {
        Self {
            registry,
            connections,
            timeouts,
        }
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    /// Conecta si hace falta, encola y arranca si el guild estaba inactivo
    pub async fn play(&self, guild_id: GuildId, channel_id: ChannelId, track: Track) -> EngineResult<PlayOutcome> {
        let queue = self.registry.get_or_create(guild_id);
        let mut state = queue.lock().await;

        self.connections
            .ensure_connected(&mut state, channel_id, || self.spawn_events(guild_id))
            .await?;

        let track_title = track.title().to_string();
        let position = state.enqueue(track)?;

        if state.active().is_some() || state.current().is_some() {
            return Ok(PlayOutcome {
                track_title,
                queue_position: position,
                started: false,
            });
        }

        let skipped = self.start_locked(&mut state).await?;
        let started = position == 1 && skipped == 0;

        Ok(PlayOutcome {
            track_title,
            queue_position: if started { 0 } else { position.saturating_sub(skipped + 1) },
            started,
        })
    }

    /// Arranca la siguiente pista si no hay nada sonando
    pub async fn start(&self, guild_id: GuildId) -> EngineResult<()> {
        let queue = self.existing(guild_id)?;
        let mut state = queue.lock().await;

        if state.active().is_some() {
            debug!("start ignorado: guild {} ya está reproduciendo", guild_id);
            return Ok(());
        }
        self.start_locked(&mut state).await.map(|_| ())
    }

    pub async fn pause(&self, guild_id: GuildId) -> EngineResult<()> {
        let queue = self.existing(guild_id)?;
        let mut state = queue.lock().await;

        if state.status() != PlayerStatus::Playing {
            return Err(EngineError::control("no hay nada reproduciéndose"));
        }
        let active = state.active().ok_or_else(|| EngineError::control("no hay nada reproduciéndose"))?;
        active.track.pause()?;
        state.set_status(PlayerStatus::Paused);

        info!("⏸️ Pausado en guild {}", guild_id);
        Ok(())
    }

    pub async fn resume(&self, guild_id: GuildId) -> EngineResult<()> {
        let queue = self.existing(guild_id)?;
        let mut state = queue.lock().await;

        if state.status() != PlayerStatus::Paused {
            return Err(EngineError::control("la reproducción no está pausada"));
        }
        let active = state.active().ok_or_else(|| EngineError::control("la reproducción no está pausada"))?;
        active.track.resume()?;
        state.set_status(PlayerStatus::Playing);

        info!("▶️ Reanudado en guild {}", guild_id);
        Ok(())
    }

    /// Detiene el recurso actual; el evento de fin hace avanzar la cola.
    /// Devuelve el título saltado.
    pub async fn skip(&self, guild_id: GuildId) -> EngineResult<String> {
        let queue = self.existing(guild_id)?;
        let state = queue.lock().await;

        let active = state.active().ok_or_else(|| EngineError::control("no hay nada que saltar"))?;
        let title = state.current().map(|t| t.title().to_string()).unwrap_or_default();
        active.track.stop();

        info!("⏭️ Saltando en guild {}: {}", guild_id, title);
        Ok(title)
    }

    /// Cambia la ganancia del recurso activo y la recuerda para los siguientes
    pub async fn volume(&self, guild_id: GuildId, volume: Volume) -> EngineResult<()> {
        let queue = self.existing(guild_id)?;
        let mut state = queue.lock().await;

        let active = state.active().ok_or_else(|| EngineError::control("no hay nada reproduciéndose"))?;
        if !active.track.supports_gain() {
            return Err(EngineError::control("el recurso actual no permite cambiar el volumen"));
        }
        active.track.set_gain(volume.gain())?;
        state.set_volume(volume);

        info!("🔊 Volumen en guild {}: {}%", guild_id, volume.level());
        Ok(())
    }

    pub async fn set_loop_mode(&self, guild_id: GuildId, mode: LoopMode) -> EngineResult<LoopMode> {
        let queue = self.existing(guild_id)?;
        queue.lock().await.set_loop_mode(mode);
        Ok(mode)
    }

    /// `true` repite la cola completa, `false` desactiva la repetición
    pub async fn set_loop(&self, guild_id: GuildId, enabled: bool) -> EngineResult<LoopMode> {
        let mode = if enabled { LoopMode::Queue } else { LoopMode::Off };
        self.set_loop_mode(guild_id, mode).await
    }

    /// Detiene todo y destruye el estado del guild
    pub async fn stop(&self, guild_id: GuildId) {
        info!("⏹️ Stop en guild {}", guild_id);
        self.registry.destroy(guild_id).await;
    }

    pub async fn leave(&self, guild_id: GuildId) {
        info!("👋 Saliendo del canal de voz en guild {}", guild_id);
        self.registry.destroy(guild_id).await;
    }

    /// Lectura sin bloqueo: no espera a operaciones en curso del guild
    pub fn snapshot(&self, guild_id: GuildId) -> Option<QueueSnapshot> {
        self.registry.get(guild_id).map(|queue| queue.snapshot())
    }

    fn existing(&self, guild_id: GuildId) -> EngineResult<GuildQueue> {
        self.registry
            .get(guild_id)
            .ok_or_else(|| EngineError::control("no hay una cola activa en este servidor"))
    }

    /// Canal de eventos del reproductor para una conexión nueva
    fn spawn_events(&self, guild_id: GuildId) -> PlayerEventSender {
        let (tx, mut rx) = mpsc::unbounded_channel::<PlayerEvent>();
        let controller = self.clone();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                controller.handle_event(guild_id, event).await;
            }
            debug!("Canal de eventos cerrado para guild {}", guild_id);
        });

        tx
    }

    /// Procesa un evento del reproductor si pertenece al recurso activo
    pub(crate) async fn handle_event(&self, guild_id: GuildId, event: PlayerEvent) {
        let Some(queue) = self.registry.get(guild_id) else {
            return;
        };
        let mut state = queue.lock().await;

        if state.active_token() != Some(event.token) {
            debug!("Evento obsoleto ignorado en guild {} (token {})", guild_id, event.token);
            return;
        }
        state.take_active();

        match event.kind {
            PlayerEventKind::Finished => {
                if let Some(track) = state.current() {
                    info!("🏁 Terminó en guild {}: {}", guild_id, track.title());
                }
                state.requeue_finished();
            }
            PlayerEventKind::Errored(message) => {
                error!("❌ Error del reproductor en guild {}: {}", guild_id, message);
                state.record_error(EngineError::playback(message));
                state.set_status(PlayerStatus::Errored);
                // Una pista fallida nunca se reinserta
                state.discard_current();
            }
        }

        if let Err(e) = self.start_locked(&mut state).await {
            warn!("⚠️ Cola agotada sin reproducir en guild {}: {}", guild_id, e);
        }
    }

    /// Avance acotado: como mucho `pending.len()` intentos.
    /// Devuelve cuántas pistas fallaron antes de la que empezó.
    async fn start_locked(&self, state: &mut QueueState) -> EngineResult<usize> {
        let guild_id = state.guild_id();
        let attempts = state.pending_len();
        let mut failures = 0;
        let mut last_failure = None;

        for _ in 0..attempts {
            let Some(track) = state.pop_next() else {
                break;
            };

            match self.play_track(state, &track).await {
                Ok(()) => return Ok(failures),
                Err(e) => {
                    warn!("⚠️ No se pudo reproducir en guild {}: {} ({})", guild_id, track.title(), e);
                    state.record_error(e.clone());
                    state.set_status(PlayerStatus::Errored);
                    state.discard_current();
                    failures += 1;
                    last_failure = Some(e);
                }
            }
        }

        debug!("📭 Cola vacía en guild {}", guild_id);
        state.go_idle();

        match last_failure {
            Some(e) => Err(e),
            None => Ok(0),
        }
    }

    async fn play_track(&self, state: &mut QueueState, track: &Track) -> EngineResult<()> {
        let connection = state
            .connection()
            .cloned()
            .ok_or_else(|| EngineError::playback("no hay conexión de voz"))?;
        let sink = connection.player();
        let mut last_error = None;

        for path in DecodePath::for_source(track.source()) {
            let token = next_token();

            match self.attach(sink.as_ref(), track, *path, token).await {
                Ok(active) => {
                    if active.supports_gain() {
                        if let Err(e) = active.set_gain(state.volume().gain()) {
                            warn!("No se pudo aplicar el volumen inicial: {}", e);
                        }
                    }
                    state.set_active(token, active);
                    state.set_status(PlayerStatus::Playing);
                    info!("🎵 Reproduciendo en guild {}: {}", state.guild_id(), track.title());
                    return Ok(());
                }
                Err(e) => {
                    debug!("Ruta {:?} falló para {}: {}", path, track.title(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| EngineError::playback("sin rutas de decodificación")))
    }

    /// Adjunta el recurso y espera a que el reproductor confirme `Playing`
    async fn attach(
        &self,
        sink: &dyn AudioSink,
        track: &Track,
        path: DecodePath,
        token: u64,
    ) -> EngineResult<Box<dyn ActiveTrack>> {
        let active = sink.play(track, path, token).await?;

        match with_timeout(self.timeouts.player_ready, "player-ready", active.wait_until_playing()).await {
            Ok(Ok(())) => Ok(active),
            Ok(Err(e)) => {
                active.stop();
                Err(e)
            }
            Err(timed_out) => {
                active.stop();
                Err(EngineError::playback(timed_out.to_string()))
            }
        }
    }
}
