use serenity::model::id::GuildId;
use std::{collections::VecDeque, fmt, str::FromStr, sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::{
    audio::{
        connection::VoiceConnection,
        player::{ActiveTrack, Volume},
    },
    error::{EngineError, EngineResult},
    sources::Track,
};

/// Estado observable del reproductor de un guild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Idle,
    Playing,
    Paused,
    /// Transitorio: un fallo capturado mientras se avanza a la siguiente pista
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    /// La pista terminada vuelve a la cabeza de la cola
    Track,
    /// La pista terminada vuelve al final de la cola
    Queue,
}

impl FromStr for LoopMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "track" => Ok(Self::Track),
            "queue" => Ok(Self::Queue),
            other => Err(EngineError::validation(format!("modo de repetición desconocido: {}", other))),
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoopMode::Off => "desactivado",
            LoopMode::Track => "canción",
            LoopMode::Queue => "cola",
        })
    }
}

/// Pista en reproducción junto a su token de eventos
pub(crate) struct ActiveHandle {
    pub(crate) token: u64,
    pub(crate) track: Box<dyn ActiveTrack>,
}

/// Estado mutable de un guild. Solo el registro y el controlador lo modifican.
pub struct QueueState {
    guild_id: GuildId,
    pending: VecDeque<Track>,
    current: Option<Track>,
    connection: Option<Arc<dyn VoiceConnection>>,
    active: Option<ActiveHandle>,
    status: PlayerStatus,
    loop_mode: LoopMode,
    last_error: Option<EngineError>,
    volume: Volume,
    max_size: usize,
}

impl QueueState {
    pub(crate) fn new(guild_id: GuildId, max_size: usize, volume: Volume) -> Self {
        Self {
            guild_id,
            pending: VecDeque::new(),
            current: None,
            connection: None,
            active: None,
            status: PlayerStatus::Idle,
            loop_mode: LoopMode::Off,
            last_error: None,
            volume,
            max_size,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Track> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn status(&self) -> PlayerStatus {
        self.status
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_mode != LoopMode::Off
    }

    pub fn last_error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }

    pub fn volume(&self) -> Volume {
        self.volume
    }

    pub fn connection(&self) -> Option<&Arc<dyn VoiceConnection>> {
        self.connection.as_ref()
    }

    /// Agrega una pista al final (FIFO). Devuelve su posición 1-based.
    pub(crate) fn enqueue(&mut self, track: Track) -> EngineResult<usize> {
        if self.pending.len() >= self.max_size {
            return Err(EngineError::validation(format!(
                "la cola está llena (máximo {} canciones)",
                self.max_size
            )));
        }

        info!("➕ Agregado a la cola en guild {}: {}", self.guild_id, track.title());
        self.pending.push_back(track);
        Ok(self.pending.len())
    }

    /// Saca la cabeza de la cola y la convierte en la pista actual
    pub(crate) fn pop_next(&mut self) -> Option<Track> {
        let next = self.pending.pop_front();
        if let Some(ref track) = next {
            debug!("➡️ Siguiente en cola (FIFO): {}", track.title());
        }
        self.current = next.clone();
        next
    }

    /// Reinserta la pista que terminó según el modo de loop
    pub(crate) fn requeue_finished(&mut self) {
        let Some(finished) = self.current.take() else {
            return;
        };

        match self.loop_mode {
            LoopMode::Off => {}
            LoopMode::Track => {
                info!("🔂 Repitiendo track: {}", finished.title());
                self.pending.push_front(finished);
            }
            LoopMode::Queue => {
                info!("🔁 Track agregado al final por loop de cola: {}", finished.title());
                self.pending.push_back(finished);
            }
        }
    }

    /// Descarta la pista actual sin reinsertarla
    pub(crate) fn discard_current(&mut self) -> Option<Track> {
        self.current.take()
    }

    pub(crate) fn set_status(&mut self, status: PlayerStatus) {
        if self.status != status {
            debug!("🎚️ Guild {}: {:?} -> {:?}", self.guild_id, self.status, status);
        }
        self.status = status;
    }

    pub(crate) fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        match mode {
            LoopMode::Off => info!("➡️ Repetición desactivada"),
            LoopMode::Track => info!("🔂 Repetir canción activado"),
            LoopMode::Queue => info!("🔁 Repetir cola activado"),
        }
    }

    pub(crate) fn set_volume(&mut self, volume: Volume) {
        self.volume = volume;
    }

    pub(crate) fn record_error(&mut self, error: EngineError) {
        self.last_error = Some(error);
    }

    pub(crate) fn set_connection(&mut self, connection: Arc<dyn VoiceConnection>) {
        self.connection = Some(connection);
    }

    pub(crate) fn take_connection(&mut self) -> Option<Arc<dyn VoiceConnection>> {
        self.connection.take()
    }

    pub(crate) fn active(&self) -> Option<&ActiveHandle> {
        self.active.as_ref()
    }

    pub(crate) fn active_token(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.token)
    }

    pub(crate) fn set_active(&mut self, token: u64, track: Box<dyn ActiveTrack>) {
        self.active = Some(ActiveHandle { token, track });
    }

    pub(crate) fn take_active(&mut self) -> Option<ActiveHandle> {
        self.active.take()
    }

    /// Vacía pendientes y actual; no toca la conexión
    pub(crate) fn clear_tracks(&mut self) {
        self.pending.clear();
        self.current = None;
        info!("🗑️ Cola limpiada en guild {}", self.guild_id);
    }

    /// Sin nada sonando: `current == None` y estado `Idle`
    pub(crate) fn go_idle(&mut self) {
        self.current = None;
        self.set_status(PlayerStatus::Idle);
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.clone(),
            pending: self.pending.iter().cloned().collect(),
            status: self.status,
            loop_mode: self.loop_mode,
            last_error: self.last_error.clone(),
            volume: self.volume,
            total_duration: self.calculate_total_duration(),
        }
    }

    fn calculate_total_duration(&self) -> Duration {
        let queue_duration: Duration = self.pending.iter().filter_map(|t| t.duration()).sum();
        let current_duration = self.current.as_ref().and_then(|c| c.duration()).unwrap_or_default();

        queue_duration + current_duration
    }
}

/// Copia de solo lectura del estado, para presentación
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub pending: Vec<Track>,
    pub status: PlayerStatus,
    pub loop_mode: LoopMode,
    pub last_error: Option<EngineError>,
    pub volume: Volume,
    pub total_duration: Duration,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    /// Primeras `limit` pistas pendientes y cuántas quedan fuera
    pub fn up_next(&self, limit: usize) -> (&[Track], usize) {
        let shown = limit.min(self.pending.len());
        (&self.pending[..shown], self.pending.len() - shown)
    }
}
