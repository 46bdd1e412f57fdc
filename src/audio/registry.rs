//! Process-wide store of per-guild queue state.
//!
//! The registry owns every [`QueueState`]; callers address a guild by its
//! [`GuildId`] and receive a [`GuildQueue`] handle whose mutable access is
//! crate-private. Each state sits behind its own async mutex so one guild's
//! read-modify-write sequences never interleave, while different guilds only
//! share the concurrent map itself. Releasing the lock publishes a
//! [`QueueSnapshot`], so readers never wait behind a slow operation.

use dashmap::DashMap;
use futures::future::join_all;
use serenity::model::id::GuildId;
use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::audio::{
    player::Volume,
    queue::{QueueSnapshot, QueueState},
};

/// Estado mutable de un guild más la última instantánea publicada
struct GuildEntry {
    state: Mutex<QueueState>,
    published: watch::Sender<QueueSnapshot>,
}

impl GuildEntry {
    fn new(state: QueueState) -> Self {
        let (published, _) = watch::channel(state.snapshot());
        Self {
            state: Mutex::new(state),
            published,
        }
    }

    async fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            state: self.state.lock().await,
            published: &self.published,
        }
    }
}

/// Acceso exclusivo al estado de un guild. Al soltarse publica la
/// instantánea, así las lecturas nunca esperan al lock.
pub(crate) struct QueueGuard<'a> {
    state: MutexGuard<'a, QueueState>,
    published: &'a watch::Sender<QueueSnapshot>,
}

impl Deref for QueueGuard<'_> {
    type Target = QueueState;

    fn deref(&self) -> &QueueState {
        &self.state
    }
}

impl DerefMut for QueueGuard<'_> {
    fn deref_mut(&mut self) -> &mut QueueState {
        &mut self.state
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.published.send_replace(self.state.snapshot());
    }
}

/// Handle opaco al estado de un guild
#[derive(Clone)]
pub struct GuildQueue {
    guild_id: GuildId,
    entry: Arc<GuildEntry>,
}

impl GuildQueue {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Última instantánea publicada; no toma el lock del guild
    pub fn snapshot(&self) -> QueueSnapshot {
        self.entry.published.borrow().clone()
    }

    pub(crate) async fn lock(&self) -> QueueGuard<'_> {
        self.entry.lock().await
    }

    fn same_as(&self, other: &Arc<GuildEntry>) -> bool {
        Arc::ptr_eq(&self.entry, other)
    }
}

pub struct QueueRegistry {
    queues: DashMap<GuildId, Arc<GuildEntry>>,
    max_queue_size: usize,
    default_volume: Volume,
}

impl QueueRegistry {
    pub fn new(max_queue_size: usize, default_volume: Volume) -> Self {
        Self {
            queues: DashMap::new(),
            max_queue_size,
            default_volume,
        }
    }

    /// Devuelve el estado existente o crea uno vacío. Idempotente.
    pub fn get_or_create(&self, guild_id: GuildId) -> GuildQueue {
        let entry = self
            .queues
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("🆕 Estado de cola creado para guild {}", guild_id);
                Arc::new(GuildEntry::new(QueueState::new(
                    guild_id,
                    self.max_queue_size,
                    self.default_volume,
                )))
            })
            .clone();

        GuildQueue { guild_id, entry }
    }

    /// Estado existente, sin crear uno nuevo
    pub fn get(&self, guild_id: GuildId) -> Option<GuildQueue> {
        self.queues.get(&guild_id).map(|entry| GuildQueue {
            guild_id,
            entry: entry.clone(),
        })
    }

    pub fn contains(&self, guild_id: GuildId) -> bool {
        self.queues.contains_key(&guild_id)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Vacía pendientes y actual pero conserva la conexión
    pub async fn clear(&self, guild_id: GuildId) {
        let Some(queue) = self.get(guild_id) else {
            return;
        };

        let mut state = queue.lock().await;
        // Sin token activo, el fin de la pista detenida no avanza la cola
        if let Some(active) = state.take_active() {
            active.track.stop();
        }
        state.clear_tracks();
        state.go_idle();
    }

    /// Detiene el reproductor, destruye la conexión y elimina la entrada.
    /// Sin estado previo es un no-op.
    pub async fn destroy(&self, guild_id: GuildId) {
        let Some((_, entry)) = self.queues.remove(&guild_id) else {
            debug!("destroy sin estado para guild {}", guild_id);
            return;
        };

        teardown(guild_id, &entry).await;
        info!("👋 Estado de guild {} destruido", guild_id);
    }

    /// Destruye el estado solo si sigue usando la conexión `connection_id`.
    /// Evita que un supervisor viejo borre una sesión nueva.
    pub async fn destroy_if_connection(&self, guild_id: GuildId, connection_id: u64) -> bool {
        let Some(queue) = self.get(guild_id) else {
            return false;
        };

        let owns = {
            let state = queue.lock().await;
            state.connection().map(|c| c.id()) == Some(connection_id)
        };
        if !owns {
            debug!("Conexión {} ya no pertenece a guild {}", connection_id, guild_id);
            return false;
        }

        let removed = self
            .queues
            .remove_if(&guild_id, |_, entry| queue.same_as(entry))
            .is_some();
        if removed {
            teardown(guild_id, &queue.entry).await;
            warn!("💥 Estado de guild {} destruido por pérdida de conexión", guild_id);
        }
        removed
    }

    /// Destruye todos los estados (apagado del proceso)
    pub async fn destroy_all(&self) {
        let guilds: Vec<GuildId> = self.queues.iter().map(|entry| *entry.key()).collect();
        info!("🧹 Destruyendo {} colas", guilds.len());
        join_all(guilds.into_iter().map(|guild_id| self.destroy(guild_id))).await;
    }
}

async fn teardown(guild_id: GuildId, entry: &GuildEntry) {
    let mut state = entry.lock().await;

    if let Some(active) = state.take_active() {
        active.track.stop();
    }
    state.clear_tracks();
    state.go_idle();

    if let Some(connection) = state.take_connection() {
        debug!("🔌 Cerrando conexión {} de guild {}", connection.id(), guild_id);
        connection.destroy().await;
    }
}
