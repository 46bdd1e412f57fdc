//! Voice connection lifecycle.
//!
//! `Disconnected -> Signalling/Connecting -> Ready`, with `Ready -> Disconnected`
//! on network loss. [`ConnectionManager::ensure_connected`] reuses a live
//! connection or opens a new one and waits for `Ready`; a supervisor task per
//! connection gives an unexpected disconnect a grace window to resume before
//! tearing down the whole guild state.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        player::{AudioSink, PlayerEventSender},
        queue::QueueState,
        registry::QueueRegistry,
    },
    config::Timeouts,
    deadline::with_timeout,
    error::{EngineError, EngineResult},
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identificador único de conexión dentro del proceso
pub fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Signalling,
    Connecting,
    Ready,
    /// Cerrada explícitamente; no volverá
    Destroyed,
}

impl ConnectionStatus {
    /// La conexión está volviendo (o ya volvió) tras una caída
    fn is_resuming(&self) -> bool {
        matches!(self, Self::Signalling | Self::Connecting | Self::Ready)
    }
}

/// Conexión de voz de un guild con su reproductor suscrito
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn id(&self) -> u64;

    /// Canal de voz en el que está la conexión
    fn channel_id(&self) -> ChannelId;

    /// Mueve la misma conexión a otro canal del guild
    async fn move_to(&self, channel_id: ChannelId) -> EngineResult<()>;

    /// Estado actual y cambios futuros
    fn status(&self) -> watch::Receiver<ConnectionStatus>;

    /// Reproductor asociado a esta conexión
    fn player(&self) -> Arc<dyn AudioSink>;

    /// Cierra la conexión. Idempotente.
    async fn destroy(&self);
}

/// Transporte que abre conexiones de voz (songbird en producción)
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn open(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        events: PlayerEventSender,
    ) -> EngineResult<Arc<dyn VoiceConnection>>;
}

fn is_live(connection: &dyn VoiceConnection) -> bool {
    *connection.status().borrow() != ConnectionStatus::Destroyed
}

pub struct ConnectionManager {
    gateway: Arc<dyn VoiceGateway>,
    registry: Arc<QueueRegistry>,
    timeouts: Timeouts,
}

impl ConnectionManager {
    pub fn new(gateway: Arc<dyn VoiceGateway>, registry: Arc<QueueRegistry>, timeouts: Timeouts) -> Self {
        Self {
            gateway,
            registry,
            timeouts,
        }
    }

    /// Reutiliza la conexión viva del guild (moviéndola al canal pedido si
    /// hace falta) o abre una nueva y espera `Ready`. Durante el arranque,
    /// `Disconnected` cuenta como fallo.
    ///
    /// `events` solo se invoca cuando hace falta abrir una conexión nueva.
    pub async fn ensure_connected<F>(
        &self,
        state: &mut QueueState,
        channel_id: ChannelId,
        events: F,
    ) -> EngineResult<Arc<dyn VoiceConnection>>
    where
        F: FnOnce() -> PlayerEventSender,
    {
        let guild_id = state.guild_id();

        if let Some(existing) = state.connection().cloned().filter(|c| is_live(c.as_ref())) {
            if existing.channel_id() != channel_id {
                info!(
                    "🔀 Moviendo conexión {} al canal {} en guild {}",
                    existing.id(),
                    channel_id,
                    guild_id
                );
                with_timeout(self.timeouts.connect, "voice-move", existing.move_to(channel_id))
                    .await
                    .map_err(|e| EngineError::connection(e.to_string()))??;
            } else {
                debug!("♻️ Reutilizando conexión {} en guild {}", existing.id(), guild_id);
            }
            return Ok(existing);
        }

        // Una conexión muerta nunca se reutiliza
        if let Some(stale) = state.take_connection() {
            stale.destroy().await;
        }

        info!("🔗 Conectando al canal {} en guild {}", channel_id, guild_id);
        let connection = self.gateway.open(guild_id, channel_id, events()).await?;

        if let Err(e) = self.wait_ready(connection.as_ref()).await {
            error!("❌ Conexión {} en guild {} no quedó lista: {}", connection.id(), guild_id, e);
            connection.destroy().await;
            return Err(e);
        }

        info!("✅ Conectado al canal {} en guild {}", channel_id, guild_id);
        state.set_connection(connection.clone());
        self.supervise(guild_id, connection.clone());

        Ok(connection)
    }

    async fn wait_ready(&self, connection: &dyn VoiceConnection) -> EngineResult<()> {
        let mut status = connection.status();

        let reached = with_timeout(self.timeouts.connect, "voice-ready", async {
            status
                .wait_for(|s| {
                    matches!(
                        s,
                        ConnectionStatus::Ready | ConnectionStatus::Disconnected | ConnectionStatus::Destroyed
                    )
                })
                .await
                .map(|s| *s)
        })
        .await
        .map_err(|e| EngineError::connection(e.to_string()))?;

        match reached {
            Ok(ConnectionStatus::Ready) => Ok(()),
            Ok(other) => Err(EngineError::connection(format!("la conexión terminó en {:?}", other))),
            Err(_) => Err(EngineError::connection("la conexión se cerró antes de estar lista")),
        }
    }

    /// Vigila caídas inesperadas; fuera de la ventana de gracia destruye el estado
    fn supervise(&self, guild_id: GuildId, connection: Arc<dyn VoiceConnection>) {
        let registry = self.registry.clone();
        let grace = self.timeouts.reconnect_grace;
        let mut status = connection.status();
        let connection_id = connection.id();
        // El supervisor no debe mantener viva la conexión
        drop(connection);

        tokio::spawn(async move {
            loop {
                if status.changed().await.is_err() {
                    return;
                }
                let current = *status.borrow_and_update();

                match current {
                    ConnectionStatus::Destroyed => return,
                    ConnectionStatus::Disconnected => {
                        warn!("🔌 Conexión {} caída en guild {}, esperando {:?}", connection_id, guild_id, grace);

                        let resumed = with_timeout(grace, "reconnect-grace", async {
                            status.wait_for(|s| s.is_resuming() || *s == ConnectionStatus::Destroyed).await.map(|s| *s)
                        })
                        .await;

                        match resumed {
                            Ok(Ok(ConnectionStatus::Destroyed)) | Ok(Err(_)) => return,
                            Ok(Ok(s)) => info!("🔄 Conexión {} retomada ({:?}) en guild {}", connection_id, s, guild_id),
                            Err(_) => {
                                error!("💥 Conexión {} perdida en guild {}", connection_id, guild_id);
                                registry.destroy_if_connection(guild_id, connection_id).await;
                                return;
                            }
                        }
                    }
                    other => debug!("Conexión {} en guild {}: {:?}", connection_id, guild_id, other),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        player::Volume,
        testing::{FakeConnection, FakeGateway},
    };
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn setup(gateway: Arc<FakeGateway>) -> (Arc<QueueRegistry>, ConnectionManager) {
        let registry = Arc::new(QueueRegistry::new(100, Volume::default()));
        let manager = ConnectionManager::new(gateway, registry.clone(), Timeouts::default());
        (registry, manager)
    }

    fn events() -> PlayerEventSender {
        mpsc::unbounded_channel().0
    }

    #[tokio::test]
    async fn test_ensure_connected_is_idempotent() {
        let gateway = Arc::new(FakeGateway::ready());
        let (registry, manager) = setup(gateway.clone());
        let guild = GuildId::new(1);
        let channel = ChannelId::new(5);

        let queue = registry.get_or_create(guild);
        let mut state = queue.lock().await;

        let first = manager.ensure_connected(&mut state, channel, events).await.unwrap();
        let second = manager.ensure_connected(&mut state, channel, events).await.unwrap();

        assert_eq!(gateway.opened(), 1);
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_timeout_tears_down_connection() {
        let gateway = Arc::new(FakeGateway::stuck());
        let (registry, manager) = setup(gateway.clone());
        let guild = GuildId::new(2);

        let queue = registry.get_or_create(guild);
        let mut state = queue.lock().await;

        let err = manager
            .ensure_connected(&mut state, ChannelId::new(5), events)
            .await
            .err().expect("expected ensure_connected to fail");

        assert!(matches!(err, EngineError::Connection(_)));
        assert!(state.connection().is_none());
        assert!(gateway.last().unwrap().is_destroyed());
        // El estado sigue siendo válido para reintentar
        drop(state);
        assert!(registry.contains(guild));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_within_grace_keeps_state() {
        let gateway = Arc::new(FakeGateway::ready());
        let (registry, manager) = setup(gateway.clone());
        let guild = GuildId::new(3);

        {
            let queue = registry.get_or_create(guild);
            let mut state = queue.lock().await;
            manager.ensure_connected(&mut state, ChannelId::new(5), events).await.unwrap();
        }
        let connection: Arc<FakeConnection> = gateway.last().unwrap();

        connection.set_status(ConnectionStatus::Disconnected);
        tokio::time::sleep(Duration::from_secs(2)).await;
        connection.set_status(ConnectionStatus::Ready);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(registry.contains(guild));
        assert!(!connection.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_beyond_grace_destroys_state() {
        let gateway = Arc::new(FakeGateway::ready());
        let (registry, manager) = setup(gateway.clone());
        let guild = GuildId::new(4);

        {
            let queue = registry.get_or_create(guild);
            let mut state = queue.lock().await;
            manager.ensure_connected(&mut state, ChannelId::new(5), events).await.unwrap();
        }
        let connection = gateway.last().unwrap();

        connection.set_status(ConnectionStatus::Disconnected);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(!registry.contains(guild));
        assert!(connection.is_destroyed());
    }

    #[tokio::test]
    async fn test_live_connection_follows_caller_to_new_channel() {
        let gateway = Arc::new(FakeGateway::ready());
        let (registry, manager) = setup(gateway.clone());
        let queue = registry.get_or_create(GuildId::new(7));
        let mut state = queue.lock().await;

        let first = manager.ensure_connected(&mut state, ChannelId::new(5), events).await.unwrap();
        let second = manager.ensure_connected(&mut state, ChannelId::new(6), events).await.unwrap();

        assert_eq!(gateway.opened(), 1);
        assert_eq!(first.id(), second.id());
        assert_eq!(second.channel_id(), ChannelId::new(6));
        assert_eq!(gateway.last().unwrap().moves(), 1);

        // Mismo canal: no hay movimiento
        manager.ensure_connected(&mut state, ChannelId::new(6), events).await.unwrap();
        assert_eq!(gateway.last().unwrap().moves(), 1);
    }

    #[tokio::test]
    async fn test_destroyed_connection_is_replaced() {
        let gateway = Arc::new(FakeGateway::ready());
        let (registry, manager) = setup(gateway.clone());
        let queue = registry.get_or_create(GuildId::new(6));
        let mut state = queue.lock().await;

        let first = manager.ensure_connected(&mut state, ChannelId::new(5), events).await.unwrap();
        first.destroy().await;
        let second = manager.ensure_connected(&mut state, ChannelId::new(5), events).await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(gateway.opened(), 2);
    }
}
