//! songbird-backed voice transport.
//!
//! [`SongbirdGateway`] joins a channel through the shared [`Songbird`] manager
//! and reports driver state through a `watch` channel. [`SongbirdSink`] turns a
//! [`Track`] into a songbird [`Input`] for the requested [`DecodePath`] and
//! forwards the track's end/error events, tagged with their token, to the
//! playback controller.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    events::CoreEvent,
    input::{HttpRequest, Input, YoutubeDl},
    tracks::{ReadyState, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        connection::{next_connection_id, ConnectionStatus, VoiceConnection, VoiceGateway},
        player::{ActiveTrack, AudioSink, DecodePath, PlayerEvent, PlayerEventKind, PlayerEventSender},
    },
    deadline::with_timeout,
    error::{EngineError, EngineResult},
    sources::{SourceKind, Track, YtDlp},
};

const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SongbirdGateway {
    songbird: Arc<Songbird>,
    http: reqwest::Client,
    ytdlp: YtDlp,
    ytdl_program: &'static str,
    media_timeout: Duration,
}

impl SongbirdGateway {
    pub fn new(songbird: Arc<Songbird>, ytdlp: YtDlp, media_timeout: Duration) -> EngineResult<Self> {
        Ok(Self {
            songbird,
            http: streaming_client()?,
            ytdl_program: ytdl_program(&ytdlp),
            ytdlp,
            media_timeout,
        })
    }
}

/// Cliente para streams de audio: solo acota la conexión, nunca la lectura
/// del cuerpo, que dura lo que dure la pista.
fn streaming_client() -> EngineResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(STREAM_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| EngineError::connection(format!("no se pudo crear el cliente HTTP: {}", e)))
}

/// songbird pide el programa como `&'static str`; se fija una vez por gateway
fn ytdl_program(ytdlp: &YtDlp) -> &'static str {
    Box::leak(ytdlp.binary().to_string().into_boxed_str())
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn open(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        events: PlayerEventSender,
    ) -> EngineResult<Arc<dyn VoiceConnection>> {
        let (status, _) = watch::channel(ConnectionStatus::Signalling);
        let status = Arc::new(status);
        let call = self.songbird.get_or_insert(guild_id);

        let join = {
            let mut handler = call.lock().await;
            register_status_events(&mut handler, &status);

            handler
                .join(channel_id)
                .await
                .map_err(|e| EngineError::connection(format!("no se pudo unir al canal de voz: {}", e)))?
        };
        status.send_replace(ConnectionStatus::Connecting);

        // El handshake termina en segundo plano; el manager espera `Ready`
        let join_status = status.clone();
        tokio::spawn(async move {
            match join.await {
                Ok(()) => notify(&join_status, ConnectionStatus::Ready),
                Err(e) => {
                    error!("❌ Falló el handshake de voz en guild {}: {}", guild_id, e);
                    notify(&join_status, ConnectionStatus::Disconnected);
                }
            }
        });

        let sink = SongbirdSink {
            call,
            events,
            http: self.http.clone(),
            ytdlp: self.ytdlp.clone(),
            ytdl_program: self.ytdl_program,
            media_timeout: self.media_timeout,
        };

        Ok(Arc::new(SongbirdConnection {
            id: next_connection_id(),
            guild_id,
            channel: AtomicU64::new(channel_id.get()),
            songbird: self.songbird.clone(),
            status,
            sink: Arc::new(sink),
        }))
    }
}

/// Actualiza el estado salvo que la conexión ya esté destruida
fn notify(status: &watch::Sender<ConnectionStatus>, next: ConnectionStatus) {
    status.send_if_modified(|current| {
        if *current == ConnectionStatus::Destroyed || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

fn register_status_events(handler: &mut Call, status: &Arc<watch::Sender<ConnectionStatus>>) {
    let events = [
        (CoreEvent::DriverConnect, ConnectionStatus::Ready),
        (CoreEvent::DriverReconnect, ConnectionStatus::Ready),
        (CoreEvent::DriverDisconnect, ConnectionStatus::Disconnected),
    ];

    for (event, next) in events {
        handler.add_global_event(
            Event::Core(event),
            StatusNotifier {
                status: status.clone(),
                next,
            },
        );
    }
}

struct StatusNotifier {
    status: Arc<watch::Sender<ConnectionStatus>>,
    next: ConnectionStatus,
}

#[async_trait]
impl VoiceEventHandler for StatusNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("🔌 Driver de voz: {:?}", self.next);
        notify(&self.status, self.next);
        None
    }
}

pub struct SongbirdConnection {
    id: u64,
    guild_id: GuildId,
    channel: AtomicU64,
    songbird: Arc<Songbird>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    sink: Arc<SongbirdSink>,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn channel_id(&self) -> ChannelId {
        ChannelId::new(self.channel.load(Ordering::Relaxed))
    }

    /// `join` sobre el mismo `Call` mueve al bot sin abrir otra conexión
    async fn move_to(&self, channel_id: ChannelId) -> EngineResult<()> {
        let join = self
            .sink
            .call
            .lock()
            .await
            .join(channel_id)
            .await
            .map_err(|e| EngineError::connection(format!("no se pudo mover al canal {}: {}", channel_id, e)))?;

        join.await
            .map_err(|e| EngineError::connection(format!("no se pudo mover al canal {}: {}", channel_id, e)))?;
        self.channel.store(channel_id.get(), Ordering::Relaxed);

        info!("🔀 Movido al canal {} en guild {}", channel_id, self.guild_id);
        Ok(())
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    fn player(&self) -> Arc<dyn AudioSink> {
        self.sink.clone()
    }

    async fn destroy(&self) {
        let previous = self.status.send_replace(ConnectionStatus::Destroyed);
        if previous == ConnectionStatus::Destroyed {
            return;
        }

        self.sink.call.lock().await.stop();
        if let Err(e) = self.songbird.remove(self.guild_id).await {
            debug!("songbird remove en guild {}: {}", self.guild_id, e);
        }
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
    }
}

pub struct SongbirdSink {
    call: Arc<Mutex<Call>>,
    events: PlayerEventSender,
    http: reqwest::Client,
    ytdlp: YtDlp,
    ytdl_program: &'static str,
    media_timeout: Duration,
}

impl SongbirdSink {
    async fn input_for(&self, track: &Track, path: DecodePath) -> EngineResult<Input> {
        let url = track.stream_url().as_str();

        match (track.source(), path) {
            (SourceKind::YouTube | SourceKind::SoundCloud, DecodePath::Primary) => {
                debug!("🎯 Input yt-dlp para {}", track.title());
                Ok(YoutubeDl::new_ytdl_like(self.ytdl_program, self.http.clone(), url.to_string()).into())
            }
            (SourceKind::Direct, _) => Ok(HttpRequest::new(self.http.clone(), url.to_string()).into()),
            (_, DecodePath::Secondary) => {
                debug!("🔄 Ruta secundaria: URL de medios directa para {}", track.title());
                let media_url = with_timeout(self.media_timeout, "media-url", self.ytdlp.media_url(url))
                    .await
                    .map_err(|e| EngineError::playback(e.to_string()))?
                    .map_err(|e| EngineError::playback(format!("yt-dlp no entregó audio: {}", e)))?;

                Ok(HttpRequest::new(self.http.clone(), media_url).into())
            }
        }
    }
}

#[async_trait]
impl AudioSink for SongbirdSink {
    async fn play(&self, track: &Track, path: DecodePath, token: u64) -> EngineResult<Box<dyn ActiveTrack>> {
        let input = self.input_for(track, path).await?;
        let handle = self.call.lock().await.play_input(input);

        let (phase, phase_rx) = watch::channel(TrackPhase::Loading);
        let phase = Arc::new(phase);

        for (event, kind) in [
            (TrackEvent::Playable, ForwardKind::Playable),
            (TrackEvent::End, ForwardKind::End),
            (TrackEvent::Error, ForwardKind::Error),
        ] {
            let forwarder = TrackEventForwarder {
                token,
                kind,
                events: self.events.clone(),
                phase: phase.clone(),
            };
            handle
                .add_event(Event::Track(event), forwarder)
                .map_err(|e| EngineError::playback(format!("no se pudo suscribir a la pista: {}", e)))?;
        }

        Ok(Box::new(SongbirdTrack { handle, phase: phase_rx }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TrackPhase {
    Loading,
    Playable,
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
enum ForwardKind {
    Playable,
    End,
    Error,
}

struct TrackEventForwarder {
    token: u64,
    kind: ForwardKind,
    events: PlayerEventSender,
    phase: Arc<watch::Sender<TrackPhase>>,
}

#[async_trait]
impl VoiceEventHandler for TrackEventForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match self.kind {
            ForwardKind::Playable => {
                self.phase.send_replace(TrackPhase::Playable);
            }
            ForwardKind::End => {
                let _ = self.events.send(PlayerEvent {
                    token: self.token,
                    kind: PlayerEventKind::Finished,
                });
            }
            ForwardKind::Error => {
                let message = match ctx {
                    EventContext::Track(tracks) => tracks
                        .first()
                        .map(|(state, _)| format!("{:?}", state.playing))
                        .unwrap_or_else(|| "error de pista".to_string()),
                    _ => "error de pista".to_string(),
                };
                warn!("❌ Error en pista (token {}): {}", self.token, message);

                self.phase.send_replace(TrackPhase::Failed(message.clone()));
                let _ = self.events.send(PlayerEvent {
                    token: self.token,
                    kind: PlayerEventKind::Errored(message),
                });
            }
        }
        None
    }
}

pub struct SongbirdTrack {
    handle: TrackHandle,
    phase: watch::Receiver<TrackPhase>,
}

fn control_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::control(format!("el reproductor rechazó la orden: {}", e))
}

#[async_trait]
impl ActiveTrack for SongbirdTrack {
    async fn wait_until_playing(&self) -> EngineResult<()> {
        // Playable pudo llegar antes de registrar el evento
        if let Ok(info) = self.handle.get_info().await {
            if info.ready == ReadyState::Playable {
                return Ok(());
            }
        }

        let mut phase = self.phase.clone();
        let reached = phase
            .wait_for(|p| *p != TrackPhase::Loading)
            .await
            .map(|p| p.clone())
            .map_err(|_| EngineError::playback("la pista se descartó antes de sonar"))?;

        match reached {
            TrackPhase::Failed(message) => Err(EngineError::playback(message)),
            _ => Ok(()),
        }
    }

    fn pause(&self) -> EngineResult<()> {
        self.handle.pause().map_err(control_error)
    }

    fn resume(&self) -> EngineResult<()> {
        self.handle.play().map_err(control_error)
    }

    fn stop(&self) {
        if let Err(e) = self.handle.stop() {
            debug!("stop sobre pista ya terminada: {}", e);
        }
    }

    fn supports_gain(&self) -> bool {
        true
    }

    fn set_gain(&self, gain: f32) -> EngineResult<()> {
        self.handle.set_volume(gain).map_err(control_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_never_revives_destroyed_connection() {
        let (status, rx) = watch::channel(ConnectionStatus::Connecting);

        notify(&status, ConnectionStatus::Ready);
        assert_eq!(*rx.borrow(), ConnectionStatus::Ready);

        status.send_replace(ConnectionStatus::Destroyed);
        notify(&status, ConnectionStatus::Disconnected);
        assert_eq!(*rx.borrow(), ConnectionStatus::Destroyed);
    }

    #[test]
    fn test_streaming_client_has_no_total_timeout() {
        let client = streaming_client().unwrap();
        // reqwest solo lista los timeouts de petición/lectura si están fijados
        let debug = format!("{:?}", client).to_ascii_lowercase();
        assert!(!debug.contains("timeout"), "{}", debug);
    }

    #[test]
    fn test_ytdl_program_follows_configured_binary() {
        let ytdlp = YtDlp::new("/opt/bin/yt-dlp");
        assert_eq!(ytdl_program(&ytdlp), "/opt/bin/yt-dlp");
    }
}
