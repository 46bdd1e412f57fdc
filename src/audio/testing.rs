//! In-memory voice transport for engine tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::watch;

use crate::{
    audio::{
        connection::{next_connection_id, ConnectionStatus, VoiceConnection, VoiceGateway},
        player::{ActiveTrack, AudioSink, DecodePath, PlayerEvent, PlayerEventKind, PlayerEventSender},
    },
    error::{EngineError, EngineResult},
    sources::Track,
};

/// Qué hace el siguiente recurso que adjunte el sink
#[derive(Debug, Clone)]
pub enum ReadyBehavior {
    Ready,
    /// `play` falla antes de crear el recurso
    FailOpen(String),
    /// El recurso se crea pero nunca llega a sonar
    Fail(String),
    Hang,
}

#[derive(Default)]
struct ProbeState {
    stopped: AtomicBool,
    paused: AtomicBool,
    gain: Mutex<Option<f32>>,
}

/// Vista de lo que el controlador hizo con un [`FakeTrack`]
#[derive(Clone, Default)]
pub struct TrackProbe(Arc<ProbeState>);

impl TrackProbe {
    pub fn stopped(&self) -> bool {
        self.0.stopped.load(Ordering::SeqCst)
    }

    pub fn paused(&self) -> bool {
        self.0.paused.load(Ordering::SeqCst)
    }

    pub fn gain(&self) -> Option<f32> {
        *self.0.gain.lock()
    }
}

pub struct FakeTrack {
    probe: TrackProbe,
    supports_gain: bool,
    ready: ReadyBehavior,
}

impl FakeTrack {
    pub fn new(supports_gain: bool) -> (Self, TrackProbe) {
        Self::with_ready(supports_gain, ReadyBehavior::Ready)
    }

    fn with_ready(supports_gain: bool, ready: ReadyBehavior) -> (Self, TrackProbe) {
        let probe = TrackProbe::default();
        let track = Self {
            probe: probe.clone(),
            supports_gain,
            ready,
        };
        (track, probe)
    }
}

#[async_trait]
impl ActiveTrack for FakeTrack {
    async fn wait_until_playing(&self) -> EngineResult<()> {
        match &self.ready {
            ReadyBehavior::Ready | ReadyBehavior::FailOpen(_) => Ok(()),
            ReadyBehavior::Fail(msg) => Err(EngineError::playback(msg.clone())),
            ReadyBehavior::Hang => std::future::pending().await,
        }
    }

    fn pause(&self) -> EngineResult<()> {
        self.probe.0.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> EngineResult<()> {
        self.probe.0.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.probe.0.stopped.store(true, Ordering::SeqCst);
    }

    fn supports_gain(&self) -> bool {
        self.supports_gain
    }

    fn set_gain(&self, gain: f32) -> EngineResult<()> {
        *self.probe.0.gain.lock() = Some(gain);
        Ok(())
    }
}

/// Sink guionado: cada `play` consume el siguiente [`ReadyBehavior`]
pub struct FakeSink {
    script: Mutex<VecDeque<ReadyBehavior>>,
    plays: Mutex<Vec<(String, DecodePath, u64)>>,
    probes: Mutex<Vec<TrackProbe>>,
    events: Mutex<Option<PlayerEventSender>>,
    supports_gain: AtomicBool,
}

impl Default for FakeSink {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            plays: Mutex::new(Vec::new()),
            probes: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            supports_gain: AtomicBool::new(true),
        }
    }
}

impl FakeSink {
    pub fn script(&self, steps: impl IntoIterator<Item = ReadyBehavior>) {
        self.script.lock().extend(steps);
    }

    pub fn set_supports_gain(&self, supported: bool) {
        self.supports_gain.store(supported, Ordering::SeqCst);
    }

    fn attach(&self, events: PlayerEventSender) {
        *self.events.lock() = Some(events);
    }

    pub fn plays(&self) -> Vec<(String, DecodePath)> {
        self.plays
            .lock()
            .iter()
            .map(|(title, path, _)| (title.clone(), *path))
            .collect()
    }

    pub fn probes(&self) -> Vec<TrackProbe> {
        self.probes.lock().clone()
    }

    /// Token del último recurso adjuntado
    pub fn last_token(&self) -> u64 {
        self.plays.lock().last().map(|(_, _, token)| *token).unwrap_or_default()
    }

    /// Emite un fin natural por el canal de eventos
    pub fn finish(&self, token: u64) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(PlayerEvent {
                token,
                kind: PlayerEventKind::Finished,
            });
        }
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn play(&self, track: &Track, path: DecodePath, token: u64) -> EngineResult<Box<dyn ActiveTrack>> {
        let ready = self.script.lock().pop_front().unwrap_or(ReadyBehavior::Ready);
        if let ReadyBehavior::FailOpen(msg) = &ready {
            return Err(EngineError::playback(msg.clone()));
        }

        self.plays.lock().push((track.title().to_string(), path, token));
        let (active, probe) = FakeTrack::with_ready(self.supports_gain.load(Ordering::SeqCst), ready);
        self.probes.lock().push(probe);
        Ok(Box::new(active))
    }
}

pub struct FakeConnection {
    id: u64,
    channel: Mutex<ChannelId>,
    moves: AtomicUsize,
    status: watch::Sender<ConnectionStatus>,
    destroyed: AtomicBool,
    sink: Arc<FakeSink>,
}

impl FakeConnection {
    pub fn new(id: u64) -> Arc<Self> {
        Self::build(id, ChannelId::new(42), ConnectionStatus::Ready, Arc::new(FakeSink::default()))
    }

    fn build(id: u64, channel: ChannelId, status: ConnectionStatus, sink: Arc<FakeSink>) -> Arc<Self> {
        let (status, _) = watch::channel(status);
        Arc::new(Self {
            id,
            channel: Mutex::new(channel),
            moves: AtomicUsize::new(0),
            status,
            destroyed: AtomicBool::new(false),
            sink,
        })
    }

    pub fn moves(&self) -> usize {
        self.moves.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn sink(&self) -> Arc<FakeSink> {
        self.sink.clone()
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn channel_id(&self) -> ChannelId {
        *self.channel.lock()
    }

    async fn move_to(&self, channel_id: ChannelId) -> EngineResult<()> {
        *self.channel.lock() = channel_id;
        self.moves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    fn player(&self) -> Arc<dyn AudioSink> {
        self.sink.clone()
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.status.send_replace(ConnectionStatus::Destroyed);
    }
}

/// Abre [`FakeConnection`]s que comparten un único sink
pub struct FakeGateway {
    initial: ConnectionStatus,
    ready_after: Option<Duration>,
    sink: Arc<FakeSink>,
    opened: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeGateway {
    /// Conexiones que quedan `Ready` al instante
    pub fn ready() -> Self {
        Self::starting_in(ConnectionStatus::Ready, None)
    }

    /// Conexiones que nunca pasan de `Connecting`
    pub fn stuck() -> Self {
        Self::starting_in(ConnectionStatus::Connecting, None)
    }

    /// Conexiones que tardan `delay` en quedar `Ready`
    pub fn ready_after(delay: Duration) -> Self {
        Self::starting_in(ConnectionStatus::Connecting, Some(delay))
    }

    fn starting_in(initial: ConnectionStatus, ready_after: Option<Duration>) -> Self {
        Self {
            initial,
            ready_after,
            sink: Arc::new(FakeSink::default()),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn sink(&self) -> Arc<FakeSink> {
        self.sink.clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn last(&self) -> Option<Arc<FakeConnection>> {
        self.opened.lock().last().cloned()
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn open(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
        events: PlayerEventSender,
    ) -> EngineResult<Arc<dyn VoiceConnection>> {
        self.sink.attach(events);
        let connection = FakeConnection::build(next_connection_id(), channel_id, self.initial, self.sink.clone());
        self.opened.lock().push(connection.clone());

        if let Some(delay) = self.ready_after {
            let pending = connection.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                pending.set_status(ConnectionStatus::Ready);
            });
        }
        Ok(connection)
    }
}
