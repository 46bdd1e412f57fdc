//! # Audio Module
//!
//! Per-guild playback engine.
//!
//! ## Architecture
//!
//! ### [`registry`] - Queue Registry
//! - Owns every guild's [`queue::QueueState`] behind its own async mutex
//! - Idempotent creation and teardown
//!
//! ### [`connection`] - Connection Manager
//! - One live voice connection per guild, reused across plays
//! - Bounded ready wait and a reconnect grace window
//!
//! ### [`player`] - Playback Controller
//! - `Idle`/`Playing`/`Paused` state machine driven by player events
//! - Bounded advance over the pending queue, loop modes, volume
//!
//! ### [`voice`] - songbird transport
//! - Adapters from the engine's transport traits to songbird calls and tracks
//!
//! Different guilds never share mutable state; the registry map is the only
//! process-wide structure.

pub mod connection;
pub mod player;
pub mod queue;
pub mod registry;
pub mod voice;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionManager, ConnectionStatus};
pub use player::{PlayOutcome, PlaybackController, Volume};
pub use queue::{LoopMode, PlayerStatus, QueueSnapshot};
pub use registry::QueueRegistry;
