//! # Guild Jukebox
//!
//! Per-guild audio playback engine for a Discord bot: resolves free-text or
//! URL queries into playable tracks, keeps one FIFO queue and one voice
//! connection per guild, and drives playback through songbird.
//!
//! - [`sources`]: track model, query classification and the resolver
//! - [`audio`]: queue registry, connection manager and playback controller
//! - [`bot`]: slash-command surface
//! - [`config`], [`error`], [`deadline`]: ambient plumbing

pub mod audio;
pub mod bot;
pub mod config;
pub mod deadline;
pub mod error;
pub mod sources;

pub use error::{EngineError, EngineResult};
