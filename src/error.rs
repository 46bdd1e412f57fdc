//! Error taxonomy shared by the playback engine.
//!
//! Every engine-facing operation returns [`EngineError`]. The variants map to
//! how the failure is handled:
//!
//! - [`EngineError::Validation`]: malformed query, URL or volume. Rejected at the edge.
//! - [`EngineError::Resolution`]: every source in the fallback chain failed.
//! - [`EngineError::Connection`]: join/ready timeout or a refused voice connection.
//! - [`EngineError::Playback`]: decode/stream failure that emptied the queue.
//! - [`EngineError::Control`]: invalid state transition. Never mutates state.
//!
//! `Resolution` and `Connection` are terminal for the request that triggered
//! them but leave the guild's queue usable for a retry.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("entrada inválida: {0}")]
    Validation(String),

    #[error("no se pudo resolver la pista: {0}")]
    Resolution(String),

    #[error("error de conexión de voz: {0}")]
    Connection(String),

    #[error("error de reproducción: {0}")]
    Playback(String),

    #[error("operación no permitida: {0}")]
    Control(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn playback(msg: impl Into<String>) -> Self {
        Self::Playback(msg.into())
    }

    pub fn control(msg: impl Into<String>) -> Self {
        Self::Control(msg.into())
    }

    /// Nombre corto del tipo de error, usado en logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Resolution(_) => "resolution",
            Self::Connection(_) => "connection",
            Self::Playback(_) => "playback",
            Self::Control(_) => "control",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(EngineError::validation("x").kind(), "validation");
        assert_eq!(EngineError::resolution("x").kind(), "resolution");
        assert_eq!(EngineError::connection("x").kind(), "connection");
        assert_eq!(EngineError::playback("x").kind(), "playback");
        assert_eq!(EngineError::control("x").kind(), "control");
    }
}
