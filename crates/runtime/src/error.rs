use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Structural DOM operation failed
    #[error("DOM error: {0}")]
    Dom(#[from] jrx_dom::DomError),

    /// Wire payload could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] jrx_protocol::ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Optimistic script failed to parse or evaluate
    #[error("Script error at {pos}: {message}")]
    Script { pos: usize, message: String },

    /// Component expansion refers back to itself
    #[error("Component cycle: {}", .0.join(" -> "))]
    ComponentCycle(Vec<String>),

    /// Component nesting exceeded the expansion limit
    #[error("Component nesting deeper than {0} levels")]
    ComponentDepth(usize),

    /// Invalid runtime configuration
    #[error("Invalid config: {0}")]
    Config(String),
}

impl RuntimeError {
    pub fn script(pos: usize, message: impl Into<String>) -> Self {
        Self::Script {
            pos,
            message: message.into(),
        }
    }
}
