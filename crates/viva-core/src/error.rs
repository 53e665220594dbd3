use thiserror::Error;

/// External collaborator that failed a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Transcription,
    Completion,
    Synthesis,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Transcription => "transcription",
            Self::Completion => "completion",
            Self::Synthesis => "synthesis",
        };
        f.write_str(name)
    }
}

/// A malformed inbound audio block. Recovered locally: the block is dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Payload(String),

    #[error("linear16 block has odd length {0}")]
    OddLength(usize),

    #[error("audio block of {len} bytes exceeds limit of {max}")]
    TooLarge { len: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum VivaError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("{backend} backend unavailable: {message}")]
    BackendUnavailable { backend: Backend, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VivaError {
    pub fn backend(backend: Backend, err: impl std::fmt::Display) -> Self {
        Self::BackendUnavailable {
            backend,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VivaError>;
