use std::io;

use anyhow::Error;
use serde::Serialize;

/// Failure taxonomy shared by the resolver, the extraction pipeline and the
/// icon loaders. Every stage of a fallback chain treats these as non-fatal;
/// only exhaustion of the whole chain reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum IconError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{tool} failed: {message}")]
    ExternalToolFailure { tool: String, message: String },
    #[error("decode failed: {0}")]
    DecodeFailure(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl IconError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalToolFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::ExternalToolFailure { .. } => "EXTERNAL_TOOL_FAILURE",
            Self::DecodeFailure(_) => "DECODE_FAILURE",
            Self::Timeout(_) => "TIMEOUT",
            Self::Io(_) => "IO",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code().to_owned(),
                message: self.to_string(),
            },
        }
    }
}

impl From<image::ImageError> for IconError {
    fn from(error: image::ImageError) -> Self {
        Self::DecodeFailure(error.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
}

impl ErrorEnvelope {
    /// Envelope for errors that carry no `IconError` in their chain.
    pub fn generic(error: &Error) -> Self {
        Self {
            ok: false,
            error: ErrorEnvelopeBody {
                code: "ERROR".to_owned(),
                message: format!("{error:#}"),
            },
        }
    }
}

pub fn find_icon_error(error: &Error) -> Option<&IconError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<IconError>())
}
