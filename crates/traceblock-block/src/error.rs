//! Error types for the block engine

use thiserror::Error;
use traceblock_core::{DecodeError, EncodeError};
use uuid::Uuid;

use crate::backend::BackendError;

/// Boxed source for errors raised by third-party encoders
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E101: Trace cannot be serialised
    E101Encoding,
    /// E102: Operation not valid in the current lifecycle state
    E102InvalidState,
    /// E103: A single stored record is malformed
    E103Decode,
    /// E104: Block metadata or body failed an integrity check
    E104CorruptBlock,
    /// E105: Cancellation token fired mid-operation
    E105Cancelled,
    /// E106: Storage backend failure
    E106Backend,
    /// E107: Configuration missing or invalid
    E107InvalidConfig,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E101Encoding => "E101",
            Self::E102InvalidState => "E102",
            Self::E103Decode => "E103",
            Self::E104CorruptBlock => "E104",
            Self::E105Cancelled => "E105",
            Self::E106Backend => "E106",
            Self::E107InvalidConfig => "E107",
        }
    }
}

/// Errors raised while writing, reading or searching a block
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("[{code}] Encoding failed: {source}")]
    Encoding {
        code: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("[{code}] Invalid state: {message}")]
    InvalidState { code: &'static str, message: String },

    #[error("[{code}] Malformed record in block {block_id}: {source}")]
    Decode {
        code: &'static str,
        block_id: Uuid,
        #[source]
        source: DecodeError,
    },

    #[error("[{code}] Corrupt block {block_id}: {reason}")]
    CorruptBlock {
        code: &'static str,
        block_id: Uuid,
        reason: String,
    },

    #[error("[{code}] Cancelled during {operation}")]
    Cancelled {
        code: &'static str,
        operation: &'static str,
    },

    #[error("[{code}] Backend {operation} failed for block {block_id}: {source}")]
    Backend {
        code: &'static str,
        operation: &'static str,
        block_id: Uuid,
        #[source]
        source: BackendError,
    },

    #[error("[{code}] Invalid configuration: {message}")]
    InvalidConfig { code: &'static str, message: String },
}

impl BlockError {
    pub fn encoding(source: impl Into<BoxError>) -> Self {
        Self::Encoding {
            code: ErrorCode::E101Encoding.as_str(),
            source: source.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            code: ErrorCode::E102InvalidState.as_str(),
            message: message.into(),
        }
    }

    pub fn decode(block_id: Uuid, source: DecodeError) -> Self {
        Self::Decode {
            code: ErrorCode::E103Decode.as_str(),
            block_id,
            source,
        }
    }

    pub fn corrupt(block_id: Uuid, reason: impl Into<String>) -> Self {
        Self::CorruptBlock {
            code: ErrorCode::E104CorruptBlock.as_str(),
            block_id,
            reason: reason.into(),
        }
    }

    pub fn cancelled(operation: &'static str) -> Self {
        Self::Cancelled {
            code: ErrorCode::E105Cancelled.as_str(),
            operation,
        }
    }

    pub fn backend(operation: &'static str, block_id: Uuid, source: BackendError) -> Self {
        Self::Backend {
            code: ErrorCode::E106Backend.as_str(),
            operation,
            block_id,
            source,
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            code: ErrorCode::E107InvalidConfig.as_str(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Encoding { .. } => ErrorCode::E101Encoding,
            Self::InvalidState { .. } => ErrorCode::E102InvalidState,
            Self::Decode { .. } => ErrorCode::E103Decode,
            Self::CorruptBlock { .. } => ErrorCode::E104CorruptBlock,
            Self::Cancelled { .. } => ErrorCode::E105Cancelled,
            Self::Backend { .. } => ErrorCode::E106Backend,
            Self::InvalidConfig { .. } => ErrorCode::E107InvalidConfig,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<EncodeError> for BlockError {
    fn from(err: EncodeError) -> Self {
        Self::encoding(err)
    }
}

/// Result type alias for BlockError
pub type Result<T> = std::result::Result<T, BlockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_render_in_message() {
        let err = BlockError::invalid_state("block is complete");
        assert_eq!(err.code(), ErrorCode::E102InvalidState);
        assert!(err.to_string().starts_with("[E102]"));

        let err = BlockError::corrupt(Uuid::nil(), "bad footer");
        assert_eq!(err.code().as_str(), "E104");
        assert!(err.to_string().contains("bad footer"));
    }

    #[test]
    fn test_encode_error_converts() {
        let err: BlockError = EncodeError::InvalidTraceId { len: 3 }.into();
        assert_eq!(err.code(), ErrorCode::E101Encoding);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_cancelled_flag() {
        assert!(BlockError::cancelled("flush").is_cancelled());
        assert!(!BlockError::invalid_config("x").is_cancelled());
    }
}
