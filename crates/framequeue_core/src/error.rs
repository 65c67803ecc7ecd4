//! # Pipeline Error Types
//!
//! Recoverable failures of the frame pipeline. Protocol violations (second
//! double-buffered set, overlapping producers, bad references) are not errors;
//! they panic at the point of misuse.

use thiserror::Error;

/// Errors that can occur while starting or stopping frame threads.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The operating system refused to create a frame thread.
    #[error("failed to spawn frame thread {name}: {source}")]
    Spawn {
        /// Name of the worker whose thread could not be created.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A frame thread panicked before it could be joined.
    #[error("frame thread {name} panicked")]
    WorkerPanicked {
        /// Name of the worker that panicked.
        name: String,
    },
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_worker() {
        let err = PipelineError::WorkerPanicked {
            name: "Physics".to_owned(),
        };
        assert_eq!(err.to_string(), "frame thread Physics panicked");

        let err = PipelineError::Spawn {
            name: "GameLogic".to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "no threads left"),
        };
        assert!(err.to_string().contains("GameLogic"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
