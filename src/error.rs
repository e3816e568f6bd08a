use std::fmt;

use thiserror::Error;

use crate::annotation::GraphAnnotation;

/// Errors from capturing, caching and replaying graphs, generic over
/// the error type of the device runtime in use
#[derive(Debug, Error)]
pub enum GraphError<E: fmt::Debug> {
    /// The operation is not valid in the recorder's current state,
    /// always a bug in the caller
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The device refused to enter or leave capture mode
    #[error("stream capture failed: {0:?}")]
    Capture(E),

    /// The captured operations cannot be turned into an executable
    #[error("graph instantiation failed: {0:?}")]
    Instantiation(E),

    /// Nothing has been captured for the requested annotation
    #[error("no graph captured for annotation {0}")]
    ReplayMiss(GraphAnnotation),

    /// The device failed to execute a replayed graph
    #[error("graph launch failed: {0:?}")]
    Launch(E),

    /// Freeing a graph or executable failed, leaving device resources
    /// in an unknown state
    #[error("releasing graph resources failed: {0:?}")]
    Release(E),
}

pub type GraphResult<T, E> = Result<T, GraphError<E>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = GraphError::<String>::ReplayMiss(GraphAnnotation(7));
        assert_eq!(err.to_string(), "no graph captured for annotation 7");

        let err = GraphError::Capture("busy".to_string());
        assert_eq!(err.to_string(), "stream capture failed: \"busy\"");

        let err = GraphError::<()>::Precondition("cannot begin capture while capturing".to_string());
        assert_eq!(err.to_string(), "precondition violated: cannot begin capture while capturing");
    }
}
