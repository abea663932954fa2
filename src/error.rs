//! Error type shared by every fallible operation of the crate.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, UmbraError>;

/// Failure domains of the mapper.
///
/// `Mapping` and `UninitializedProxy` are purely local; `Write` and
/// `Query` wrap failures that crossed the graph-client port and carry
/// enough context to diagnose without re-running with tracing enabled.
#[derive(Debug, Error)]
pub enum UmbraError {
    /// The entity model and the metadata descriptor disagree.
    #[error("mapping error on `{class}`: {message}")]
    Mapping {
        /// Entity class the descriptor lookup or validation failed for.
        class: String,
        /// What was missing or malformed.
        message: String,
    },

    /// A relation was accessed on a proxy with no backing node, e.g. one
    /// reconstituted from a serialized snapshot without re-attachment.
    #[error(
        "uninitialized proxy: relation `{field}` is not available without a backing node; \
         reload the entity through a session before traversing relations"
    )]
    UninitializedProxy {
        /// The relation field whose hydration was impossible.
        field: String,
    },

    /// A remote call failed while the flush pipeline was running.
    #[error("write failed during {step}: {message}")]
    Write {
        /// Pipeline step that was executing (`nodes`, `relations`, ...).
        step: &'static str,
        /// Remote failure description.
        message: String,
    },

    /// Remote statement execution failed.
    #[error("query execution failed: {message} (statement: {statement})")]
    Query {
        /// The statement that was issued.
        statement: String,
        /// Message extracted from the remote error payload.
        message: String,
    },
}

impl UmbraError {
    pub(crate) fn mapping(class: impl Into<String>, message: impl Into<String>) -> Self {
        UmbraError::Mapping {
            class: class.into(),
            message: message.into(),
        }
    }

    pub(crate) fn write(step: &'static str, message: impl Into<String>) -> Self {
        UmbraError::Write {
            step,
            message: message.into(),
        }
    }
}
