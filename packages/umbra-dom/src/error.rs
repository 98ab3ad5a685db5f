use thiserror::Error;

/// Recoverable failures of the binding engine.
///
/// None of these abort processing: they are reported through the configured
/// [`ErrorSink`](umbra_traits::ErrorSink) and the engine keeps whatever state
/// it had before the failing operation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BindingError {
    #[error("unknown content selector language `{language}`")]
    InvalidSelectorLanguage { language: String },

    #[error("invalid selector expression `{expression}`: {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("failed to evaluate selector expression `{expression}`: {reason}")]
    ExpressionEvaluation { expression: String, reason: String },

    #[error("definition element {node} has no usable `element` attribute")]
    InvalidDefinition { node: usize },

    #[error("could not resolve reference `{uri}`")]
    UnresolvedReference { uri: String },

    #[error("reference `{uri}` does not point to a usable target")]
    BadReferenceTarget { uri: String },

    #[error("reference `{uri}` forms a cycle")]
    CircularReference { uri: String },
}
