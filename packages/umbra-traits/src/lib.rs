//! Shared contracts between the Umbra binding engine and its hosts.
//!
//! Everything here is id-based: nodes are referred to by their arena index
//! in the owning document, so listeners and sinks can be registered without
//! holding references into the tree.

mod events;
pub use events::MutationEvent;

mod binding;
pub use binding::{
    BindingListener, ContentSelectionChangedListener, ListenerError, NoopBindingListener,
    ShadowTreeEvent, ShadowTreeListener, ShadowTreePhase,
};

mod error_sink;
pub use error_sink::{ErrorSink, NoopErrorSink};
#[cfg(feature = "tracing")]
pub use error_sink::TracingErrorSink;
