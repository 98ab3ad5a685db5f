//! The Umbra DOM and its dynamic binding engine.
//!
//! This crate implements a headless, arena-backed document tree
//! ([`Document`]) together with an element binding engine
//! ([`BindingManager`]): definition elements associate templates with element
//! names, bound elements receive cloned shadow trees, content elements
//! project selected light-tree children into those shadow trees, and the
//! resulting flattened view is what a renderer walks.
//!
//! Hosts edit the tree through [`DocumentMutator`]; dropping the mutator
//! settles the batch, and [`BindingManager::flush_mutations`] applies its
//! consequences (registry maintenance, re-selection, rebinding) in one pass.

/// The document tree.
///
/// This is the primary entry point for this crate.
mod document;

/// The nodes themselves, and their data.
pub mod node;

/// The binding vocabulary: namespaces, tag and attribute names.
pub mod vocab;

mod binding;
mod error;
mod mutator;
mod resolve;
mod scene;
mod traversal;

pub use binding::{BindingManager, ContentManager, ListenerId, SelectorRegistry};
pub use document::Document;
pub use error::BindingError;
pub use markup5ever::{
    LocalName, Namespace, Prefix, QualName, local_name, namespace_prefix, namespace_url, ns,
};
pub use mutator::DocumentMutator;
pub use node::{Attribute, ElementData, Node, NodeData, NodeFlags, TextNodeData};
pub use resolve::{FragmentResolver, ReferenceResolver};
pub use scene::SceneGraphBuilder;
pub use traversal::{AncestorTraverser, TreeTraverser};
pub use umbra_traits::{
    BindingListener, ContentSelectionChangedListener, ErrorSink, ListenerError, MutationEvent,
    NoopBindingListener, NoopErrorSink, ShadowTreeEvent, ShadowTreeListener, ShadowTreePhase,
};
#[cfg(feature = "tracing")]
pub use umbra_traits::TracingErrorSink;
