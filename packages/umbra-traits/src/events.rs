use markup5ever::QualName;

/// A single structural or attribute mutation observed on a document.
///
/// Mutations accumulate on the document's pending queue while a mutator is
/// live; dropping the mutator is the "subtree settled" point after which the
/// whole batch is handed to the binding engine in one call. Node ids remain
/// resolvable after a `ChildRemoved`: removal detaches the subtree but does
/// not free it, so consumers can still inspect the removed nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationEvent {
    /// A node was inserted as a child of `parent`.
    ChildInserted { node: usize, parent: usize },
    /// A node was detached from `parent`. The subtree is still readable.
    ChildRemoved { node: usize, parent: usize },
    /// An attribute on `node` was set, changed or removed.
    AttrModified {
        node: usize,
        name: QualName,
        old_value: Option<String>,
        new_value: Option<String>,
    },
    /// The text content of a text node changed.
    CharacterDataModified { node: usize },
}

impl MutationEvent {
    /// The node the mutation was observed on.
    pub fn target(&self) -> usize {
        match *self {
            MutationEvent::ChildInserted { node, .. } => node,
            MutationEvent::ChildRemoved { node, .. } => node,
            MutationEvent::AttrModified { node, .. } => node,
            MutationEvent::CharacterDataModified { node } => node,
        }
    }
}
