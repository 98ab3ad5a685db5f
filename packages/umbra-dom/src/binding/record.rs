//! Per-node binding state.
//!
//! The engine never stores state on [`Node`](crate::Node) itself; everything
//! it knows about a node lives in a side table of `BindingRecord`s keyed by
//! node id, created lazily on first touch.

/// Binding state for a single node.
#[derive(Debug, Clone, Default)]
pub(crate) struct BindingRecord {
    /// Flattened child list of this node, with content elements replaced by
    /// their selections. `None` until queried or after invalidation.
    pub child_nodes: Option<Vec<usize>>,
    /// Same members as `child_nodes`, computed without touching the cached
    /// sibling links.
    pub scoped_child_nodes: Option<Vec<usize>>,
    /// The content element that currently selects this node, if any.
    pub content_element: Option<usize>,
    /// For a bound element: the definition element governing it.
    pub definition_element: Option<usize>,
    /// For a shadow tree root: the element it is bound to.
    pub bound_element: Option<usize>,
    /// For a bound element: the root of its current shadow tree.
    pub shadow_tree: Option<usize>,
    /// Whether the flattened sibling links below are trustworthy.
    pub links_valid: bool,
    pub next_sibling: Option<usize>,
    pub previous_sibling: Option<usize>,
}
