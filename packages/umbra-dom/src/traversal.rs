use crate::{Document, Node};

/// A pre-order tree traverser for a [`Document`].
#[derive(Clone)]
pub struct TreeTraverser<'a> {
    doc: &'a Document,
    stack: Vec<usize>,
}

impl<'a> TreeTraverser<'a> {
    /// Creates a new tree traverser for the given document which starts at the document node.
    pub fn new(doc: &'a Document) -> Self {
        Self::new_with_root(doc, 0)
    }

    /// Creates a new tree traverser for the given document which starts at the specified node.
    pub fn new_with_root(doc: &'a Document, root: usize) -> Self {
        let mut stack = Vec::with_capacity(32);
        stack.push(root);
        TreeTraverser { doc, stack }
    }
}
impl Iterator for TreeTraverser<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.doc.get_node(id)?;
        self.stack.extend(node.children.iter().rev());
        Some(id)
    }
}

/// An ancestor traverser for a [`Document`]. Yields the parent chain of a
/// node, nearest first, not including the node itself.
#[derive(Clone)]
pub struct AncestorTraverser<'a> {
    doc: &'a Document,
    current: usize,
}
impl<'a> AncestorTraverser<'a> {
    pub fn new(doc: &'a Document, node_id: usize) -> Self {
        AncestorTraverser {
            doc,
            current: node_id,
        }
    }
}
impl Iterator for AncestorTraverser<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let current_node = self.doc.get_node(self.current)?;
        self.current = current_node.parent?;
        Some(self.current)
    }
}

impl Document {
    pub fn visit<F>(&self, mut visit: F)
    where
        F: FnMut(usize, &Node),
    {
        TreeTraverser::new(self).for_each(|node_id| visit(node_id, &self.nodes[node_id]));
    }

    /// Whether `ancestor_id` is a proper ancestor of `node_id`.
    pub fn is_ancestor_of(&self, ancestor_id: usize, node_id: usize) -> bool {
        AncestorTraverser::new(self, node_id).any(|id| id == ancestor_id)
    }
}
