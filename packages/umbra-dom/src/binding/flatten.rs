//! Flattened-tree navigation.
//!
//! The flattened view is what a renderer walks: under a bound element the
//! shadow tree replaces the light children, and inside the shadow tree each
//! content element is replaced by the light nodes it selected. Child lists
//! and sibling links are cached per node and invalidated whenever structure
//! or selections change; they are recomputed lazily on the next query.

use crate::binding::manager::BindingManager;
use crate::document::Document;
use crate::vocab::{XBL_NAMESPACE, is_content_element, is_shadow_tree_element};

impl BindingManager {
    /// The content element currently projecting `node_id`, if any.
    pub fn content_element_of(&self, node_id: usize) -> Option<usize> {
        self.records
            .get(&node_id)
            .and_then(|record| record.content_element)
    }

    /// The shadow tree root attached to `node_id`, if it is bound.
    pub fn shadow_tree_of(&self, node_id: usize) -> Option<usize> {
        self.records
            .get(&node_id)
            .and_then(|record| record.shadow_tree)
    }

    /// The definition element governing `node_id`, if it is bound.
    pub fn definition_element_of(&self, node_id: usize) -> Option<usize> {
        self.records
            .get(&node_id)
            .and_then(|record| record.definition_element)
    }

    /// The nearest bound element whose shadow scope contains `node_id`:
    /// walk upwards, hopping from selected nodes to the content element
    /// projecting them, until a shadow tree root is reached.
    pub fn bound_element(&self, doc: &Document, node_id: usize) -> Option<usize> {
        let mut current = node_id;
        loop {
            if is_shadow_tree_element(doc, current) {
                return self
                    .records
                    .get(&current)
                    .and_then(|record| record.bound_element);
            }
            if let Some(content_element) = self.content_element_of(current) {
                current = content_element;
            }
            current = doc.nodes[current].parent?;
        }
    }

    /// The parent of `node_id` in the flattened view. A shadow tree root's
    /// flat parent is its bound element.
    pub fn flat_parent(&self, doc: &Document, node_id: usize) -> Option<usize> {
        if is_shadow_tree_element(doc, node_id) {
            return self
                .records
                .get(&node_id)
                .and_then(|record| record.bound_element);
        }
        let base = self.content_element_of(node_id).unwrap_or(node_id);
        let parent = doc.nodes[base].parent?;
        self.resolve_flat_parent(doc, parent)
    }

    /// Map a raw parent to its flattened counterpart: content elements are
    /// transparent and a shadow tree root stands in for its bound element.
    pub(crate) fn resolve_flat_parent(&self, doc: &Document, parent: usize) -> Option<usize> {
        let mut parent = parent;
        while is_content_element(doc, parent) {
            parent = doc.nodes[parent].parent?;
        }
        if is_shadow_tree_element(doc, parent) {
            return self
                .records
                .get(&parent)
                .and_then(|record| record.bound_element);
        }
        Some(parent)
    }

    /// The flattened child list of `node_id`, cached.
    pub fn flat_child_nodes(&mut self, doc: &Document, node_id: usize) -> Vec<usize> {
        let cached = self
            .records
            .get(&node_id)
            .and_then(|record| record.child_nodes.clone());
        if let Some(nodes) = cached {
            return nodes;
        }
        let nodes = self.compute_flat_children(doc, node_id, true);
        self.record_mut(node_id).child_nodes = Some(nodes.clone());
        nodes
    }

    /// Like [`flat_child_nodes`](Self::flat_child_nodes) with the same
    /// members, but computed without refreshing the cached sibling links,
    /// so it is safe to walk mid-transition.
    pub fn scoped_child_nodes(&mut self, doc: &Document, node_id: usize) -> Vec<usize> {
        let cached = self
            .records
            .get(&node_id)
            .and_then(|record| record.scoped_child_nodes.clone());
        if let Some(nodes) = cached {
            return nodes;
        }
        let nodes = self.compute_flat_children(doc, node_id, false);
        self.record_mut(node_id).scoped_child_nodes = Some(nodes.clone());
        nodes
    }

    fn compute_flat_children(
        &mut self,
        doc: &Document,
        node_id: usize,
        set_links: bool,
    ) -> Vec<usize> {
        let start = self.shadow_tree_of(node_id).unwrap_or(node_id);
        let mut nodes = Vec::new();
        let mut prev = None;
        for child in doc.nodes[start].children.clone() {
            prev = self.collect_flat(doc, child, prev, set_links, &mut nodes);
        }
        if set_links {
            if let Some(last) = prev {
                self.record_mut(last).next_sibling = None;
            }
        }
        nodes
    }

    fn collect_flat(
        &mut self,
        doc: &Document,
        node_id: usize,
        mut prev: Option<usize>,
        set_links: bool,
        nodes: &mut Vec<usize>,
    ) -> Option<usize> {
        let is_member = match doc.nodes[node_id].element_data() {
            // Binding-vocabulary elements are structural, never members; a
            // content element stands for its selection.
            Some(el) if el.name.ns == *XBL_NAMESPACE => {
                if is_content_element(doc, node_id) {
                    if let Some(selection) = self.selected_content_of(doc, node_id) {
                        for selected in selection {
                            prev = self.collect_flat(doc, selected, prev, set_links, nodes);
                        }
                    }
                }
                false
            }
            _ => true,
        };
        if is_member {
            nodes.push(node_id);
            if set_links {
                let record = self.record_mut(node_id);
                record.previous_sibling = prev;
                record.links_valid = true;
                if let Some(prev) = prev {
                    self.record_mut(prev).next_sibling = Some(node_id);
                }
            }
            prev = Some(node_id);
        }
        prev
    }

    fn selected_content_of(&self, doc: &Document, content_element: usize) -> Option<Vec<usize>> {
        let bound = self.bound_element(doc, content_element)?;
        let shadow = self.shadow_tree_of(bound)?;
        self.content_managers
            .get(&shadow)?
            .selected_content(content_element)
            .map(|nodes| nodes.to_vec())
    }

    /// Drop `node_id`'s cached child lists and the sibling links of their
    /// members.
    pub fn invalidate_child_nodes(&mut self, node_id: usize) {
        let mut members = Vec::new();
        if let Some(record) = self.records.get_mut(&node_id) {
            if let Some(nodes) = record.child_nodes.take() {
                members.extend(nodes);
            }
            record.scoped_child_nodes = None;
        }
        for member in members {
            let record = self.record_mut(member);
            record.links_valid = false;
            record.next_sibling = None;
            record.previous_sibling = None;
        }
    }

    /// Next sibling in the flattened view. Stale links are refreshed by
    /// recomputing the flat parent's child list; a node with no flat parent
    /// falls back to its raw sibling.
    pub fn flat_next_sibling(&mut self, doc: &Document, node_id: usize) -> Option<usize> {
        if let Some(record) = self.records.get(&node_id) {
            if record.links_valid {
                return record.next_sibling;
            }
        }
        match self.flat_parent(doc, node_id) {
            Some(parent) => {
                self.flat_child_nodes(doc, parent);
                self.records.get(&node_id).and_then(|record| record.next_sibling)
            }
            None => doc.next_sibling(node_id),
        }
    }

    /// Previous sibling in the flattened view.
    pub fn flat_previous_sibling(&mut self, doc: &Document, node_id: usize) -> Option<usize> {
        if let Some(record) = self.records.get(&node_id) {
            if record.links_valid {
                return record.previous_sibling;
            }
        }
        match self.flat_parent(doc, node_id) {
            Some(parent) => {
                self.flat_child_nodes(doc, parent);
                self.records
                    .get(&node_id)
                    .and_then(|record| record.previous_sibling)
            }
            None => doc.previous_sibling(node_id),
        }
    }

    pub fn flat_first_child(&mut self, doc: &Document, node_id: usize) -> Option<usize> {
        self.flat_child_nodes(doc, node_id).first().copied()
    }

    pub fn flat_last_child(&mut self, doc: &Document, node_id: usize) -> Option<usize> {
        self.flat_child_nodes(doc, node_id).last().copied()
    }

    /// How many flattened ancestors of `from` an event travelling towards
    /// `to` may bubble through before leaving the scopes shared with `to`.
    ///
    /// Both flattened ancestor chains are compared root-down. At the first
    /// divergence the limit retreats to the nearest enclosing bound element
    /// of the diverging node on `from`'s side; with no divergence the limit
    /// is the chain up to the root.
    pub fn compute_bubble_limit(&mut self, doc: &Document, from: usize, to: usize) -> usize {
        let mut from_list = Vec::new();
        let mut current = Some(from);
        while let Some(id) = current {
            from_list.push(id);
            current = self.flat_parent(doc, id);
        }
        let mut to_list = Vec::new();
        current = Some(to);
        while let Some(id) = current {
            to_list.push(id);
            current = self.flat_parent(doc, id);
        }

        let from_size = from_list.len();
        let to_size = to_list.len();
        for i in 0..from_size.min(to_size) {
            let n1 = from_list[from_size - i - 1];
            let n2 = to_list[to_size - i - 1];
            if n1 != n2 {
                let prev_bound = self.bound_element(doc, n1);
                let mut i = i;
                while i > 0 && prev_bound != Some(from_list[from_size - i - 1]) {
                    i -= 1;
                }
                return from_size - i - 1;
            }
        }
        1
    }
}
