use std::cmp::Ordering;
use std::collections::HashMap;

use markup5ever::{LocalName, Namespace, QualName, local_name, ns};
use slab::Slab;
use smallvec::SmallVec;
use umbra_traits::MutationEvent;

use crate::mutator::DocumentMutator;
use crate::node::{Attribute, ElementData, Node, NodeData, NodeFlags, TextNodeData};
use crate::traversal::TreeTraverser;

/// An arena-backed document tree.
///
/// The document node always occupies slab index 0. Structural edits made
/// through the raw methods here do not produce [`MutationEvent`]s; hosts edit
/// through [`Document::mutate`] so the binding engine can observe the batch
/// once the mutator is dropped.
pub struct Document {
    pub(crate) nodes: Box<Slab<Node>>,

    /// A map from the `id` attribute of elements to their node id.
    pub(crate) nodes_to_id: HashMap<String, usize>,

    /// Mutations recorded by mutators, not yet drained by the binding engine.
    pub(crate) pending_mutations: Vec<MutationEvent>,
}

impl Document {
    pub fn new() -> Self {
        let mut nodes = Box::new(Slab::new());
        let id = nodes.insert(Node::new(0, NodeData::Document));
        nodes[id].flags.insert(NodeFlags::IS_IN_DOCUMENT);
        debug_assert_eq!(id, 0);
        Document {
            nodes,
            nodes_to_id: HashMap::new(),
            pending_mutations: Vec::new(),
        }
    }

    /// Create a mutator through which hosts edit the tree. Mutations made
    /// through it are queued for the binding engine when it is dropped.
    pub fn mutate(&mut self) -> DocumentMutator<'_> {
        DocumentMutator::new(self)
    }

    pub(crate) fn drain_mutations(&mut self) -> Vec<MutationEvent> {
        std::mem::take(&mut self.pending_mutations)
    }

    /// Whether any recorded mutations are waiting for the binding engine.
    pub fn has_pending_mutations(&self) -> bool {
        !self.pending_mutations.is_empty()
    }

    // Node accessors

    pub fn get_node(&self, node_id: usize) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn get_node_mut(&mut self, node_id: usize) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    pub fn root_node(&self) -> &Node {
        &self.nodes[0]
    }

    /// The document element, i.e. the first element child of the document
    /// node.
    pub fn root_element_id(&self) -> Option<usize> {
        self.nodes[0]
            .children
            .iter()
            .copied()
            .find(|id| self.nodes[*id].is_element())
    }

    pub fn node_by_id_attr(&self, id: &str) -> Option<usize> {
        self.nodes_to_id.get(id).copied()
    }

    /// All elements with the given expanded name, in document order.
    pub fn elements_by_name(&self, namespace: &Namespace, local: &LocalName) -> Vec<usize> {
        TreeTraverser::new(self)
            .filter(|id| {
                self.nodes[*id].element_data().is_some_and(|el| {
                    el.name.ns == *namespace && el.name.local == *local
                })
            })
            .collect()
    }

    // Node creation

    pub fn create_node(&mut self, data: NodeData) -> usize {
        let entry = self.nodes.vacant_entry();
        let id = entry.key();
        entry.insert(Node::new(id, data));
        id
    }

    pub fn create_element(&mut self, name: QualName, attrs: Vec<Attribute>) -> usize {
        let data = ElementData::new(name, attrs);
        let id_attr = data.id.clone();
        let node_id = self.create_node(NodeData::Element(data));
        if let Some(id_attr) = id_attr {
            self.nodes_to_id.insert(id_attr, node_id);
        }
        node_id
    }

    pub fn create_text_node(&mut self, text: &str) -> usize {
        self.create_node(NodeData::Text(TextNodeData {
            content: text.to_string(),
        }))
    }

    // Structural edits. These keep parent links, child lists and the
    // IS_IN_DOCUMENT flag consistent but record no mutation events.

    /// Append `children` to `parent`'s child list. The children must be
    /// detached.
    pub fn append(&mut self, parent_id: usize, children: &[usize]) {
        let in_doc = self.nodes[parent_id].is_in_document();
        for &child_id in children {
            debug_assert!(self.nodes[child_id].parent.is_none());
            self.nodes[child_id].parent = Some(parent_id);
            self.nodes[parent_id].children.push(child_id);
            self.set_in_document(child_id, in_doc);
        }
    }

    /// Insert detached `new_nodes` immediately before `anchor` under its
    /// parent.
    pub fn insert_before(&mut self, anchor_id: usize, new_nodes: &[usize]) {
        let parent_id = self.nodes[anchor_id]
            .parent
            .expect("insert_before anchor must have a parent");
        let index = self.nodes[parent_id]
            .index_of_child(anchor_id)
            .expect("anchor must be a child of its parent");
        let in_doc = self.nodes[parent_id].is_in_document();
        for (n, &new_id) in new_nodes.iter().enumerate() {
            debug_assert!(self.nodes[new_id].parent.is_none());
            self.nodes[new_id].parent = Some(parent_id);
            self.nodes[parent_id].children.insert(index + n, new_id);
            self.set_in_document(new_id, in_doc);
        }
    }

    /// Detach a node from its parent. The subtree remains allocated and
    /// readable until dropped with [`Document::remove_and_drop_node`].
    pub fn remove_node(&mut self, node_id: usize) {
        if let Some(parent_id) = self.nodes[node_id].parent.take() {
            if let Some(index) = self.nodes[parent_id].index_of_child(node_id) {
                self.nodes[parent_id].children.remove(index);
            }
        }
        self.set_in_document(node_id, false);
    }

    /// Detach a node and free its entire subtree.
    pub fn remove_and_drop_node(&mut self, node_id: usize) {
        self.remove_node(node_id);
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            let node = self.nodes.remove(id);
            if let NodeData::Element(el) = &node.data {
                if let Some(id_attr) = &el.id {
                    if self.nodes_to_id.get(id_attr) == Some(&id) {
                        self.nodes_to_id.remove(id_attr);
                    }
                }
            }
            stack.extend(node.children);
        }
    }

    fn set_in_document(&mut self, node_id: usize, in_doc: bool) {
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            self.nodes[id].flags.set(NodeFlags::IS_IN_DOCUMENT, in_doc);
            stack.extend(self.nodes[id].children.iter().copied());
        }
    }

    /// Recursively clone a subtree. The clone is detached and its `id`
    /// attributes are not registered for lookup, so cloned shadow content
    /// never shadows the original elements.
    pub fn deep_clone_node(&mut self, node_id: usize) -> usize {
        let data = self.nodes[node_id].data.clone();
        let children = self.nodes[node_id].children.clone();
        let clone_id = self.create_node(data);
        for child_id in children {
            let child_clone = self.deep_clone_node(child_id);
            self.nodes[child_clone].parent = Some(clone_id);
            self.nodes[clone_id].children.push(child_clone);
        }
        clone_id
    }

    // Queries

    /// Resolve a namespace prefix (or the default namespace for `None`) by
    /// walking `xmlns` attributes from `node_id` towards the root.
    pub fn lookup_namespace_uri(&self, node_id: usize, prefix: Option<&str>) -> Option<Namespace> {
        let mut current = Some(node_id);
        while let Some(id) = current {
            let node = &self.nodes[id];
            if let Some(el) = node.element_data() {
                for attr in &el.attrs {
                    let declares = match prefix {
                        Some(p) => {
                            attr.name.local.as_ref() == p
                                && (attr.name.ns == ns!(xmlns)
                                    || attr.name.prefix.as_deref() == Some("xmlns"))
                        }
                        None => {
                            attr.name.local == local_name!("xmlns") && attr.name.prefix.is_none()
                        }
                    };
                    if declares {
                        return Some(Namespace::from(attr.value.as_str()));
                    }
                }
            }
            current = node.parent;
        }
        None
    }

    pub fn next_sibling(&self, node_id: usize) -> Option<usize> {
        let parent = &self.nodes[self.nodes[node_id].parent?];
        let index = parent.index_of_child(node_id)?;
        parent.children.get(index + 1).copied()
    }

    pub fn previous_sibling(&self, node_id: usize) -> Option<usize> {
        let parent = &self.nodes[self.nodes[node_id].parent?];
        let index = parent.index_of_child(node_id)?;
        index.checked_sub(1).map(|i| parent.children[i])
    }

    /// Chain of node ids from the root (or detached subtree root) down to
    /// `node_id`, inclusive.
    pub(crate) fn ancestor_chain_from_root(&self, node_id: usize) -> SmallVec<[usize; 16]> {
        let mut chain = SmallVec::new();
        chain.push(node_id);
        let mut current = node_id;
        while let Some(parent) = self.nodes[current].parent {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Compare two nodes by document order. Ancestors sort before their
    /// descendants; nodes in unrelated detached subtrees sort by the ids of
    /// their subtree roots so the ordering stays total.
    pub fn compare_document_order(&self, node_a: usize, node_b: usize) -> Ordering {
        if node_a == node_b {
            return Ordering::Equal;
        }

        let chain_a = self.ancestor_chain_from_root(node_a);
        let chain_b = self.ancestor_chain_from_root(node_b);

        if chain_a[0] != chain_b[0] {
            return chain_a[0].cmp(&chain_b[0]);
        }

        // Find where the chains diverge
        let mut common_depth = 0;
        for (a, b) in chain_a.iter().zip(chain_b.iter()) {
            if a != b {
                break;
            }
            common_depth += 1;
        }

        // If one is an ancestor of the other
        if common_depth == chain_a.len() {
            return Ordering::Less;
        }
        if common_depth == chain_b.len() {
            return Ordering::Greater;
        }

        // Compare position among siblings at the divergence point
        let divergent_a = chain_a[common_depth];
        let divergent_b = chain_b[common_depth];
        let parent = &self.nodes[chain_a[common_depth - 1]];
        for &child_id in &parent.children {
            if child_id == divergent_a {
                return Ordering::Less;
            }
            if child_id == divergent_b {
                return Ordering::Greater;
            }
        }

        unreachable!("divergent children must both be children of the common parent");
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.nodes.len())
            .field("pending_mutations", &self.pending_mutations.len())
            .finish()
    }
}
