use markup5ever::{QualName, local_name};
use umbra_traits::MutationEvent;

use crate::document::Document;
use crate::node::Attribute;

/// Tracked mutator for a [`Document`].
///
/// Hosts make all of their tree edits through one of these. Every edit is
/// recorded as a [`MutationEvent`]; dropping the mutator commits the batch to
/// the document's pending queue, which is the signal to the binding engine
/// that the subtree has settled. Edits made by the binding engine itself
/// (template cloning, shadow tree construction) go through the raw
/// [`Document`] methods instead and are never observed as mutations.
pub struct DocumentMutator<'doc> {
    /// Document is public to allow read access during mutation.
    pub doc: &'doc mut Document,
    events: Vec<MutationEvent>,
}

impl Drop for DocumentMutator<'_> {
    fn drop(&mut self) {
        self.doc.pending_mutations.append(&mut self.events);
    }
}

impl<'doc> DocumentMutator<'doc> {
    pub fn new(doc: &'doc mut Document) -> Self {
        DocumentMutator {
            doc,
            events: Vec::new(),
        }
    }

    // Node creation. Created nodes are detached and generate no events until
    // they are inserted.

    pub fn create_element(&mut self, name: QualName, attrs: Vec<Attribute>) -> usize {
        self.doc.create_element(name, attrs)
    }

    pub fn create_text_node(&mut self, text: &str) -> usize {
        self.doc.create_text_node(text)
    }

    // Structural edits

    pub fn append_children(&mut self, parent_id: usize, child_ids: &[usize]) {
        self.doc.append(parent_id, child_ids);
        for &child_id in child_ids {
            self.events.push(MutationEvent::ChildInserted {
                node: child_id,
                parent: parent_id,
            });
        }
    }

    pub fn insert_nodes_before(&mut self, anchor_id: usize, new_node_ids: &[usize]) {
        self.doc.insert_before(anchor_id, new_node_ids);
        let parent = self.doc.nodes[anchor_id].parent.unwrap();
        for &new_id in new_node_ids {
            self.events.push(MutationEvent::ChildInserted {
                node: new_id,
                parent,
            });
        }
    }

    pub fn insert_nodes_after(&mut self, anchor_id: usize, new_node_ids: &[usize]) {
        let parent_id = self.doc.nodes[anchor_id]
            .parent
            .expect("insert_nodes_after anchor must have a parent");
        let next_sibling = {
            let parent = &self.doc.nodes[parent_id];
            let index = parent.index_of_child(anchor_id).unwrap();
            parent.children.get(index + 1).copied()
        };
        match next_sibling {
            Some(sibling_id) => self.insert_nodes_before(sibling_id, new_node_ids),
            None => self.append_children(parent_id, new_node_ids),
        }
    }

    /// Detach a node from its parent. The subtree stays readable so that the
    /// binding engine can inspect it when the batch is flushed.
    pub fn remove_node(&mut self, node_id: usize) {
        let Some(parent) = self.doc.nodes[node_id].parent else {
            return;
        };
        self.doc.remove_node(node_id);
        self.events.push(MutationEvent::ChildRemoved {
            node: node_id,
            parent,
        });
    }

    // Attribute and character data edits

    pub fn set_attribute(&mut self, node_id: usize, name: QualName, value: &str) {
        let Some(el) = self.doc.nodes[node_id].element_data_mut() else {
            return;
        };
        let existing = el
            .attrs
            .iter_mut()
            .find(|attr| attr.name.ns == name.ns && attr.name.local == name.local);
        let old_value = match existing {
            Some(attr) => {
                let old = std::mem::replace(&mut attr.value, value.to_string());
                Some(old)
            }
            None => {
                el.attrs.push(Attribute {
                    name: name.clone(),
                    value: value.to_string(),
                });
                None
            }
        };
        if old_value.as_deref() == Some(value) {
            return;
        }
        if name.local == local_name!("id") && name.ns.is_empty() {
            self.update_id_attr(node_id, old_value.as_deref(), Some(value));
        }
        self.events.push(MutationEvent::AttrModified {
            node: node_id,
            name,
            old_value,
            new_value: Some(value.to_string()),
        });
    }

    pub fn clear_attribute(&mut self, node_id: usize, name: QualName) {
        let Some(el) = self.doc.nodes[node_id].element_data_mut() else {
            return;
        };
        let index = el
            .attrs
            .iter()
            .position(|attr| attr.name.ns == name.ns && attr.name.local == name.local);
        let Some(index) = index else {
            return;
        };
        let old = el.attrs.remove(index);
        if name.local == local_name!("id") && name.ns.is_empty() {
            self.update_id_attr(node_id, Some(&old.value), None);
        }
        self.events.push(MutationEvent::AttrModified {
            node: node_id,
            name,
            old_value: Some(old.value),
            new_value: None,
        });
    }

    pub fn set_node_text(&mut self, node_id: usize, text: &str) {
        let Some(data) = self.doc.nodes[node_id].text_data_mut() else {
            return;
        };
        if data.content == text {
            return;
        }
        data.content = text.to_string();
        self.events
            .push(MutationEvent::CharacterDataModified { node: node_id });
    }

    fn update_id_attr(&mut self, node_id: usize, old: Option<&str>, new: Option<&str>) {
        if let Some(old) = old {
            if self.doc.nodes_to_id.get(old) == Some(&node_id) {
                self.doc.nodes_to_id.remove(old);
            }
        }
        if let Some(new) = new {
            self.doc.nodes_to_id.insert(new.to_string(), node_id);
        }
        if let Some(el) = self.doc.nodes[node_id].element_data_mut() {
            el.id = new.map(str::to_string);
        }
    }
}
