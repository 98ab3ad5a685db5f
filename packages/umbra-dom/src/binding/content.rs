//! Per-shadow-tree content selection.
//!
//! A `ContentManager` is created when a shadow tree is attached to a bound
//! element and disposed when it is detached. It owns the selectors of every
//! content element in that shadow tree and the mapping from content element
//! to selected light-tree nodes. Content elements are processed in document
//! order, so an earlier content element always wins a contested node.

use std::collections::{HashMap, HashSet};

use umbra_traits::ContentSelectionChangedListener;

use crate::binding::ListenerId;
use crate::binding::manager::BindingManager;
use crate::binding::selector::{ContentSelector, SelectorContext, SelectorRegistry};
use crate::document::Document;
use crate::error::BindingError;
use crate::traversal::TreeTraverser;
use crate::vocab::{
    EXT_SELECTOR_LANGUAGE_ATTRIBUTE, XBL_INCLUDES_ATTRIBUTE, ext_attr, is_content_element,
    non_empty_attr,
};

type SelectionListener = Box<dyn ContentSelectionChangedListener>;

pub struct ContentManager {
    shadow_tree: usize,
    bound_element: usize,
    /// One selector per content element. Survives updates; dropped when the
    /// content element's selector attributes change.
    selectors: HashMap<usize, ContentSelector>,
    /// Committed selection of each content element.
    selected: HashMap<usize, Vec<usize>>,
    /// Content elements of the shadow tree, in document order.
    content_elements: Vec<usize>,
    listeners: HashMap<usize, Vec<(ListenerId, SelectionListener)>>,
    next_listener_id: u64,
}

impl ContentManager {
    pub(crate) fn new(shadow_tree: usize, bound_element: usize) -> Self {
        ContentManager {
            shadow_tree,
            bound_element,
            selectors: HashMap::new(),
            selected: HashMap::new(),
            content_elements: Vec::new(),
            listeners: HashMap::new(),
            next_listener_id: 0,
        }
    }

    pub fn shadow_tree(&self) -> usize {
        self.shadow_tree
    }

    pub fn bound_element(&self) -> usize {
        self.bound_element
    }

    /// The nodes currently projected by `content_element_id`, in document
    /// order.
    pub fn selected_content(&self, content_element_id: usize) -> Option<&[usize]> {
        self.selected.get(&content_element_id).map(Vec::as_slice)
    }

    /// The content elements of this shadow tree, in document order.
    pub fn content_elements(&self) -> &[usize] {
        &self.content_elements
    }

    /// Register a listener for selection changes of one content element.
    /// Per-element listeners fire before the binding manager's global ones.
    pub fn add_content_selection_changed_listener(
        &mut self,
        content_element_id: usize,
        listener: SelectionListener,
    ) -> ListenerId {
        let id = ListenerId::mint(&mut self.next_listener_id);
        self.listeners
            .entry(content_element_id)
            .or_default()
            .push((id, listener));
        id
    }

    pub fn remove_content_selection_changed_listener(
        &mut self,
        content_element_id: usize,
        listener_id: ListenerId,
    ) {
        if let Some(listeners) = self.listeners.get_mut(&content_element_id) {
            listeners.retain(|(id, _)| *id != listener_id);
        }
    }

    /// Drop the selector of a content element so the next update rebuilds it
    /// from the element's current attributes.
    pub(crate) fn invalidate_selector(&mut self, content_element_id: usize) {
        self.selectors.remove(&content_element_id);
    }

    /// Recompute every content element's selection against the current light
    /// tree. `first` suppresses the bind/unbind of newly (de)selected nodes,
    /// which the caller does itself right after attaching the shadow tree.
    pub(crate) fn update(&mut self, manager: &mut BindingManager, doc: &mut Document, first: bool) {
        let mut previously: HashSet<usize> = HashSet::new();
        for nodes in self.selected.values() {
            for &node in nodes {
                previously.insert(node);
                manager.release_content_claim(node);
            }
        }
        self.selected.clear();
        self.content_elements.clear();

        let content_elements: Vec<usize> = TreeTraverser::new_with_root(doc, self.shadow_tree)
            .filter(|id| is_content_element(doc, *id))
            .collect();

        let mut updated = false;
        for content_element in content_elements {
            self.content_elements.push(content_element);

            let mut changed = false;
            if !self.selectors.contains_key(&content_element) {
                let selector =
                    match build_selector(manager.selector_registry(), doc, content_element) {
                        Ok(selector) => selector,
                        Err(error) => {
                            manager.report_error(&error);
                            ContentSelector::inert()
                        }
                    };
                self.selectors.insert(content_element, selector);
                changed = true;
            }

            let selector = self
                .selectors
                .get_mut(&content_element)
                .expect("selector was just ensured");
            let result = selector.update(&SelectorContext {
                doc: &*doc,
                manager: &*manager,
                content_element,
                bound_element: self.bound_element,
            });
            match result {
                Ok(selection_changed) => changed |= selection_changed,
                // Evaluation failed; the selector kept its previous
                // selection and we keep projecting it.
                Err(error) => manager.report_error(&error),
            }

            let nodes = selector.selected().to_vec();
            for &node in &nodes {
                manager.claim_content(node, content_element);
            }
            self.selected.insert(content_element, nodes);

            if changed {
                updated = true;
                self.dispatch_content_selection_changed(manager, doc, content_element);
            }
        }

        if updated && !first {
            let newly: HashSet<usize> = self.selected.values().flatten().copied().collect();
            let mut removed: Vec<usize> = previously.difference(&newly).copied().collect();
            let mut added: Vec<usize> = newly.difference(&previously).copied().collect();
            removed.sort_unstable();
            added.sort_unstable();
            manager.shadow_tree_selected_content_changed(doc, &removed, &added);
        }
    }

    fn dispatch_content_selection_changed(
        &mut self,
        manager: &mut BindingManager,
        doc: &mut Document,
        content_element: usize,
    ) {
        if let Some(flat_parent) = manager.flat_parent(doc, content_element) {
            manager.invalidate_child_nodes(flat_parent);
        }
        if let Some(listeners) = self.listeners.get_mut(&content_element) {
            for (_, listener) in listeners.iter_mut() {
                if let Err(error) = listener.content_selection_changed(content_element) {
                    manager.report_listener_error(error);
                }
            }
        }
        manager.dispatch_content_selection_changed(content_element);
    }

    /// Release every claim this manager holds. Called when the shadow tree
    /// detaches from its bound element.
    pub(crate) fn dispose(mut self, manager: &mut BindingManager) {
        for nodes in self.selected.values() {
            for &node in nodes {
                manager.release_content_claim(node);
            }
        }
        self.selected.clear();
        self.selectors.clear();
        self.listeners.clear();
    }
}

/// Build the selector a content element's attributes ask for.
///
/// No `includes` attribute means the implicit select-everything selector. An
/// `includes` expression is interpreted in the language named by the
/// element's `selectorLanguage` extension attribute, falling back to the
/// document element's, falling back to the child-axis subset grammar.
fn build_selector(
    registry: &SelectorRegistry,
    doc: &Document,
    content_element: usize,
) -> Result<ContentSelector, BindingError> {
    let Some(expression) = non_empty_attr(doc, content_element, XBL_INCLUDES_ATTRIBUTE) else {
        return Ok(ContentSelector::implicit());
    };
    let language = ext_attr(doc, content_element, EXT_SELECTOR_LANGUAGE_ATTRIBUTE).or_else(|| {
        doc.root_element_id()
            .and_then(|root| ext_attr(doc, root, EXT_SELECTOR_LANGUAGE_ATTRIBUTE))
    });
    match language {
        None => ContentSelector::subset(expression),
        Some(language) => registry.create(language, expression),
    }
}
