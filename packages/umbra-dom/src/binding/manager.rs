//! The binding manager.
//!
//! Owns the definition registry, the per-node binding records, the content
//! managers of all attached shadow trees and the listener lists. All methods
//! take the [`Document`] explicitly; the manager holds no references into
//! the tree, only node ids.

use std::collections::HashMap;

use markup5ever::{LocalName, Namespace, QualName};
use slab::Slab;
use umbra_traits::{
    BindingListener, ContentSelectionChangedListener, ErrorSink, ListenerError, MutationEvent,
    NoopErrorSink, ShadowTreeEvent, ShadowTreeListener, ShadowTreePhase,
};

use crate::binding::ListenerId;
use crate::binding::content::ContentManager;
use crate::binding::record::BindingRecord;
use crate::binding::selector::SelectorRegistry;
use crate::document::Document;
use crate::error::BindingError;
use crate::resolve::{FragmentResolver, ReferenceResolver};
use crate::scene::SceneGraphBuilder;
use crate::traversal::{AncestorTraverser, TreeTraverser};
use crate::vocab::{
    EXT_NAMESPACE, EXT_SELECTOR_LANGUAGE_ATTRIBUTE, XBL_BINDINGS_ATTRIBUTE,
    XBL_ELEMENT_ATTRIBUTE, XBL_INCLUDES_ATTRIBUTE, XBL_NAMESPACE, XBL_REF_ATTRIBUTE,
    XBL_SHADOW_TREE_TAG, is_bindable_element, is_content_element, is_definition_element,
    is_import_element, is_template_element, is_xbl_root_element, non_empty_attr,
    parse_bound_element_name,
};

pub(crate) type DefId = usize;

/// One registration of a definition element for one expanded name. The same
/// definition element can be registered several times through different
/// import elements.
struct DefinitionRecord {
    namespace: Namespace,
    local_name: LocalName,
    definition_element: usize,
    template_element: Option<usize>,
    /// The import or definition-reference element this registration came
    /// through, `None` for definitions registered directly.
    import_element: Option<usize>,
}

struct ImportRecord {
    /// The resolved target of the `bindings`/`ref` attribute.
    target: usize,
    /// Whether this is a single-definition reference rather than an import
    /// of a whole bindings group.
    is_ref: bool,
}

/// Work deferred until the end of a mutation batch.
#[derive(Default)]
struct PendingMutations {
    removed_definitions: Vec<usize>,
    removed_imports: Vec<usize>,
    /// `(template element, definition element)` pairs.
    removed_templates: Vec<(usize, usize)>,
    invalidations: Vec<usize>,
    rebinds: Vec<(Namespace, LocalName)>,
    /// Shadow tree roots whose content manager must re-select.
    content_updates: Vec<usize>,
}

pub struct BindingManager {
    processing: bool,
    pub(crate) records: HashMap<usize, BindingRecord>,

    definitions: Slab<DefinitionRecord>,
    /// Registrations per expanded name, head active, ordered by the document
    /// position of the governing element.
    definition_lists: HashMap<(Namespace, LocalName), Vec<DefId>>,
    /// `(definition element, importing element)` to registration.
    definitions_by_key: HashMap<(usize, Option<usize>), DefId>,
    imports: HashMap<usize, ImportRecord>,

    pub(crate) content_managers: HashMap<usize, ContentManager>,
    selector_registry: SelectorRegistry,
    resolver: Box<dyn ReferenceResolver>,
    error_sink: Box<dyn ErrorSink>,
    scene_builder: Option<Box<dyn SceneGraphBuilder>>,

    binding_listeners: Vec<(ListenerId, Box<dyn BindingListener>)>,
    shadow_tree_listeners: Vec<(ListenerId, Box<dyn ShadowTreeListener>)>,
    selection_listeners: Vec<(ListenerId, Box<dyn ContentSelectionChangedListener>)>,
    next_listener_id: u64,

    pending: PendingMutations,
}

impl Default for BindingManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingManager {
    pub fn new() -> Self {
        BindingManager {
            processing: false,
            records: HashMap::new(),
            definitions: Slab::new(),
            definition_lists: HashMap::new(),
            definitions_by_key: HashMap::new(),
            imports: HashMap::new(),
            content_managers: HashMap::new(),
            selector_registry: SelectorRegistry::default(),
            resolver: Box::new(FragmentResolver),
            error_sink: Box::new(NoopErrorSink),
            scene_builder: None,
            binding_listeners: Vec::new(),
            shadow_tree_listeners: Vec::new(),
            selection_listeners: Vec::new(),
            next_listener_id: 0,
            pending: PendingMutations::default(),
        }
    }

    // Configuration

    pub fn set_error_sink(&mut self, sink: Box<dyn ErrorSink>) {
        self.error_sink = sink;
    }

    pub fn set_reference_resolver(&mut self, resolver: Box<dyn ReferenceResolver>) {
        self.resolver = resolver;
    }

    pub fn set_scene_graph_builder(&mut self, builder: Box<dyn SceneGraphBuilder>) {
        self.scene_builder = Some(builder);
    }

    pub fn selector_registry(&self) -> &SelectorRegistry {
        &self.selector_registry
    }

    pub fn selector_registry_mut(&mut self) -> &mut SelectorRegistry {
        &mut self.selector_registry
    }

    // Listener registration

    pub fn add_binding_listener(&mut self, listener: Box<dyn BindingListener>) -> ListenerId {
        let id = ListenerId::mint(&mut self.next_listener_id);
        self.binding_listeners.push((id, listener));
        id
    }

    pub fn remove_binding_listener(&mut self, listener_id: ListenerId) {
        self.binding_listeners.retain(|(id, _)| *id != listener_id);
    }

    pub fn add_shadow_tree_listener(&mut self, listener: Box<dyn ShadowTreeListener>) -> ListenerId {
        let id = ListenerId::mint(&mut self.next_listener_id);
        self.shadow_tree_listeners.push((id, listener));
        id
    }

    pub fn remove_shadow_tree_listener(&mut self, listener_id: ListenerId) {
        self.shadow_tree_listeners
            .retain(|(id, _)| *id != listener_id);
    }

    /// Register a selection listener notified for every content element of
    /// every shadow tree, after that content element's own listeners.
    pub fn add_content_selection_changed_listener(
        &mut self,
        listener: Box<dyn ContentSelectionChangedListener>,
    ) -> ListenerId {
        let id = ListenerId::mint(&mut self.next_listener_id);
        self.selection_listeners.push((id, listener));
        id
    }

    pub fn remove_content_selection_changed_listener(&mut self, listener_id: ListenerId) {
        self.selection_listeners
            .retain(|(id, _)| *id != listener_id);
    }

    // Processing lifecycle

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// Scan the document for definitions and imports, register them all and
    /// bind the document element's subtree.
    pub fn start_processing(&mut self, doc: &mut Document) {
        if self.processing {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("start processing bindings");

        let mut definition_elements = Vec::new();
        let mut import_elements = Vec::new();
        for node_id in TreeTraverser::new(doc) {
            if is_definition_element(doc, node_id) {
                definition_elements.push(node_id);
            } else if is_import_element(doc, node_id) {
                import_elements.push(node_id);
            }
        }
        for def in definition_elements {
            if non_empty_attr(doc, def, XBL_REF_ATTRIBUTE).is_some() {
                if let Err(error) = self.add_definition_ref(doc, def) {
                    self.report_error(&error);
                }
            } else {
                self.register_definition(doc, def, None);
            }
        }
        for import in import_elements {
            if let Err(error) = self.add_import(doc, import) {
                self.report_error(&error);
            }
        }

        self.processing = true;
        if let Some(root) = doc.root_element_id() {
            self.bind(doc, root);
        }
    }

    /// Remove every registration in reverse dependency order (references and
    /// imports first, then plain definitions), unbinding all affected
    /// elements on the way out.
    pub fn stop_processing(&mut self, doc: &mut Document) {
        if !self.processing {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("stop processing bindings");
        self.processing = false;

        let mut import_elements: Vec<usize> = self.imports.keys().copied().collect();
        import_elements.sort_unstable();
        for import in import_elements {
            let is_ref = self.imports.get(&import).map(|record| record.is_ref);
            match is_ref {
                Some(true) => self.remove_definition_ref(doc, import),
                Some(false) => self.remove_import(doc, import),
                None => {}
            }
        }
        loop {
            let next = self
                .definition_lists
                .values()
                .find_map(|list| list.first().copied());
            let Some(def_id) = next else { break };
            self.remove_definition(doc, def_id);
        }

        self.content_managers.clear();
        self.records.clear();
        self.pending = PendingMutations::default();
    }

    // Definition registry

    /// Parse a definition element's bound name and register it, reporting a
    /// parse failure to the error sink.
    fn register_definition(&mut self, doc: &mut Document, def: usize, import: Option<usize>) {
        match parse_bound_element_name(doc, def) {
            Some((namespace, local_name)) => {
                self.add_definition(doc, namespace, local_name, def, import);
            }
            None => self.report_error(&BindingError::InvalidDefinition { node: def }),
        }
    }

    fn add_definition(
        &mut self,
        doc: &mut Document,
        namespace: Namespace,
        local_name: LocalName,
        definition_element: usize,
        import_element: Option<usize>,
    ) {
        let template_element = doc.nodes[definition_element]
            .children
            .iter()
            .copied()
            .find(|child| is_template_element(doc, *child));

        let def_id = self.definitions.insert(DefinitionRecord {
            namespace: namespace.clone(),
            local_name: local_name.clone(),
            definition_element,
            template_element,
            import_element,
        });
        self.definitions_by_key
            .insert((definition_element, import_element), def_id);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "registered definition {definition_element} for {{{namespace}}}{local_name}"
        );

        // Priority follows the document position of the governing element:
        // the importing element for imported registrations, the definition
        // element itself otherwise.
        let became_active = {
            let definitions = &self.definitions;
            let list = self
                .definition_lists
                .entry((namespace.clone(), local_name.clone()))
                .or_default();
            list.push(def_id);
            list.sort_by(|a, b| {
                let governing = |id: DefId| {
                    let record = &definitions[id];
                    record.import_element.unwrap_or(record.definition_element)
                };
                doc.compare_document_order(governing(*a), governing(*b))
                    .then(a.cmp(b))
            });
            list.first() == Some(&def_id)
        };

        if became_active && self.processing {
            if let Some(root) = doc.root_element_id() {
                self.rebind(doc, &namespace, &local_name, root);
            }
        }
    }

    fn remove_definition(&mut self, doc: &mut Document, def_id: DefId) {
        let record = self.definitions.remove(def_id);
        self.definitions_by_key
            .remove(&(record.definition_element, record.import_element));

        let key = (record.namespace.clone(), record.local_name.clone());
        let mut was_active = false;
        if let Some(list) = self.definition_lists.get_mut(&key) {
            was_active = list.first() == Some(&def_id);
            list.retain(|id| *id != def_id);
            if list.is_empty() {
                self.definition_lists.remove(&key);
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "removed definition {} for {{{}}}{}",
            record.definition_element,
            record.namespace,
            record.local_name
        );

        // Removing a non-active registration never disturbs bound elements.
        if was_active {
            if let Some(root) = doc.root_element_id() {
                self.rebind(doc, &record.namespace, &record.local_name, root);
            }
        }
    }

    fn active_definition(&self, namespace: &Namespace, local_name: &LocalName) -> Option<DefId> {
        self.definition_lists
            .get(&(namespace.clone(), local_name.clone()))
            .and_then(|list| list.first().copied())
    }

    // Imports

    fn add_import(&mut self, doc: &mut Document, import_element: usize) -> Result<(), BindingError> {
        let Some(uri) = non_empty_attr(doc, import_element, XBL_BINDINGS_ATTRIBUTE) else {
            // An import without a bindings attribute imports nothing; it
            // becomes live if the attribute is set later.
            return Ok(());
        };
        let uri = uri.to_string();
        let target = self
            .resolver
            .resolve_referenced_node(doc, import_element, &uri)?;
        if doc.nodes[target].is_element()
            && !is_xbl_root_element(doc, target)
            && !is_definition_element(doc, target)
        {
            return Err(BindingError::BadReferenceTarget { uri });
        }
        self.imports.insert(
            import_element,
            ImportRecord {
                target,
                is_ref: false,
            },
        );
        self.add_imported_definitions(doc, import_element, target);
        Ok(())
    }

    /// Walk the imported subtree registering every definition in it against
    /// the importing element. Nested import elements are left alone; they
    /// carry their own registrations.
    fn add_imported_definitions(&mut self, doc: &mut Document, import_element: usize, node: usize) {
        if is_definition_element(doc, node) {
            self.register_definition(doc, node, Some(import_element));
            return;
        }
        if is_import_element(doc, node) && node != import_element {
            return;
        }
        for child in doc.nodes[node].children.clone() {
            self.add_imported_definitions(doc, import_element, child);
        }
    }

    /// Imports (not definition references) whose imported subtree contains
    /// `node`. Nested import elements shield their subtree, matching the
    /// registration walk above.
    fn imports_containing(&self, doc: &Document, node: usize) -> Vec<usize> {
        let mut containing: Vec<usize> = self
            .imports
            .iter()
            .filter(|(import_element, record)| {
                if record.is_ref {
                    return false;
                }
                let mut current = node;
                loop {
                    if current == record.target {
                        return true;
                    }
                    if is_import_element(doc, current) && current != **import_element {
                        return false;
                    }
                    match doc.nodes[current].parent {
                        Some(parent) => current = parent,
                        None => return false,
                    }
                }
            })
            .map(|(import_element, _)| *import_element)
            .collect();
        containing.sort_unstable();
        containing
    }

    fn remove_import(&mut self, doc: &mut Document, import_element: usize) {
        if self.imports.remove(&import_element).is_none() {
            return;
        }
        let imported: Vec<DefId> = self
            .definitions
            .iter()
            .filter(|(_, record)| record.import_element == Some(import_element))
            .map(|(id, _)| id)
            .collect();
        for def_id in imported {
            self.remove_definition(doc, def_id);
        }
    }

    /// Register a definition reference: a definition element whose `ref`
    /// attribute points at another definition. The referencing element's own
    /// `element` attribute names the elements bound; its document position
    /// governs priority.
    fn add_definition_ref(&mut self, doc: &mut Document, def_ref: usize) -> Result<(), BindingError> {
        let Some(uri) = non_empty_attr(doc, def_ref, XBL_REF_ATTRIBUTE) else {
            return Ok(());
        };
        let uri = uri.to_string();
        let target = self.resolver.resolve_referenced_element(doc, def_ref, &uri)?;
        if !is_definition_element(doc, target) {
            return Err(BindingError::BadReferenceTarget { uri });
        }
        let Some((namespace, local_name)) = parse_bound_element_name(doc, def_ref) else {
            return Err(BindingError::InvalidDefinition { node: def_ref });
        };
        self.imports
            .insert(def_ref, ImportRecord { target, is_ref: true });
        self.add_definition(doc, namespace, local_name, target, Some(def_ref));
        Ok(())
    }

    fn remove_definition_ref(&mut self, doc: &mut Document, def_ref: usize) {
        let Some(record) = self.imports.remove(&def_ref) else {
            return;
        };
        if let Some(&def_id) = self.definitions_by_key.get(&(record.target, Some(def_ref))) {
            self.remove_definition(doc, def_id);
        }
    }

    // Binding

    /// Bind an element (or, for non-bindable elements, its scoped subtree)
    /// against the currently active definitions.
    pub(crate) fn bind(&mut self, doc: &mut Document, element: usize) {
        if is_bindable_element(doc, element) {
            let name = doc.nodes[element]
                .element_data()
                .map(|el| (el.name.ns.clone(), el.name.local.clone()));
            let Some((namespace, local_name)) = name else {
                return;
            };
            let def = self.active_definition(&namespace, &local_name);
            self.set_active_definition(doc, element, def);
        } else {
            for child in self.scoped_child_nodes(doc, element) {
                if doc.nodes[child].is_element() {
                    self.bind(doc, child);
                }
            }
        }
    }

    pub(crate) fn unbind(&mut self, doc: &mut Document, element: usize) {
        if is_bindable_element(doc, element) {
            self.record_mut(element).definition_element = None;
            self.set_shadow_tree(doc, element, None);
        } else {
            for child in self.scoped_child_nodes(doc, element) {
                if doc.nodes[child].is_element() {
                    self.unbind(doc, child);
                }
            }
        }
    }

    /// Re-apply the active definition to every bindable element with the
    /// given name in `element`'s scoped subtree. Scoped traversal descends
    /// into shadow trees, so nested bound content is reconsidered too.
    fn rebind(
        &mut self,
        doc: &mut Document,
        namespace: &Namespace,
        local_name: &LocalName,
        element: usize,
    ) {
        let matches = doc.nodes[element].element_data().is_some_and(|el| {
            el.name.ns == *namespace && el.name.local == *local_name
        });
        if is_bindable_element(doc, element) && matches {
            let def = self.active_definition(namespace, local_name);
            self.set_active_definition(doc, element, def);
        } else {
            for child in self.scoped_child_nodes(doc, element) {
                if doc.nodes[child].is_element() {
                    self.rebind(doc, namespace, local_name, child);
                }
            }
        }
    }

    fn set_active_definition(&mut self, doc: &mut Document, element: usize, def: Option<DefId>) {
        let definition_element = def.map(|id| self.definitions[id].definition_element);
        self.record_mut(element).definition_element = definition_element;
        match def.filter(|&id| self.definitions[id].template_element.is_some()) {
            Some(def_id) => {
                let shadow = self.clone_template(doc, def_id);
                self.set_shadow_tree(doc, element, Some(shadow));
            }
            None => self.set_shadow_tree(doc, element, None),
        }
    }

    /// Instantiate a definition's template as a fresh shadow tree root. The
    /// clone is built through the raw document methods, so none of this is
    /// ever observed as a mutation.
    fn clone_template(&mut self, doc: &mut Document, def_id: DefId) -> usize {
        let template = self.definitions[def_id]
            .template_element
            .expect("definition has a template");
        let shadow = doc.create_element(
            QualName::new(
                None,
                XBL_NAMESPACE.clone(),
                LocalName::from(XBL_SHADOW_TREE_TAG),
            ),
            Vec::new(),
        );
        for child in doc.nodes[template].children.clone() {
            let clone = doc.deep_clone_node(child);
            doc.append(shadow, &[clone]);
        }
        shadow
    }

    /// Swap the shadow tree of a bound element. This is the heart of every
    /// binding transition: the old tree (if any) is announced, disposed and
    /// dropped; the new tree (if any) is attached, its content selected, the
    /// bound element's scoped children bound, and listeners notified.
    fn set_shadow_tree(&mut self, doc: &mut Document, element: usize, new_tree: Option<usize>) {
        let old_tree = self.record_mut(element).shadow_tree;

        if let Some(old) = old_tree {
            self.fire_shadow_tree_event(ShadowTreePhase::Unbinding, element, old);
            if let Some(cm) = self.content_managers.remove(&old) {
                cm.dispose(self);
            }
            self.record_mut(element).shadow_tree = None;
            self.record_mut(old).bound_element = None;
            self.discard_shadow_subtree(doc, old);
        }

        if let Some(new) = new_tree {
            self.fire_shadow_tree_event(ShadowTreePhase::Prebind, element, new);
            self.record_mut(element).shadow_tree = Some(new);
            self.record_mut(new).bound_element = Some(element);
            self.content_managers
                .insert(new, ContentManager::new(new, element));
            self.update_content_manager(doc, new, true);
        }

        self.invalidate_child_nodes(element);

        match new_tree {
            Some(new) => {
                for child in self.scoped_child_nodes(doc, element) {
                    if doc.nodes[child].is_element() {
                        self.bind(doc, child);
                    }
                }
                self.dispatch_binding_changed(element, Some(new));
                self.fire_shadow_tree_event(ShadowTreePhase::Bound, element, new);
                self.build_scene_nodes(doc, element);
            }
            None => self.dispatch_binding_changed(element, None),
        }
    }

    /// Tear down a detached shadow tree: dispose nested content managers,
    /// drop all binding records for its nodes and free the subtree. No
    /// events fire for the nested teardown.
    fn discard_shadow_subtree(&mut self, doc: &mut Document, shadow_root: usize) {
        let ids: Vec<usize> = TreeTraverser::new_with_root(doc, shadow_root).collect();
        for &id in &ids {
            let nested = self.records.get(&id).and_then(|record| record.shadow_tree);
            if let Some(nested) = nested {
                if let Some(cm) = self.content_managers.remove(&nested) {
                    cm.dispose(self);
                }
                self.discard_shadow_subtree(doc, nested);
            }
            self.records.remove(&id);
        }
        doc.remove_and_drop_node(shadow_root);
    }

    /// Run a content manager's update with the manager temporarily taken out
    /// of the registry, so the update can borrow the binding manager freely.
    fn update_content_manager(&mut self, doc: &mut Document, shadow_tree: usize, first: bool) {
        if let Some(mut cm) = self.content_managers.remove(&shadow_tree) {
            cm.update(self, doc, first);
            self.content_managers.insert(shadow_tree, cm);
        }
    }

    /// Called by a content manager after its selections changed: deselected
    /// elements lose their bindings, newly selected ones gain them.
    pub(crate) fn shadow_tree_selected_content_changed(
        &mut self,
        doc: &mut Document,
        removed: &[usize],
        added: &[usize],
    ) {
        for &node in removed {
            if doc.nodes[node].is_element() {
                self.unbind(doc, node);
            }
        }
        for &node in added {
            if doc.nodes[node].is_element() {
                self.bind(doc, node);
            }
        }
    }

    // Content manager access

    /// The content manager owning selections for the shadow tree whose scope
    /// `node_id` is in, if that scope is bound.
    pub fn content_manager_for(&self, doc: &Document, node_id: usize) -> Option<&ContentManager> {
        let bound = self.bound_element(doc, node_id)?;
        let shadow = self.shadow_tree_of(bound)?;
        self.content_managers.get(&shadow)
    }

    pub fn content_manager_for_mut(
        &mut self,
        doc: &Document,
        node_id: usize,
    ) -> Option<&mut ContentManager> {
        let bound = self.bound_element(doc, node_id)?;
        let shadow = self.shadow_tree_of(bound)?;
        self.content_managers.get_mut(&shadow)
    }

    // Mutation intake

    /// Drain the document's pending mutations and apply their consequences:
    /// registry maintenance, cache invalidation, selector re-evaluation and
    /// (re)binding. Additions act immediately; removals and content
    /// re-selection are deferred to the end of the batch so that a subtree
    /// being taken apart is only processed once.
    pub fn flush_mutations(&mut self, doc: &mut Document) {
        let events = doc.drain_mutations();
        if !self.processing {
            return;
        }
        for event in &events {
            self.route_mutation(doc, event);
        }
        self.flush_pending(doc);
    }

    fn route_mutation(&mut self, doc: &mut Document, event: &MutationEvent) {
        match event {
            MutationEvent::ChildInserted { node, parent } => {
                self.on_child_inserted(doc, *node, *parent);
            }
            MutationEvent::ChildRemoved { node, parent } => {
                self.on_child_removed(doc, *node, *parent);
            }
            MutationEvent::AttrModified {
                node,
                name,
                new_value,
                ..
            } => {
                self.on_attr_modified(doc, *node, name, new_value.as_deref());
            }
            MutationEvent::CharacterDataModified { node } => {
                self.note_template_mutation(doc, *node);
            }
        }
    }

    fn on_child_inserted(&mut self, doc: &mut Document, node: usize, parent: usize) {
        if !doc.nodes[node].is_in_document() {
            return;
        }

        // New definitions and imports at document scope register right away.
        if doc.nodes[node].is_element() {
            let document_scope = self.bound_element(doc, node).is_none();
            if is_definition_element(doc, node) && document_scope {
                if non_empty_attr(doc, node, XBL_REF_ATTRIBUTE).is_some() {
                    if let Err(error) = self.add_definition_ref(doc, node) {
                        self.report_error(&error);
                    }
                } else {
                    self.register_definition(doc, node, None);
                    // Landing inside an imported subtree also registers the
                    // definition on behalf of each importing element.
                    for import_element in self.imports_containing(doc, node) {
                        self.register_definition(doc, node, Some(import_element));
                    }
                }
            } else if is_import_element(doc, node) && document_scope {
                if let Err(error) = self.add_import(doc, node) {
                    self.report_error(&error);
                }
            }
        }

        // A new template (or a node inside one) changes what active
        // definitions instantiate.
        if is_template_element(doc, node) && is_definition_element(doc, parent) {
            self.refresh_definition_templates(doc, parent);
        } else {
            self.note_template_mutation(doc, node);
        }

        if let Some(flat_parent) = self.flat_parent(doc, node) {
            self.invalidate_child_nodes(flat_parent);
        }

        self.schedule_content_updates_above(doc, parent);
        if is_content_element(doc, node) {
            if let Some(shadow) = self.enclosing_shadow_tree(doc, node) {
                self.pending.content_updates.push(shadow);
            }
        }

        // Bind the inserted element unless an ancestor already carries a
        // binding; in that case the ancestor's shadow tree governs it and it
        // only binds if selected.
        if is_bindable_element(doc, node) {
            let under_bound = AncestorTraverser::new(doc, node).any(|ancestor| {
                self.records
                    .get(&ancestor)
                    .is_some_and(|record| record.definition_element.is_some())
            });
            if !under_bound {
                self.bind(doc, node);
            }
        }
    }

    fn on_child_removed(&mut self, doc: &mut Document, node: usize, parent: usize) {
        if is_definition_element(doc, node) {
            self.pending.removed_definitions.push(node);
        }
        if is_import_element(doc, node) {
            self.pending.removed_imports.push(node);
        }
        if is_template_element(doc, node) && is_definition_element(doc, parent) {
            self.pending.removed_templates.push((node, parent));
        } else if let Some(name) = self.enclosing_template_name(doc, parent) {
            self.pending.rebinds.push(name);
        }

        let flat_parent = self.flat_parent_of_removed(doc, node, parent);
        self.pending.invalidations.push(flat_parent);

        self.schedule_content_updates_above(doc, parent);
        if is_content_element(doc, node) {
            if let Some(shadow) = self.enclosing_shadow_tree(doc, parent) {
                self.pending.content_updates.push(shadow);
            }
        }
    }

    fn on_attr_modified(
        &mut self,
        doc: &mut Document,
        node: usize,
        name: &QualName,
        new_value: Option<&str>,
    ) {
        let is_selector_attr = (name.ns.is_empty()
            && name.local.as_ref() == XBL_INCLUDES_ATTRIBUTE)
            || (name.ns == *EXT_NAMESPACE
                && name.local.as_ref() == EXT_SELECTOR_LANGUAGE_ATTRIBUTE);
        if is_content_element(doc, node) && is_selector_attr {
            if let Some(shadow) = self.enclosing_shadow_tree(doc, node) {
                if let Some(cm) = self.content_managers.get_mut(&shadow) {
                    cm.invalidate_selector(node);
                }
                self.pending.content_updates.push(shadow);
            }
        }

        if is_definition_element(doc, node) && name.ns.is_empty() {
            if name.local.as_ref() == XBL_ELEMENT_ATTRIBUTE {
                self.rename_definition(doc, node);
            } else if name.local.as_ref() == XBL_REF_ATTRIBUTE {
                self.change_definition_ref(doc, node, new_value);
            }
        }

        if is_import_element(doc, node)
            && name.ns.is_empty()
            && name.local.as_ref() == XBL_BINDINGS_ATTRIBUTE
            && self.imports.contains_key(&node)
        {
            self.remove_import(doc, node);
            if let Err(error) = self.add_import(doc, node) {
                self.report_error(&error);
            }
        }

        self.note_template_mutation(doc, node);

        // Attribute changes anywhere below a bound element can affect its
        // selectors. A change on the bound element itself is outside its own
        // light tree and only concerns enclosing scopes.
        if let Some(parent) = doc.nodes[node].parent {
            self.schedule_content_updates_above(doc, parent);
        }
    }

    /// The `element` attribute of a registered definition changed: every
    /// registration of it re-registers under the new name.
    fn rename_definition(&mut self, doc: &mut Document, definition_element: usize) {
        let registrations: Vec<(DefId, Option<usize>)> = self
            .definitions
            .iter()
            .filter(|(_, record)| record.definition_element == definition_element)
            .filter(|(_, record)| {
                // Definition references bind the name on the referencing
                // element, not on the target.
                !record
                    .import_element
                    .is_some_and(|import| self.imports.get(&import).is_some_and(|r| r.is_ref))
            })
            .map(|(id, record)| (id, record.import_element))
            .collect();
        for (def_id, import) in registrations {
            self.remove_definition(doc, def_id);
            self.register_definition(doc, definition_element, import);
        }

        // If this element is itself a definition reference, its bound name
        // came from this attribute too.
        if self.imports.get(&definition_element).is_some_and(|r| r.is_ref) {
            self.remove_definition_ref(doc, definition_element);
            if let Err(error) = self.add_definition_ref(doc, definition_element) {
                self.report_error(&error);
            }
        }
    }

    /// The `ref` attribute of a definition element changed.
    fn change_definition_ref(&mut self, doc: &mut Document, node: usize, new_value: Option<&str>) {
        if self.imports.get(&node).is_some_and(|record| record.is_ref) {
            self.remove_definition_ref(doc, node);
        } else if new_value.is_some_and(|v| !v.is_empty()) {
            // A plain definition became a reference; its direct registration
            // goes away.
            if let Some(&def_id) = self.definitions_by_key.get(&(node, None)) {
                self.remove_definition(doc, def_id);
            }
        }
        match new_value {
            Some(value) if !value.is_empty() => {
                if let Err(error) = self.add_definition_ref(doc, node) {
                    self.report_error(&error);
                }
            }
            _ => {
                if self.bound_element(doc, node).is_none() && doc.nodes[node].is_in_document() {
                    self.register_definition(doc, node, None);
                }
            }
        }
    }

    /// Recompute the template of every registration of `definition_element`
    /// (first template child wins) and rebind if it changed.
    fn refresh_definition_templates(&mut self, doc: &mut Document, definition_element: usize) {
        let new_template = doc.nodes[definition_element]
            .children
            .iter()
            .copied()
            .find(|child| is_template_element(doc, *child));
        let registrations: Vec<DefId> = self
            .definitions
            .iter()
            .filter(|(_, record)| record.definition_element == definition_element)
            .map(|(id, _)| id)
            .collect();
        for def_id in registrations {
            if self.definitions[def_id].template_element == new_template {
                continue;
            }
            self.definitions[def_id].template_element = new_template;
            let namespace = self.definitions[def_id].namespace.clone();
            let local_name = self.definitions[def_id].local_name.clone();
            if let Some(root) = doc.root_element_id() {
                self.rebind(doc, &namespace, &local_name, root);
            }
        }
    }

    /// If `node` sits inside the template of a registered definition, queue
    /// a rebind of that definition's name.
    fn note_template_mutation(&mut self, doc: &Document, node: usize) {
        if let Some(name) = self.enclosing_template_name(doc, node) {
            self.pending.rebinds.push(name);
        }
    }

    /// Find the registered definition whose template contains `node`
    /// (ancestor-or-self walk) and return its bound name.
    fn enclosing_template_name(
        &self,
        doc: &Document,
        node: usize,
    ) -> Option<(Namespace, LocalName)> {
        let mut id = node;
        loop {
            if is_template_element(doc, id) {
                if let Some(parent) = doc.nodes[id].parent {
                    if is_definition_element(doc, parent) {
                        let registered = self.definitions.iter().find(|(_, record)| {
                            record.definition_element == parent
                                && record.template_element == Some(id)
                        });
                        if let Some((_, record)) = registered {
                            return Some((record.namespace.clone(), record.local_name.clone()));
                        }
                    }
                }
            }
            id = doc.nodes[id].parent?;
        }
    }

    /// Queue a re-selection for every bound element whose light subtree
    /// contains `start` (inclusive).
    fn schedule_content_updates_above(&mut self, doc: &Document, start: usize) {
        let mut current = Some(start);
        while let Some(id) = current {
            if let Some(shadow) = self.records.get(&id).and_then(|record| record.shadow_tree) {
                self.pending.content_updates.push(shadow);
            }
            current = doc.nodes[id].parent;
        }
    }

    /// The shadow tree root whose subtree contains `node`, if any.
    fn enclosing_shadow_tree(&self, doc: &Document, node: usize) -> Option<usize> {
        let bound = self.bound_element(doc, node)?;
        self.shadow_tree_of(bound)
    }

    /// Flat parent of a node that has already been detached from `parent`.
    fn flat_parent_of_removed(&self, doc: &Document, node: usize, parent: usize) -> usize {
        let base_parent = match self.content_element_of(node) {
            Some(content_element) => doc.nodes[content_element].parent.unwrap_or(parent),
            None => parent,
        };
        self.resolve_flat_parent(doc, base_parent).unwrap_or(parent)
    }

    /// Two-phase completion: process batched removals, then invalidations,
    /// then template-driven rebinds, then content re-selection.
    fn flush_pending(&mut self, doc: &mut Document) {
        let pending = std::mem::take(&mut self.pending);

        for def in pending.removed_definitions {
            if self.imports.get(&def).is_some_and(|record| record.is_ref) {
                self.remove_definition_ref(doc, def);
            } else {
                // Drop every registration of this definition element: the
                // direct one and any made on behalf of an import whose
                // target subtree contained it.
                let registrations: Vec<DefId> = self
                    .definitions
                    .iter()
                    .filter(|(_, record)| record.definition_element == def)
                    .map(|(id, _)| id)
                    .collect();
                for def_id in registrations {
                    self.remove_definition(doc, def_id);
                }
            }
        }
        for import in pending.removed_imports {
            if self.imports.get(&import).is_some_and(|record| !record.is_ref) {
                self.remove_import(doc, import);
            }
        }
        for (template, definition_element) in pending.removed_templates {
            let still_registered = self
                .definitions
                .iter()
                .any(|(_, record)| {
                    record.definition_element == definition_element
                        && record.template_element == Some(template)
                });
            if still_registered {
                self.refresh_definition_templates(doc, definition_element);
            }
        }

        for node in pending.invalidations {
            self.invalidate_child_nodes(node);
        }

        let mut rebound: Vec<(Namespace, LocalName)> = Vec::new();
        for name in pending.rebinds {
            if rebound.contains(&name) {
                continue;
            }
            if let Some(root) = doc.root_element_id() {
                self.rebind(doc, &name.0, &name.1, root);
            }
            rebound.push(name);
        }

        let mut updated: Vec<usize> = Vec::new();
        for shadow in pending.content_updates {
            if updated.contains(&shadow) || !self.content_managers.contains_key(&shadow) {
                continue;
            }
            self.update_content_manager(doc, shadow, false);
            updated.push(shadow);
        }
    }

    // Claims

    pub(crate) fn claim_content(&mut self, node: usize, content_element: usize) {
        self.record_mut(node).content_element = Some(content_element);
    }

    pub(crate) fn release_content_claim(&mut self, node: usize) {
        if let Some(record) = self.records.get_mut(&node) {
            record.content_element = None;
        }
    }

    // Dispatch

    pub(crate) fn record_mut(&mut self, node: usize) -> &mut BindingRecord {
        self.records.entry(node).or_default()
    }

    pub(crate) fn report_error(&self, error: &BindingError) {
        #[cfg(feature = "tracing")]
        tracing::warn!("binding error: {error}");
        self.error_sink.report_error(error);
    }

    pub(crate) fn report_listener_error(&self, error: ListenerError) {
        let error: &(dyn std::error::Error + 'static) = &*error;
        self.error_sink.report_error(error);
    }

    fn dispatch_binding_changed(&mut self, element: usize, shadow_tree: Option<usize>) {
        for (_, listener) in self.binding_listeners.iter_mut() {
            if let Err(error) = listener.binding_changed(element, shadow_tree) {
                let error: &(dyn std::error::Error + 'static) = &*error;
                self.error_sink.report_error(error);
            }
        }
    }

    fn fire_shadow_tree_event(&mut self, phase: ShadowTreePhase, element: usize, shadow: usize) {
        let event = ShadowTreeEvent {
            phase,
            bound_element: element,
            shadow_tree: shadow,
        };
        for (_, listener) in self.shadow_tree_listeners.iter_mut() {
            if let Err(error) = listener.shadow_tree_event(event) {
                let error: &(dyn std::error::Error + 'static) = &*error;
                self.error_sink.report_error(error);
            }
        }
    }

    /// Global selection listeners, fired after any per-element ones.
    pub(crate) fn dispatch_content_selection_changed(&mut self, content_element: usize) {
        for (_, listener) in self.selection_listeners.iter_mut() {
            if let Err(error) = listener.content_selection_changed(content_element) {
                let error: &(dyn std::error::Error + 'static) = &*error;
                self.error_sink.report_error(error);
            }
        }
    }

    /// Offer every element in the bound element's flattened subtree to the
    /// scene graph builder.
    fn build_scene_nodes(&mut self, doc: &mut Document, element: usize) {
        if self.scene_builder.is_none() {
            return;
        }
        let mut elements = Vec::new();
        let mut stack = vec![element];
        while let Some(id) = stack.pop() {
            for child in self.flat_child_nodes(doc, id) {
                if doc.nodes[child].is_element() {
                    elements.push(child);
                    stack.push(child);
                }
            }
        }
        if let Some(builder) = self.scene_builder.as_mut() {
            for id in elements {
                builder.build(doc, id);
            }
        }
    }
}
