use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;

use markup5ever::{LocalName, Prefix, QualName, ns};
use umbra_traits::{BindingListener, ContentSelectionChangedListener, ErrorSink, ListenerError};

use crate::binding::BindingManager;
use crate::document::Document;
use crate::node::Attribute;
use crate::scene::SceneGraphBuilder;
use crate::vocab::{EXT_NAMESPACE, XBL_NAMESPACE};

fn name(local: &str) -> QualName {
    QualName::new(None, ns!(), LocalName::from(local))
}

fn svg_name(local: &str) -> QualName {
    QualName::new(None, ns!(svg), LocalName::from(local))
}

fn xbl_name(local: &str) -> QualName {
    QualName::new(None, XBL_NAMESPACE.clone(), LocalName::from(local))
}

fn attr(local: &str, value: &str) -> Attribute {
    Attribute {
        name: name(local),
        value: value.to_string(),
    }
}

fn ext_attr(local: &str, value: &str) -> Attribute {
    Attribute {
        name: QualName::new(None, EXT_NAMESPACE.clone(), LocalName::from(local)),
        value: value.to_string(),
    }
}

fn xmlns_attr(prefix: &str, uri: &str) -> Attribute {
    Attribute {
        name: QualName::new(
            Some(Prefix::from("xmlns")),
            ns!(xmlns),
            LocalName::from(prefix),
        ),
        value: uri.to_string(),
    }
}

fn el(doc: &mut Document, qname: QualName, attrs: Vec<Attribute>, children: &[usize]) -> usize {
    let id = doc.create_element(qname, attrs);
    doc.append(id, children);
    id
}

struct BoxDoc {
    doc: Document,
    svg: usize,
    definition: usize,
    template: usize,
    content_first: usize,
    content_rest: usize,
    bx: usize,
    label: usize,
    note: usize,
}

/// The canonical fixture: a definition for `box` whose template frames a
/// `label`-selecting content element followed by a catch-all one, and a
/// light `<box><label/><note/></box>`.
fn box_doc(first_attrs: Vec<Attribute>, rest_attrs: Vec<Attribute>) -> BoxDoc {
    let mut doc = Document::new();
    let label = doc.create_element(name("label"), vec![]);
    let note = doc.create_element(name("note"), vec![]);
    let bx = el(&mut doc, name("box"), vec![], &[label, note]);
    let content_first = doc.create_element(xbl_name("content"), first_attrs);
    let content_rest = doc.create_element(xbl_name("content"), rest_attrs);
    let frame = el(
        &mut doc,
        svg_name("frame"),
        vec![],
        &[content_first, content_rest],
    );
    let template = el(&mut doc, xbl_name("template"), vec![], &[frame]);
    let definition = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "box")],
        &[template],
    );
    let svg = el(&mut doc, svg_name("svg"), vec![], &[definition, bx]);
    doc.append(0, &[svg]);
    BoxDoc {
        doc,
        svg,
        definition,
        template,
        content_first,
        content_rest,
        bx,
        label,
        note,
    }
}

fn default_box_doc() -> BoxDoc {
    box_doc(vec![attr("includes", "label")], vec![])
}

/// The content element clones inside the attached shadow tree, in document
/// order.
fn shadow_contents(manager: &BindingManager, doc: &Document, bound: usize) -> Vec<usize> {
    let shadow = manager.shadow_tree_of(bound).expect("element is bound");
    manager
        .content_manager_for(doc, shadow)
        .expect("shadow tree has a content manager")
        .content_elements()
        .to_vec()
}

#[derive(Clone, Default)]
struct BindingLog(Rc<RefCell<Vec<(usize, Option<usize>)>>>);

impl BindingListener for BindingLog {
    fn binding_changed(
        &mut self,
        bound_element: usize,
        shadow_tree: Option<usize>,
    ) -> Result<(), ListenerError> {
        self.0.borrow_mut().push((bound_element, shadow_tree));
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SelectionLog(Rc<RefCell<Vec<usize>>>);

impl ContentSelectionChangedListener for SelectionLog {
    fn content_selection_changed(&mut self, content_element: usize) -> Result<(), ListenerError> {
        self.0.borrow_mut().push(content_element);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct ErrorLog(Rc<RefCell<Vec<String>>>);

impl ErrorSink for ErrorLog {
    fn report_error(&self, error: &(dyn Error + 'static)) {
        self.0.borrow_mut().push(error.to_string());
    }
}

#[derive(Clone, Default)]
struct SceneLog(Rc<RefCell<Vec<usize>>>);

impl SceneGraphBuilder for SceneLog {
    fn build(&mut self, _doc: &Document, element_id: usize) -> Option<usize> {
        self.0.borrow_mut().push(element_id);
        Some(element_id)
    }
}

#[test]
fn binds_and_flattens() {
    let mut d = default_box_doc();
    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);

    let shadow = manager.shadow_tree_of(d.bx).expect("box is bound");
    assert_eq!(manager.definition_element_of(d.bx), Some(d.definition));

    let box_children = manager.flat_child_nodes(&d.doc, d.bx);
    assert_eq!(box_children.len(), 1);
    let frame = box_children[0];
    assert_eq!(manager.flat_child_nodes(&d.doc, frame), vec![d.label, d.note]);

    // Projected nodes answer flattened navigation through the shadow tree.
    assert_eq!(manager.flat_parent(&d.doc, d.label), Some(frame));
    assert_eq!(manager.flat_parent(&d.doc, frame), Some(d.bx));
    assert_eq!(manager.bound_element(&d.doc, d.label), Some(d.bx));
    assert_eq!(manager.flat_next_sibling(&d.doc, d.label), Some(d.note));
    assert_eq!(manager.flat_previous_sibling(&d.doc, d.note), Some(d.label));
    assert_eq!(manager.flat_first_child(&d.doc, frame), Some(d.label));
    assert_eq!(manager.flat_last_child(&d.doc, frame), Some(d.note));

    // The scoped view carries the same projected members; it just leaves
    // the sibling links alone.
    assert_eq!(
        manager.scoped_child_nodes(&d.doc, frame),
        vec![d.label, d.note]
    );
    assert_eq!(manager.shadow_tree_of(d.bx), Some(shadow));
}

#[test]
fn projected_light_children_bind_against_their_definitions() {
    let mut doc = Document::new();
    let tag = doc.create_element(svg_name("tag"), vec![]);
    let label_tpl = el(&mut doc, xbl_name("template"), vec![], &[tag]);
    let label_def = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "label")],
        &[label_tpl],
    );

    let content = doc.create_element(xbl_name("content"), vec![attr("includes", "label")]);
    let frame = el(&mut doc, svg_name("frame"), vec![], &[content]);
    let box_tpl = el(&mut doc, xbl_name("template"), vec![], &[frame]);
    let box_def = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "box")],
        &[box_tpl],
    );

    let label = doc.create_element(name("label"), vec![]);
    let bx = el(&mut doc, name("box"), vec![], &[label]);
    let svg = el(&mut doc, svg_name("svg"), vec![], &[label_def, box_def, bx]);
    doc.append(0, &[svg]);

    let mut manager = BindingManager::new();
    manager.start_processing(&mut doc);

    // The label only appears in the flattened tree through box's content
    // element, and still binds against its own definition there.
    assert_eq!(manager.definition_element_of(label), Some(label_def));
    let label_children = manager.flat_child_nodes(&doc, label);
    assert_eq!(label_children.len(), 1);
    assert_eq!(
        doc.nodes[label_children[0]]
            .element_data()
            .unwrap()
            .name
            .local
            .as_ref(),
        "tag"
    );
    assert_eq!(manager.flat_child_nodes(&doc, frame), vec![label]);

    // Registry changes reach it the same way.
    let bindings = BindingLog::default();
    manager.add_binding_listener(Box::new(bindings.clone()));
    doc.mutate().remove_node(label_def);
    manager.flush_mutations(&mut doc);

    assert_eq!(manager.definition_element_of(label), None);
    assert_eq!(manager.shadow_tree_of(label), None);
    assert_eq!(*bindings.0.borrow(), vec![(label, None)]);
}

#[test]
fn earlier_content_element_wins_contested_nodes() {
    let mut d = box_doc(vec![attr("includes", "*")], vec![attr("includes", "*")]);
    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);

    let contents = shadow_contents(&manager, &d.doc, d.bx);
    let cm = manager.content_manager_for(&d.doc, contents[0]).unwrap();
    assert_eq!(cm.selected_content(contents[0]), Some(&[d.label, d.note][..]));
    assert_eq!(cm.selected_content(contents[1]), Some(&[][..]));
}

#[test]
fn unrelated_mutation_leaves_selection_unchanged() {
    let mut d = default_box_doc();
    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);

    let selections = SelectionLog::default();
    manager.add_content_selection_changed_listener(Box::new(selections.clone()));
    let bindings = BindingLog::default();
    manager.add_binding_listener(Box::new(bindings.clone()));

    d.doc.mutate().set_attribute(d.note, name("title"), "hello");
    manager.flush_mutations(&mut d.doc);

    assert!(selections.0.borrow().is_empty());
    assert!(bindings.0.borrow().is_empty());
    let contents = shadow_contents(&manager, &d.doc, d.bx);
    let cm = manager.content_manager_for(&d.doc, contents[0]).unwrap();
    assert_eq!(cm.selected_content(contents[0]), Some(&[d.label][..]));
    assert_eq!(cm.selected_content(contents[1]), Some(&[d.note][..]));
}

#[test]
fn inserting_light_children_reselects_and_binds_them() {
    let mut d = default_box_doc();
    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);

    let bindings = BindingLog::default();
    manager.add_binding_listener(Box::new(bindings.clone()));

    let para = {
        let mut mutator = d.doc.mutate();
        let para = mutator.create_element(name("para"), vec![]);
        mutator.append_children(d.bx, &[para]);
        para
    };
    manager.flush_mutations(&mut d.doc);

    let contents = shadow_contents(&manager, &d.doc, d.bx);
    let cm = manager.content_manager_for(&d.doc, contents[1]).unwrap();
    assert_eq!(cm.selected_content(contents[1]), Some(&[d.note, para][..]));

    let frame = manager.flat_child_nodes(&d.doc, d.bx)[0];
    assert_eq!(
        manager.flat_child_nodes(&d.doc, frame),
        vec![d.label, d.note, para]
    );
    // The newly projected element was bound (it has no definition, so its
    // shadow tree is None).
    assert_eq!(*bindings.0.borrow(), vec![(para, None)]);
}

#[test]
fn removing_selected_children_is_batched() {
    let mut d = default_box_doc();
    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);

    let selections = SelectionLog::default();
    manager.add_content_selection_changed_listener(Box::new(selections.clone()));

    {
        let mut mutator = d.doc.mutate();
        mutator.remove_node(d.label);
        mutator.remove_node(d.note);
    }
    manager.flush_mutations(&mut d.doc);

    let contents = shadow_contents(&manager, &d.doc, d.bx);
    let cm = manager.content_manager_for(&d.doc, contents[0]).unwrap();
    assert_eq!(cm.selected_content(contents[0]), Some(&[][..]));
    assert_eq!(cm.selected_content(contents[1]), Some(&[][..]));
    // Both removals were handled by a single re-selection pass: one change
    // notification per content element.
    assert_eq!(selections.0.borrow().len(), 2);

    let frame = manager.flat_child_nodes(&d.doc, d.bx)[0];
    assert!(manager.flat_child_nodes(&d.doc, frame).is_empty());
}

#[test]
fn document_order_decides_definition_priority() {
    let mut d = default_box_doc();
    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);

    let bindings = BindingLog::default();
    manager.add_binding_listener(Box::new(bindings.clone()));

    // A definition later in the document never steals the binding.
    {
        let mut mutator = d.doc.mutate();
        let late_tpl = mutator.create_element(xbl_name("template"), vec![]);
        let late_leaf = mutator.create_element(svg_name("late"), vec![]);
        mutator.append_children(late_tpl, &[late_leaf]);
        let late_def =
            mutator.create_element(xbl_name("definition"), vec![attr("element", "box")]);
        mutator.append_children(late_def, &[late_tpl]);
        mutator.append_children(d.svg, &[late_def]);
    }
    manager.flush_mutations(&mut d.doc);
    assert!(bindings.0.borrow().is_empty());
    assert_eq!(manager.definition_element_of(d.bx), Some(d.definition));

    // One inserted earlier rebinds the element, exactly once.
    let early_def = {
        let mut mutator = d.doc.mutate();
        let early_tpl = mutator.create_element(xbl_name("template"), vec![]);
        let early_leaf = mutator.create_element(svg_name("early"), vec![]);
        mutator.append_children(early_tpl, &[early_leaf]);
        let early_def =
            mutator.create_element(xbl_name("definition"), vec![attr("element", "box")]);
        mutator.append_children(early_def, &[early_tpl]);
        mutator.insert_nodes_before(d.definition, &[early_def]);
        early_def
    };
    manager.flush_mutations(&mut d.doc);

    assert_eq!(manager.definition_element_of(d.bx), Some(early_def));
    let events = bindings.0.borrow();
    let box_events: Vec<_> = events.iter().filter(|(id, _)| *id == d.bx).collect();
    assert_eq!(box_events.len(), 1);
    assert_eq!(box_events[0].1, manager.shadow_tree_of(d.bx));

    let frame = manager.flat_child_nodes(&d.doc, d.bx)[0];
    let leaf = &d.doc.nodes[frame];
    assert_eq!(
        leaf.element_data().unwrap().name.local.as_ref(),
        "early"
    );
}

#[test]
fn removing_the_active_definition_unbinds() {
    let mut d = default_box_doc();
    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);

    let bindings = BindingLog::default();
    manager.add_binding_listener(Box::new(bindings.clone()));

    d.doc.mutate().remove_node(d.definition);
    manager.flush_mutations(&mut d.doc);

    assert_eq!(manager.shadow_tree_of(d.bx), None);
    assert_eq!(manager.definition_element_of(d.bx), None);
    assert_eq!(*bindings.0.borrow(), vec![(d.bx, None)]);
    // Without a shadow tree the flattened children are the raw children.
    assert_eq!(manager.flat_child_nodes(&d.doc, d.bx), vec![d.label, d.note]);
}

#[test]
fn template_mutation_recreates_the_shadow_tree() {
    let mut d = default_box_doc();
    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);
    let old_shadow = manager.shadow_tree_of(d.bx).unwrap();

    {
        let mut mutator = d.doc.mutate();
        let badge = mutator.create_element(svg_name("badge"), vec![]);
        mutator.append_children(d.template, &[badge]);
    }
    manager.flush_mutations(&mut d.doc);

    let new_shadow = manager.shadow_tree_of(d.bx).unwrap();
    assert_ne!(old_shadow, new_shadow);
    let children = manager.flat_child_nodes(&d.doc, d.bx);
    assert_eq!(children.len(), 2);
    let badge = &d.doc.nodes[children[1]];
    assert_eq!(badge.element_data().unwrap().name.local.as_ref(), "badge");
}

#[test]
fn removing_the_template_falls_back_to_the_next_one() {
    let mut d = default_box_doc();
    // A fallback template holding a single leaf, after the primary one.
    let fallback = {
        let leaf = d.doc.create_element(svg_name("fallback"), vec![]);
        let tpl = el(&mut d.doc, xbl_name("template"), vec![], &[leaf]);
        d.doc.append(d.definition, &[tpl]);
        tpl
    };

    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);
    let frame = manager.flat_child_nodes(&d.doc, d.bx)[0];
    assert_eq!(
        d.doc.nodes[frame].element_data().unwrap().name.local.as_ref(),
        "frame"
    );

    d.doc.mutate().remove_node(d.template);
    manager.flush_mutations(&mut d.doc);

    assert!(manager.shadow_tree_of(d.bx).is_some());
    let children = manager.flat_child_nodes(&d.doc, d.bx);
    assert_eq!(children.len(), 1);
    assert_eq!(
        d.doc.nodes[children[0]]
            .element_data()
            .unwrap()
            .name
            .local
            .as_ref(),
        "fallback"
    );
    let _ = fallback;
}

#[test]
fn renaming_a_definition_moves_the_binding() {
    let mut d = default_box_doc();
    let chest = d.doc.create_element(name("chest"), vec![]);
    d.doc.append(d.svg, &[chest]);

    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);
    assert!(manager.shadow_tree_of(d.bx).is_some());
    assert_eq!(manager.shadow_tree_of(chest), None);

    d.doc
        .mutate()
        .set_attribute(d.definition, name("element"), "chest");
    manager.flush_mutations(&mut d.doc);

    assert_eq!(manager.shadow_tree_of(d.bx), None);
    assert!(manager.shadow_tree_of(chest).is_some());
}

#[test]
fn stop_processing_tears_everything_down() {
    let mut d = default_box_doc();
    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);
    assert!(manager.is_processing());
    assert!(manager.shadow_tree_of(d.bx).is_some());

    manager.stop_processing(&mut d.doc);

    assert!(!manager.is_processing());
    assert_eq!(manager.shadow_tree_of(d.bx), None);
    assert!(manager.content_manager_for(&d.doc, d.label).is_none());
    assert_eq!(manager.flat_child_nodes(&d.doc, d.bx), vec![d.label, d.note]);
}

#[test]
fn imported_definitions_rank_by_import_position() {
    let mut doc = Document::new();
    let bx = doc.create_element(name("box"), vec![]);

    // The import comes first in the document, the competing direct
    // definition second, the imported library last.
    let import = doc.create_element(xbl_name("import"), vec![attr("bindings", "#lib")]);

    let direct_leaf = doc.create_element(svg_name("direct"), vec![]);
    let direct_tpl = el(&mut doc, xbl_name("template"), vec![], &[direct_leaf]);
    let direct_def = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "box")],
        &[direct_tpl],
    );

    let lib_leaf = doc.create_element(svg_name("imported"), vec![]);
    let lib_tpl = el(&mut doc, xbl_name("template"), vec![], &[lib_leaf]);
    let lib_def = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "box")],
        &[lib_tpl],
    );
    let lib = el(&mut doc, xbl_name("xbl"), vec![attr("id", "lib")], &[lib_def]);

    let svg = el(&mut doc, svg_name("svg"), vec![], &[import, direct_def, lib, bx]);
    doc.append(0, &[svg]);

    let mut manager = BindingManager::new();
    manager.start_processing(&mut doc);

    assert_eq!(manager.definition_element_of(bx), Some(lib_def));
    let frame = manager.flat_child_nodes(&doc, bx)[0];
    assert_eq!(
        doc.nodes[frame].element_data().unwrap().name.local.as_ref(),
        "imported"
    );

    // Dropping the import falls back to the direct definition.
    doc.mutate().remove_node(import);
    manager.flush_mutations(&mut doc);
    assert_eq!(manager.definition_element_of(bx), Some(direct_def));
    let frame = manager.flat_child_nodes(&doc, bx)[0];
    assert_eq!(
        doc.nodes[frame].element_data().unwrap().name.local.as_ref(),
        "direct"
    );
}

#[test]
fn definition_changes_inside_an_imported_subtree_propagate() {
    let mut doc = Document::new();
    let bx = doc.create_element(name("box"), vec![]);

    let import = doc.create_element(xbl_name("import"), vec![attr("bindings", "#lib")]);

    let direct_leaf = doc.create_element(svg_name("direct"), vec![]);
    let direct_tpl = el(&mut doc, xbl_name("template"), vec![], &[direct_leaf]);
    let direct_def = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "box")],
        &[direct_tpl],
    );

    let lib_leaf = doc.create_element(svg_name("imported"), vec![]);
    let lib_tpl = el(&mut doc, xbl_name("template"), vec![], &[lib_leaf]);
    let lib_def = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "box")],
        &[lib_tpl],
    );
    let lib = el(&mut doc, xbl_name("xbl"), vec![attr("id", "lib")], &[lib_def]);

    let svg = el(&mut doc, svg_name("svg"), vec![], &[import, direct_def, lib, bx]);
    doc.append(0, &[svg]);

    let mut manager = BindingManager::new();
    manager.start_processing(&mut doc);
    assert_eq!(manager.definition_element_of(bx), Some(lib_def));

    // Removing the definition from the imported group drops the import's
    // registration with it, falling back to the direct definition.
    doc.mutate().remove_node(lib_def);
    manager.flush_mutations(&mut doc);
    assert_eq!(manager.definition_element_of(bx), Some(direct_def));

    // A definition added to the group registers under the import, whose
    // document position puts it back in front.
    let fresh_def = {
        let mut mutator = doc.mutate();
        let leaf = mutator.create_element(svg_name("fresh"), vec![]);
        let tpl = mutator.create_element(xbl_name("template"), vec![]);
        mutator.append_children(tpl, &[leaf]);
        let def = mutator.create_element(xbl_name("definition"), vec![attr("element", "box")]);
        mutator.append_children(def, &[tpl]);
        mutator.append_children(lib, &[def]);
        def
    };
    manager.flush_mutations(&mut doc);

    assert_eq!(manager.definition_element_of(bx), Some(fresh_def));
    let frame = manager.flat_child_nodes(&doc, bx)[0];
    assert_eq!(
        doc.nodes[frame].element_data().unwrap().name.local.as_ref(),
        "fresh"
    );
}

#[test]
fn definition_references_bind_the_referencing_name() {
    let mut doc = Document::new();
    let bx = doc.create_element(name("box"), vec![]);

    let referencing = doc.create_element(
        xbl_name("definition"),
        vec![attr("element", "box"), attr("ref", "#real")],
    );

    let leaf = doc.create_element(svg_name("real"), vec![]);
    let tpl = el(&mut doc, xbl_name("template"), vec![], &[leaf]);
    let real = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "widget"), attr("id", "real")],
        &[tpl],
    );

    let svg = el(&mut doc, svg_name("svg"), vec![], &[referencing, real, bx]);
    doc.append(0, &[svg]);

    let mut manager = BindingManager::new();
    manager.start_processing(&mut doc);

    // The referencing element's position governs, and the target's template
    // is instantiated.
    assert_eq!(manager.definition_element_of(bx), Some(real));
    let frame = manager.flat_child_nodes(&doc, bx)[0];
    assert_eq!(
        doc.nodes[frame].element_data().unwrap().name.local.as_ref(),
        "real"
    );
}

#[test]
fn invalid_selector_expression_selects_nothing() {
    let errors = ErrorLog::default();
    let mut d = box_doc(vec![attr("includes", "para[")], vec![]);
    let mut manager = BindingManager::new();
    manager.set_error_sink(Box::new(errors.clone()));
    manager.start_processing(&mut d.doc);

    let contents = shadow_contents(&manager, &d.doc, d.bx);
    let cm = manager.content_manager_for(&d.doc, contents[0]).unwrap();
    assert_eq!(cm.selected_content(contents[0]), Some(&[][..]));
    // The catch-all still projects everything.
    assert_eq!(cm.selected_content(contents[1]), Some(&[d.label, d.note][..]));
    assert!(errors.0.borrow().iter().any(|e| e.contains("para[")));
}

#[test]
fn unknown_selector_language_is_reported() {
    let errors = ErrorLog::default();
    let mut d = box_doc(
        vec![
            attr("includes", "label"),
            ext_attr("selectorLanguage", "no-such-language"),
        ],
        vec![],
    );
    let mut manager = BindingManager::new();
    manager.set_error_sink(Box::new(errors.clone()));
    manager.start_processing(&mut d.doc);

    let contents = shadow_contents(&manager, &d.doc, d.bx);
    let cm = manager.content_manager_for(&d.doc, contents[0]).unwrap();
    assert_eq!(cm.selected_content(contents[0]), Some(&[][..]));
    assert!(errors
        .0
        .borrow()
        .iter()
        .any(|e| e.contains("no-such-language")));
}

#[test]
fn subset_selector_matches_indexed_and_prefixed_names() {
    let mut doc = Document::new();
    let para1 = doc.create_element(name("para"), vec![]);
    let para2 = doc.create_element(name("para"), vec![]);
    let heading = doc.create_element(name("heading"), vec![attr("id", "lead")]);
    let item = doc.create_element(
        QualName::new(None, "http://example.com/ui".into(), LocalName::from("item")),
        vec![],
    );
    let bx = el(&mut doc, name("box"), vec![], &[para1, heading, para2, item]);

    let by_index = doc.create_element(xbl_name("content"), vec![attr("includes", "para[2]")]);
    let by_id = doc.create_element(xbl_name("content"), vec![attr("includes", "id('lead')")]);
    let by_prefix = doc.create_element(
        xbl_name("content"),
        vec![attr("includes", "u:item"), xmlns_attr("u", "http://example.com/ui")],
    );
    let frame = el(
        &mut doc,
        svg_name("frame"),
        vec![],
        &[by_index, by_id, by_prefix],
    );
    let template = el(&mut doc, xbl_name("template"), vec![], &[frame]);
    let definition = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "box")],
        &[template],
    );
    let svg = el(&mut doc, svg_name("svg"), vec![], &[definition, bx]);
    doc.append(0, &[svg]);

    let mut manager = BindingManager::new();
    manager.start_processing(&mut doc);

    let contents = shadow_contents(&manager, &doc, bx);
    let cm = manager.content_manager_for(&doc, contents[0]).unwrap();
    assert_eq!(cm.selected_content(contents[0]), Some(&[para2][..]));
    assert_eq!(cm.selected_content(contents[1]), Some(&[heading][..]));
    assert_eq!(cm.selected_content(contents[2]), Some(&[item][..]));
}

#[test]
fn pattern_selector_claims_whole_subtrees() {
    let mut doc = Document::new();
    let inner_item = doc.create_element(name("item"), vec![]);
    let outer_item = el(&mut doc, name("item"), vec![], &[inner_item]);
    let wrap = el(&mut doc, name("wrap"), vec![], &[outer_item]);
    let bx = el(&mut doc, name("box"), vec![], &[wrap]);

    let content = doc.create_element(
        xbl_name("content"),
        vec![
            attr("includes", "//item"),
            ext_attr("selectorLanguage", "xpath-pattern"),
        ],
    );
    let frame = el(&mut doc, svg_name("frame"), vec![], &[content]);
    let template = el(&mut doc, xbl_name("template"), vec![], &[frame]);
    let definition = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "box")],
        &[template],
    );
    let svg = el(&mut doc, svg_name("svg"), vec![], &[definition, bx]);
    doc.append(0, &[svg]);

    let mut manager = BindingManager::new();
    manager.start_processing(&mut doc);

    // The outer match claims its subtree; the nested item is not selected
    // separately.
    let contents = shadow_contents(&manager, &doc, bx);
    let cm = manager.content_manager_for(&doc, contents[0]).unwrap();
    assert_eq!(cm.selected_content(contents[0]), Some(&[outer_item][..]));
}

#[test]
fn pattern_attribute_predicate_reacts_to_mutations() {
    let mut d = box_doc(
        vec![
            attr("includes", "*[@pick]"),
            ext_attr("selectorLanguage", "xpath-pattern"),
        ],
        vec![],
    );
    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);

    let contents = shadow_contents(&manager, &d.doc, d.bx);
    let cm = manager.content_manager_for(&d.doc, contents[0]).unwrap();
    assert_eq!(cm.selected_content(contents[0]), Some(&[][..]));

    d.doc.mutate().set_attribute(d.note, name("pick"), "yes");
    manager.flush_mutations(&mut d.doc);

    let cm = manager.content_manager_for(&d.doc, contents[0]).unwrap();
    assert_eq!(cm.selected_content(contents[0]), Some(&[d.note][..]));

    d.doc.mutate().clear_attribute(d.note, name("pick"));
    manager.flush_mutations(&mut d.doc);

    let cm = manager.content_manager_for(&d.doc, contents[0]).unwrap();
    assert_eq!(cm.selected_content(contents[0]), Some(&[][..]));
}

#[test]
fn document_element_sets_the_default_selector_language() {
    let mut doc = Document::new();
    let item = doc.create_element(name("item"), vec![]);
    let wrap = el(&mut doc, name("wrap"), vec![], &[item]);
    let bx = el(&mut doc, name("box"), vec![], &[wrap]);

    // No per-element language: the document element's takes effect, so the
    // expression is a pattern and matches the nested item.
    let content = doc.create_element(xbl_name("content"), vec![attr("includes", "//item")]);
    let frame = el(&mut doc, svg_name("frame"), vec![], &[content]);
    let template = el(&mut doc, xbl_name("template"), vec![], &[frame]);
    let definition = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "box")],
        &[template],
    );
    let svg = el(
        &mut doc,
        svg_name("svg"),
        vec![ext_attr("selectorLanguage", "xpath-pattern")],
        &[definition, bx],
    );
    doc.append(0, &[svg]);

    let mut manager = BindingManager::new();
    manager.start_processing(&mut doc);

    let contents = shadow_contents(&manager, &doc, bx);
    let cm = manager.content_manager_for(&doc, contents[0]).unwrap();
    assert_eq!(cm.selected_content(contents[0]), Some(&[item][..]));
}

#[test]
fn selector_attribute_change_rebuilds_the_selector() {
    let mut d = default_box_doc();
    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);

    let contents = shadow_contents(&manager, &d.doc, d.bx);
    let first = contents[0];

    d.doc
        .mutate()
        .set_attribute(first, name("includes"), "note");
    manager.flush_mutations(&mut d.doc);

    let cm = manager.content_manager_for(&d.doc, first).unwrap();
    assert_eq!(cm.selected_content(first), Some(&[d.note][..]));
    assert_eq!(cm.selected_content(contents[1]), Some(&[d.label][..]));
}

#[test]
fn per_element_selection_listeners_fire_before_global_ones() {
    let mut d = default_box_doc();
    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);

    let order: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    struct Tagged {
        tag: &'static str,
        order: Rc<RefCell<Vec<&'static str>>>,
    }
    impl ContentSelectionChangedListener for Tagged {
        fn content_selection_changed(&mut self, _: usize) -> Result<(), ListenerError> {
            self.order.borrow_mut().push(self.tag);
            Ok(())
        }
    }

    let contents = shadow_contents(&manager, &d.doc, d.bx);
    let rest = contents[1];
    manager
        .content_manager_for_mut(&d.doc, rest)
        .unwrap()
        .add_content_selection_changed_listener(
            rest,
            Box::new(Tagged {
                tag: "element",
                order: order.clone(),
            }),
        );
    manager.add_content_selection_changed_listener(Box::new(Tagged {
        tag: "global",
        order: order.clone(),
    }));

    let para = {
        let mut mutator = d.doc.mutate();
        let para = mutator.create_element(name("para"), vec![]);
        mutator.append_children(d.bx, &[para]);
        para
    };
    manager.flush_mutations(&mut d.doc);

    assert_eq!(*order.borrow(), vec!["element", "global"]);
    let _ = para;
}

#[test]
fn failing_listeners_are_reported_and_skipped() {
    let errors = ErrorLog::default();
    let mut d = default_box_doc();
    let mut manager = BindingManager::new();
    manager.set_error_sink(Box::new(errors.clone()));

    struct Failing;
    impl BindingListener for Failing {
        fn binding_changed(&mut self, _: usize, _: Option<usize>) -> Result<(), ListenerError> {
            Err("listener exploded".into())
        }
    }
    let bindings = BindingLog::default();
    manager.add_binding_listener(Box::new(Failing));
    manager.add_binding_listener(Box::new(bindings.clone()));

    manager.start_processing(&mut d.doc);

    // The failure was swallowed, reported, and later listeners still ran.
    assert!(errors.0.borrow().iter().any(|e| e.contains("exploded")));
    assert!(bindings.0.borrow().iter().any(|(id, _)| *id == d.bx));
    assert!(manager.shadow_tree_of(d.bx).is_some());
}

#[test]
fn scene_graph_builder_sees_the_flattened_subtree() {
    let scene = SceneLog::default();
    let mut d = default_box_doc();
    let mut manager = BindingManager::new();
    manager.set_scene_graph_builder(Box::new(scene.clone()));
    manager.start_processing(&mut d.doc);

    let frame = manager.flat_child_nodes(&d.doc, d.bx)[0];
    assert_eq!(*scene.0.borrow(), vec![frame, d.label, d.note]);
}

#[test]
fn bubble_limit_is_one_without_divergence() {
    let mut d = default_box_doc();
    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);

    let frame = manager.flat_child_nodes(&d.doc, d.bx)[0];
    assert_eq!(manager.compute_bubble_limit(&d.doc, frame, d.label), 1);
    assert_eq!(manager.compute_bubble_limit(&d.doc, d.label, d.svg), 1);
}

#[test]
fn bubble_limit_stops_at_the_enclosing_bound_element() {
    let mut d = box_doc(vec![attr("includes", "label")], vec![]);
    // Give the shadow tree a second child next to the frame.
    let aside = {
        let aside = d.doc.create_element(svg_name("aside"), vec![]);
        d.doc.append(d.template, &[aside]);
        aside
    };
    let _ = aside;

    let mut manager = BindingManager::new();
    manager.start_processing(&mut d.doc);

    let shadow_children = manager.flat_child_nodes(&d.doc, d.bx);
    assert_eq!(shadow_children.len(), 2);
    let aside_clone = shadow_children[1];

    // label's flattened chain is [label, frame, box, svg, document]; the
    // divergence against aside retreats to box, two hops up from label.
    assert_eq!(
        manager.compute_bubble_limit(&d.doc, d.label, aside_clone),
        2
    );
}

#[test]
fn bubble_limit_between_sibling_shadow_scopes() {
    let mut doc = Document::new();
    let box1 = doc.create_element(name("box"), vec![]);
    let box2 = doc.create_element(name("box"), vec![]);
    let leaf = doc.create_element(svg_name("leaf"), vec![]);
    let template = el(&mut doc, xbl_name("template"), vec![], &[leaf]);
    let definition = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "box")],
        &[template],
    );
    let svg = el(&mut doc, svg_name("svg"), vec![], &[definition, box1, box2]);
    doc.append(0, &[svg]);

    let mut manager = BindingManager::new();
    manager.start_processing(&mut doc);

    let shadow1 = manager.shadow_tree_of(box1).unwrap();
    let shadow2 = manager.shadow_tree_of(box2).unwrap();
    // Chains diverge at the two bound elements, below the shared svg root.
    assert_eq!(manager.compute_bubble_limit(&doc, shadow1, shadow2), 3);
}

#[test]
fn bubble_limit_retreats_through_nested_shadow_scopes() {
    let mut doc = Document::new();
    // Three definitions nest: a's template holds a bindable <b>, b's holds
    // a bindable <c> next to an svg mark, c's holds a leaf.
    let leaf = doc.create_element(svg_name("leaf"), vec![]);
    let c_tpl = el(&mut doc, xbl_name("template"), vec![], &[leaf]);
    let c_def = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "c")],
        &[c_tpl],
    );

    let c_light = doc.create_element(name("c"), vec![]);
    let mark = doc.create_element(svg_name("mark"), vec![]);
    let b_tpl = el(&mut doc, xbl_name("template"), vec![], &[c_light, mark]);
    let b_def = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "b")],
        &[b_tpl],
    );

    let b_light = doc.create_element(name("b"), vec![]);
    let a_tpl = el(&mut doc, xbl_name("template"), vec![], &[b_light]);
    let a_def = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "a")],
        &[a_tpl],
    );

    let a = doc.create_element(name("a"), vec![]);
    let outside = doc.create_element(svg_name("outside"), vec![]);
    let svg = el(
        &mut doc,
        svg_name("svg"),
        vec![],
        &[c_def, b_def, a_def, a, outside],
    );
    doc.append(0, &[svg]);

    let mut manager = BindingManager::new();
    manager.start_processing(&mut doc);

    let b_clone = manager.flat_child_nodes(&doc, a)[0];
    let b_children = manager.flat_child_nodes(&doc, b_clone);
    assert_eq!(b_children.len(), 2);
    let (c_clone, mark_clone) = (b_children[0], b_children[1]);
    let leaf_clone = manager.flat_child_nodes(&doc, c_clone)[0];
    assert_eq!(manager.bound_element(&doc, leaf_clone), Some(c_clone));

    // leaf's chain is [leaf, c, b, a, svg, document]; against the mark it
    // diverges at c, whose enclosing bound element b is two hops up.
    assert_eq!(
        manager.compute_bubble_limit(&doc, leaf_clone, mark_clone),
        2
    );
    // From the mark the diverging node is the mark itself, one hop below b.
    assert_eq!(
        manager.compute_bubble_limit(&doc, mark_clone, leaf_clone),
        1
    );
    // Against a node outside every scope the divergence is at a, which has
    // no enclosing bound element, so the whole chain stays reachable.
    assert_eq!(manager.compute_bubble_limit(&doc, leaf_clone, outside), 5);
}

#[test]
fn nested_bindings_flatten_recursively() {
    let mut doc = Document::new();
    // gadget's definition nests a bindable <widget> inside its template.
    let widget_leaf = doc.create_element(svg_name("deep"), vec![]);
    let widget_tpl = el(&mut doc, xbl_name("template"), vec![], &[widget_leaf]);
    let widget_def = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "widget")],
        &[widget_tpl],
    );

    let widget = doc.create_element(name("widget"), vec![]);
    let gadget_tpl = el(&mut doc, xbl_name("template"), vec![], &[widget]);
    let gadget_def = el(
        &mut doc,
        xbl_name("definition"),
        vec![attr("element", "gadget")],
        &[gadget_tpl],
    );

    let gadget = doc.create_element(name("gadget"), vec![]);
    let svg = el(
        &mut doc,
        svg_name("svg"),
        vec![],
        &[widget_def, gadget_def, gadget],
    );
    doc.append(0, &[svg]);

    let mut manager = BindingManager::new();
    manager.start_processing(&mut doc);

    // The widget clone inside gadget's shadow tree is itself bound.
    let gadget_children = manager.flat_child_nodes(&doc, gadget);
    assert_eq!(gadget_children.len(), 1);
    let widget_clone = gadget_children[0];
    assert!(manager.shadow_tree_of(widget_clone).is_some());
    let widget_children = manager.flat_child_nodes(&doc, widget_clone);
    assert_eq!(widget_children.len(), 1);
    assert_eq!(
        doc.nodes[widget_children[0]]
            .element_data()
            .unwrap()
            .name
            .local
            .as_ref(),
        "deep"
    );
    assert_eq!(manager.bound_element(&doc, widget_children[0]), Some(widget_clone));
}
