//! Names of the binding vocabulary.
//!
//! Binding markup lives in its own namespace alongside the host document's
//! rendering namespace. Elements in the binding namespace structure the
//! bindings themselves (`definition`, `template`, `content`, `import`,
//! `shadowTree`) and are never bindable; elements in the rendering namespace
//! are traversed but not bindable either. Everything else is a candidate for
//! binding.

use std::sync::LazyLock;

use markup5ever::{LocalName, Namespace, ns};

use crate::document::Document;

/// The namespace of the binding vocabulary.
pub static XBL_NAMESPACE: LazyLock<Namespace> =
    LazyLock::new(|| Namespace::from("http://www.w3.org/2004/xbl"));

/// The namespace of engine extension attributes such as `selectorLanguage`.
pub static EXT_NAMESPACE: LazyLock<Namespace> =
    LazyLock::new(|| Namespace::from("http://umbra.invalid/ext"));

pub const XBL_XBL_TAG: &str = "xbl";
pub const XBL_DEFINITION_TAG: &str = "definition";
pub const XBL_TEMPLATE_TAG: &str = "template";
pub const XBL_CONTENT_TAG: &str = "content";
pub const XBL_IMPORT_TAG: &str = "import";
pub const XBL_SHADOW_TREE_TAG: &str = "shadowTree";

pub const XBL_ELEMENT_ATTRIBUTE: &str = "element";
pub const XBL_REF_ATTRIBUTE: &str = "ref";
pub const XBL_BINDINGS_ATTRIBUTE: &str = "bindings";
pub const XBL_INCLUDES_ATTRIBUTE: &str = "includes";
pub const EXT_SELECTOR_LANGUAGE_ATTRIBUTE: &str = "selectorLanguage";

/// The selector language identifier for the restricted child-axis grammar.
pub const SELECTOR_LANGUAGE_SUBSET: &str = "xpath-subset";
/// The selector language identifier for full pattern expressions.
pub const SELECTOR_LANGUAGE_PATTERN: &str = "xpath-pattern";

fn is_xbl_tag(doc: &Document, node_id: usize, tag: &str) -> bool {
    doc.nodes[node_id]
        .element_data()
        .is_some_and(|el| el.name.ns == *XBL_NAMESPACE && el.name.local.as_ref() == tag)
}

pub fn is_xbl_root_element(doc: &Document, node_id: usize) -> bool {
    is_xbl_tag(doc, node_id, XBL_XBL_TAG)
}

pub fn is_definition_element(doc: &Document, node_id: usize) -> bool {
    is_xbl_tag(doc, node_id, XBL_DEFINITION_TAG)
}

pub fn is_template_element(doc: &Document, node_id: usize) -> bool {
    is_xbl_tag(doc, node_id, XBL_TEMPLATE_TAG)
}

pub fn is_content_element(doc: &Document, node_id: usize) -> bool {
    is_xbl_tag(doc, node_id, XBL_CONTENT_TAG)
}

pub fn is_import_element(doc: &Document, node_id: usize) -> bool {
    is_xbl_tag(doc, node_id, XBL_IMPORT_TAG)
}

pub fn is_shadow_tree_element(doc: &Document, node_id: usize) -> bool {
    is_xbl_tag(doc, node_id, XBL_SHADOW_TREE_TAG)
}

/// Whether the element can carry a binding. Binding-vocabulary elements and
/// elements in the host rendering namespace are not bindable; the engine
/// recurses through them instead.
pub fn is_bindable_element(doc: &Document, node_id: usize) -> bool {
    doc.nodes[node_id]
        .element_data()
        .is_some_and(|el| el.name.ns != *XBL_NAMESPACE && el.name.ns != ns!(svg))
}

/// Read a no-namespace attribute off an element, `None` if absent or empty.
pub fn non_empty_attr<'doc>(
    doc: &'doc Document,
    node_id: usize,
    local: &str,
) -> Option<&'doc str> {
    doc.nodes[node_id]
        .element_data()?
        .attrs
        .iter()
        .find(|attr| attr.name.ns.is_empty() && attr.name.local.as_ref() == local)
        .map(|attr| attr.value.as_str())
        .filter(|value| !value.is_empty())
}

/// Read an extension attribute (in [`EXT_NAMESPACE`]) off an element.
pub fn ext_attr<'doc>(doc: &'doc Document, node_id: usize, local: &str) -> Option<&'doc str> {
    doc.nodes[node_id]
        .element_data()?
        .attrs
        .iter()
        .find(|attr| attr.name.ns == *EXT_NAMESPACE && attr.name.local.as_ref() == local)
        .map(|attr| attr.value.as_str())
}

/// Parse a definition's `element` attribute into an expanded name, resolving
/// any prefix against the namespace declarations in scope on `node_id`. An
/// unprefixed name resolves to the null namespace.
pub fn parse_bound_element_name(
    doc: &Document,
    node_id: usize,
) -> Option<(Namespace, LocalName)> {
    let raw = non_empty_attr(doc, node_id, XBL_ELEMENT_ATTRIBUTE)?;
    match raw.split_once(':') {
        Some((prefix, local)) => {
            let ns = doc.lookup_namespace_uri(node_id, Some(prefix))?;
            Some((ns, LocalName::from(local)))
        }
        None => Some((ns!(), LocalName::from(raw))),
    }
}

#[cfg(test)]
mod tests {
    use markup5ever::{Prefix, QualName};

    use super::*;
    use crate::node::Attribute;

    fn definition(attrs: Vec<Attribute>) -> (Document, usize) {
        let mut doc = Document::new();
        let def = doc.create_element(
            QualName::new(None, XBL_NAMESPACE.clone(), LocalName::from(XBL_DEFINITION_TAG)),
            attrs,
        );
        doc.append(0, &[def]);
        (doc, def)
    }

    fn attr(name: QualName, value: &str) -> Attribute {
        Attribute {
            name,
            value: value.to_string(),
        }
    }

    #[test]
    fn unprefixed_bound_name_is_null_namespace() {
        let (doc, def) = definition(vec![attr(
            QualName::new(None, ns!(), LocalName::from("element")),
            "box",
        )]);
        assert_eq!(
            parse_bound_element_name(&doc, def),
            Some((ns!(), LocalName::from("box")))
        );
    }

    #[test]
    fn prefixed_bound_name_resolves_in_scope() {
        let (doc, def) = definition(vec![
            attr(
                QualName::new(None, ns!(), LocalName::from("element")),
                "u:box",
            ),
            attr(
                QualName::new(Some(Prefix::from("xmlns")), ns!(xmlns), LocalName::from("u")),
                "http://example.com/u",
            ),
        ]);
        assert_eq!(
            parse_bound_element_name(&doc, def),
            Some((Namespace::from("http://example.com/u"), LocalName::from("box")))
        );
    }

    #[test]
    fn undeclared_prefix_and_empty_attribute_parse_to_nothing() {
        let (doc, def) = definition(vec![attr(
            QualName::new(None, ns!(), LocalName::from("element")),
            "v:box",
        )]);
        assert_eq!(parse_bound_element_name(&doc, def), None);

        let (doc, def) = definition(vec![attr(
            QualName::new(None, ns!(), LocalName::from("element")),
            "",
        )]);
        assert_eq!(parse_bound_element_name(&doc, def), None);
    }

    #[test]
    fn bindable_excludes_binding_and_rendering_namespaces() {
        let mut doc = Document::new();
        let plain = doc.create_element(
            QualName::new(None, ns!(), LocalName::from("box")),
            vec![],
        );
        let svg = doc.create_element(
            QualName::new(None, ns!(svg), LocalName::from("rect")),
            vec![],
        );
        let xbl = doc.create_element(
            QualName::new(None, XBL_NAMESPACE.clone(), LocalName::from("content")),
            vec![],
        );
        let text = doc.create_text_node("t");
        assert!(is_bindable_element(&doc, plain));
        assert!(!is_bindable_element(&doc, svg));
        assert!(!is_bindable_element(&doc, xbl));
        assert!(!is_bindable_element(&doc, text));
    }
}
