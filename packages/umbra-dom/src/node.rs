use bitflags::bitflags;
use markup5ever::{LocalName, QualName, local_name};

/// An arena-allocated document node.
///
/// Nodes are owned by a [`Document`](crate::Document)'s slab and refer to each
/// other by slab index. A node detached from its parent keeps its id and its
/// subtree until it is explicitly dropped, which is what lets the binding
/// engine inspect removed content after the fact.
#[derive(Debug, Clone)]
pub struct Node {
    /// Our id within the document's slab.
    pub id: usize,
    /// Parent node id, or `None` for the document node and detached subtree
    /// roots.
    pub parent: Option<usize>,
    /// Child node ids in tree order.
    pub children: Vec<usize>,
    pub flags: NodeFlags,
    /// Kind-specific data.
    pub data: NodeData,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Whether the node is connected to the document node.
        const IS_IN_DOCUMENT = 0b0000_0001;
    }
}

/// The different kinds of nodes in the DOM.
#[derive(Debug, Clone)]
pub enum NodeData {
    /// The document node itself, always id 0.
    Document,
    /// An element node.
    Element(ElementData),
    /// A text node.
    Text(TextNodeData),
    /// A comment.
    Comment,
}

#[derive(Debug, Clone)]
pub struct ElementData {
    /// The elements name (tag and namespace).
    pub name: QualName,
    /// The element's attributes.
    pub attrs: Vec<Attribute>,
    /// The element's `id` attribute, if it has one.
    pub id: Option<String>,
}

/// A single attribute: a qualified name and a string value.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: QualName,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct TextNodeData {
    pub content: String,
}

impl ElementData {
    pub fn new(name: QualName, attrs: Vec<Attribute>) -> Self {
        let id = attrs
            .iter()
            .find(|attr| {
                attr.name.local == local_name!("id") && attr.name.ns.is_empty()
            })
            .map(|attr| attr.value.clone());
        ElementData { name, attrs, id }
    }

    /// Look up an attribute by qualified name.
    pub fn attr(&self, name: &QualName) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name.ns == name.ns && attr.name.local == name.local)
            .map(|attr| attr.value.as_str())
    }

    /// Look up a no-namespace attribute by local name.
    pub fn attr_local(&self, local: &LocalName) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name.ns.is_empty() && attr.name.local == *local)
            .map(|attr| attr.value.as_str())
    }
}

impl Node {
    pub(crate) fn new(id: usize, data: NodeData) -> Self {
        Node {
            id,
            parent: None,
            children: Vec::new(),
            flags: NodeFlags::empty(),
            data,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.data, NodeData::Element(_))
    }

    pub fn is_text_node(&self) -> bool {
        matches!(self.data, NodeData::Text(_))
    }

    pub fn is_in_document(&self) -> bool {
        self.flags.contains(NodeFlags::IS_IN_DOCUMENT)
    }

    pub fn element_data(&self) -> Option<&ElementData> {
        match self.data {
            NodeData::Element(ref data) => Some(data),
            _ => None,
        }
    }

    pub fn element_data_mut(&mut self) -> Option<&mut ElementData> {
        match self.data {
            NodeData::Element(ref mut data) => Some(data),
            _ => None,
        }
    }

    pub fn text_data(&self) -> Option<&TextNodeData> {
        match self.data {
            NodeData::Text(ref data) => Some(data),
            _ => None,
        }
    }

    pub fn text_data_mut(&mut self) -> Option<&mut TextNodeData> {
        match self.data {
            NodeData::Text(ref mut data) => Some(data),
            _ => None,
        }
    }

    /// The index of `child` within our child list, if it is one of ours.
    pub fn index_of_child(&self, child: usize) -> Option<usize> {
        self.children.iter().position(|id| *id == child)
    }
}
