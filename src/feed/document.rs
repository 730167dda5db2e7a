//! Generic XML document tree.
//!
//! Feeds are parsed into a small arena of nodes rather than into typed RSS or
//! Atom structs: the flattener serializes whatever elements a feed carries,
//! including extensions no typed model knows about. Nodes refer to their
//! parent and children by index, so the tree has a single owner (the
//! [`Document`]) and is dropped as a whole after one poll of one feed.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// SEC-003: Maximum element nesting depth accepted from a feed.
/// Guards the recursive flattener against maliciously deep documents.
pub const MAX_DEPTH: usize = 256;

/// Index of a node inside its [`Document`].
pub type NodeId = usize;

/// Errors produced while building a [`Document`].
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The bytes are not well-formed XML.
    #[error("XML parse error at byte {position}: {message}")]
    Xml { position: u64, message: String },

    /// SEC-003: Nesting depth exceeds the safety limit.
    #[error("Document nesting exceeds maximum of {0} levels")]
    TooDeep(usize),

    #[error("Document has no root element")]
    NoRoot,

    #[error("Document ended with {0} unclosed element(s)")]
    Unclosed(usize),

    #[error("Unexpected element after the root element")]
    TrailingContent,
}

/// What a node holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    /// Character data (text or CDATA), entity references already resolved.
    Text(String),
}

/// A single element or text node.
#[derive(Debug, Clone)]
pub struct Node {
    /// Local name without prefix. Text nodes are named `text`.
    pub name: String,
    /// Namespace prefix as written in the document (`media` for `media:content`).
    pub prefix: Option<String>,
    pub kind: NodeKind,
    /// Attributes in document order, keyed by their qualified name.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
}

impl Node {
    pub fn is_text(&self) -> bool {
        matches!(self.kind, NodeKind::Text(_))
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element)
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Text(t) => Some(t),
            NodeKind::Element => None,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Which syndication format a document is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
    /// Root element name that matched neither format.
    Unknown(String),
}

/// An owned, parsed XML document.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Document {
    /// Parses raw feed bytes into a tree.
    ///
    /// Whitespace text between elements is kept as text nodes so that the
    /// tree mirrors the document; the flattener drops blank text.
    ///
    /// # Security
    ///
    /// Entity expansion is limited to the five XML builtins (see SEC-002 on
    /// the pinned `quick-xml` version). Text containing unknown entities is
    /// kept verbatim instead of failing the whole feed.
    pub fn parse(bytes: &[u8]) -> Result<Self, DocumentError> {
        let mut reader = Reader::from_reader(bytes);
        let mut buf = Vec::new();
        let mut nodes: Vec<Node> = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut root = None;

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| DocumentError::Xml {
                position: reader.error_position() as u64,
                message: e.to_string(),
            })?;

            match event {
                Event::Start(e) => {
                    if stack.len() >= MAX_DEPTH {
                        return Err(DocumentError::TooDeep(MAX_DEPTH));
                    }
                    let id = push_element(&mut nodes, &mut root, &stack, &e, &reader)?;
                    stack.push(id);
                }
                Event::Empty(e) => {
                    push_element(&mut nodes, &mut root, &stack, &e, &reader)?;
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(e) => {
                    let text = match e.unescape() {
                        Ok(t) => t.into_owned(),
                        Err(_) => String::from_utf8_lossy(&e).into_owned(),
                    };
                    push_text(&mut nodes, &stack, text);
                }
                Event::CData(e) => {
                    let text = String::from_utf8_lossy(&e).into_owned();
                    push_text(&mut nodes, &stack, text);
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions, DOCTYPE
                _ => {}
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(DocumentError::Unclosed(stack.len()));
        }
        let root = root.ok_or(DocumentError::NoRoot)?;
        Ok(Self { nodes, root })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    /// Element children of `id`, skipping text nodes.
    pub fn element_children(&self, id: NodeId) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(|&c| self.nodes[c].is_element())
    }

    /// First element child of `id` with the given local name.
    pub fn find_child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.element_children(id).find(|&c| self.nodes[c].name == name)
    }

    /// Concatenated text of `id` when all of its children are text nodes.
    ///
    /// Returns `None` for text nodes, childless elements and elements with
    /// element children.
    pub fn text_content(&self, id: NodeId) -> Option<String> {
        let node = &self.nodes[id];
        if !node.is_element() || node.children.is_empty() {
            return None;
        }
        let mut out = String::new();
        for &child in &node.children {
            out.push_str(self.nodes[child].text()?);
        }
        Some(out)
    }

    /// Classifies the document by its root element.
    pub fn classify(&self) -> FeedKind {
        let root = &self.nodes[self.root];
        match root.name.as_str() {
            "rss" => FeedKind::Rss,
            "feed" => FeedKind::Atom,
            other => FeedKind::Unknown(other.to_string()),
        }
    }
}

fn push_element(
    nodes: &mut Vec<Node>,
    root: &mut Option<NodeId>,
    stack: &[NodeId],
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<NodeId, DocumentError> {
    let qname = e.name();
    let name = String::from_utf8_lossy(qname.local_name().as_ref()).into_owned();
    let prefix = qname
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());

    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(e) => {
                tracing::debug!(element = %name, error = %e, "Skipping malformed attribute");
                continue;
            }
        };
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        attributes.push((key, value));
    }

    let parent = stack.last().copied();
    if parent.is_none() && root.is_some() {
        return Err(DocumentError::TrailingContent);
    }

    let id = nodes.len();
    nodes.push(Node {
        name,
        prefix,
        kind: NodeKind::Element,
        attributes,
        children: Vec::new(),
        parent,
    });

    match parent {
        Some(p) => nodes[p].children.push(id),
        None => *root = Some(id),
    }
    Ok(id)
}

fn push_text(nodes: &mut Vec<Node>, stack: &[NodeId], text: String) {
    // Text outside the root element is whitespace or junk; drop it.
    let Some(&parent) = stack.last() else {
        return;
    };
    let id = nodes.len();
    nodes.push(Node {
        name: "text".to_string(),
        prefix: None,
        kind: NodeKind::Text(text),
        attributes: Vec::new(),
        children: Vec::new(),
        parent: Some(parent),
    });
    nodes[parent].children.push(id);
}
