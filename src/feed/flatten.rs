//! Serializes document subtrees into flat `name: value` channel lines.
//!
//! Rules, applied depth-first in document order:
//!
//! - text node: its cleaned text on a line of its own (blank text is dropped)
//! - `link` element with an `href`: `link: <href>`
//! - element whose children are all text: `name: text`
//! - element with element children: no line of its own, children are visited
//! - childless element with attributes: `k=v ` tokens on one line
//! - nodes whose namespace prefix is in the skip list are dropped with their subtree
//!
//! A bare text line identical to one already produced in the same pass is
//! emitted once. Element lines are always emitted.

use std::collections::HashSet;

use crate::feed::document::{Document, NodeId, NodeKind};
use crate::util::clean_line;

/// Literal line that terminates every item/entry block in an output channel.
pub const ITEM_DELIMITER: &str = "ITEMS";

/// Flattens subtrees, skipping auxiliary namespaces.
#[derive(Debug, Clone, Default)]
pub struct Flattener {
    skip_prefixes: Vec<String>,
}

impl Flattener {
    pub fn new(skip_prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            skip_prefixes: skip_prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Flattens the subtree rooted at `id` into lines.
    pub fn flatten(&self, doc: &Document, id: NodeId) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.walk(doc, id, &mut out, &mut seen);
        out
    }

    /// Flattens an item or entry into a delivery block ending in [`ITEM_DELIMITER`].
    pub fn item_block(&self, doc: &Document, id: NodeId) -> Vec<String> {
        let mut block = self.flatten(doc, id);
        block.push(ITEM_DELIMITER.to_string());
        block
    }

    /// The line the flattener produces for the `name` child of `parent`.
    ///
    /// For `link`, an `href` link with no `rel` or `rel="alternate"` is
    /// preferred over other relations (Atom entries routinely carry several).
    /// Returns `None` when no such child yields a line.
    pub fn child_line(&self, doc: &Document, parent: NodeId, name: &str) -> Option<String> {
        let mut candidates = doc
            .element_children(parent)
            .filter(|&c| doc.node(c).name == name && !self.is_skipped(doc, c));

        if name != "link" {
            return candidates.find_map(|c| self.leaf_line(doc, c));
        }

        let mut fallback = None;
        for c in candidates {
            let Some(line) = self.leaf_line(doc, c) else {
                continue;
            };
            match doc.node(c).attribute("rel") {
                None | Some("alternate") => return Some(line),
                Some(_) => {
                    fallback.get_or_insert(line);
                }
            }
        }
        fallback
    }

    fn is_skipped(&self, doc: &Document, id: NodeId) -> bool {
        doc.node(id)
            .prefix
            .as_ref()
            .is_some_and(|p| self.skip_prefixes.iter().any(|s| s == p))
    }

    /// The single line an element produces without recursing, if any.
    fn leaf_line(&self, doc: &Document, id: NodeId) -> Option<String> {
        let node = doc.node(id);
        if !node.is_element() {
            return None;
        }

        if node.name == "link" {
            if let Some(href) = node.attribute("href") {
                let href = clean_line(href);
                if !href.is_empty() {
                    return Some(format!("link: {href}"));
                }
            }
        }

        if let Some(text) = doc.text_content(id) {
            let text = clean_line(&text);
            if !text.is_empty() {
                return Some(format!("{}: {}", node.name, text));
            }
        }

        let has_elements = node.children.iter().any(|&c| doc.node(c).is_element());
        if !has_elements && !node.attributes.is_empty() {
            let tokens = node
                .attributes
                .iter()
                .map(|(k, v)| format!("{}={} ", k, clean_line(v)))
                .collect();
            return Some(tokens);
        }

        None
    }

    fn walk(&self, doc: &Document, id: NodeId, out: &mut Vec<String>, seen: &mut HashSet<String>) {
        if self.is_skipped(doc, id) {
            return;
        }

        match &doc.node(id).kind {
            NodeKind::Text(text) => emit_text(clean_line(text), out, seen),
            NodeKind::Element => {
                if let Some(line) = self.leaf_line(doc, id) {
                    out.push(line);
                    return;
                }
                for &child in doc.children(id) {
                    self.walk(doc, child, out, seen);
                }
            }
        }
    }
}

fn emit_text(line: String, out: &mut Vec<String>, seen: &mut HashSet<String>) {
    if line.is_empty() || !seen.insert(line.clone()) {
        return;
    }
    out.push(line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn flatten_first(xml: &str, path: &[&str]) -> Vec<String> {
        let doc = Document::parse(xml.as_bytes()).unwrap();
        let mut id = doc.root();
        for name in path {
            id = doc.find_child(id, name).unwrap();
        }
        Flattener::new(["media"]).flatten(&doc, id)
    }

    #[test]
    fn test_rss_item_lines_in_document_order() {
        let lines = flatten_first(
            r#"<rss><channel><item>
                <title>  First
                   post </title>
                <link>http://example.com/1</link>
                <guid isPermaLink="false">abc</guid>
                <enclosure url="http://example.com/a.mp3" length="12" type="audio/mpeg"/>
            </item></channel></rss>"#,
            &["channel", "item"],
        );
        assert_eq!(
            lines,
            vec![
                "title: First post",
                "link: http://example.com/1",
                "guid: abc",
                "url=http://example.com/a.mp3 length=12 type=audio/mpeg ",
            ]
        );
    }

    #[test]
    fn test_childless_element_emits_attribute_tokens() {
        let doc = Document::parse(br#"<item><enclosure url="u" length="1"/></item>"#).unwrap();
        let lines = Flattener::default().flatten(&doc, doc.root());
        assert_eq!(lines, vec!["url=u length=1 "]);
    }

    #[test]
    fn test_link_without_children_still_uses_href() {
        let doc = Document::parse(br#"<entry><link rel="alternate" type="text/html" href="http://e/1"/><link rel="x"/></entry>"#)
            .unwrap();
        let lines = Flattener::default().flatten(&doc, doc.root());
        assert_eq!(lines, vec!["link: http://e/1", "rel=x "]);
    }

    #[test]
    fn test_atom_link_uses_href() {
        let lines = flatten_first(
            r#"<feed><entry><title type="html">Hi</title><link rel="alternate" href="http://e/1"/></entry></feed>"#,
            &["entry"],
        );
        assert_eq!(lines, vec!["title: Hi", "link: http://e/1"]);
    }

    #[test]
    fn test_nested_elements_recurse_without_header() {
        let lines = flatten_first(
            r#"<feed><entry><author><name>Ann</name><email>a@e</email></author></entry></feed>"#,
            &["entry"],
        );
        assert_eq!(lines, vec!["name: Ann", "email: a@e"]);
    }

    #[test]
    fn test_media_namespace_skipped() {
        let lines = flatten_first(
            r#"<rss xmlns:media="m"><channel><item>
                <title>T</title>
                <media:group><media:content url="x"/><media:title>ignored</media:title></media:group>
            </item></channel></rss>"#,
            &["channel", "item"],
        );
        assert_eq!(lines, vec!["title: T"]);
    }

    #[test]
    fn test_identical_text_lines_emitted_once() {
        let lines = flatten_first(
            r#"<rss><item><p>same<br/>same<br/>other</p></item></rss>"#,
            &["item"],
        );
        assert_eq!(lines, vec!["same", "other"]);
    }

    #[test]
    fn test_repeated_element_lines_all_kept() {
        let lines = flatten_first(
            r#"<rss><item><category>tech</category><category>tech</category><category>rust</category></item></rss>"#,
            &["item"],
        );
        assert_eq!(lines, vec!["category: tech", "category: tech", "category: rust"]);
    }

    #[test]
    fn test_mixed_content_text_gets_own_line() {
        let lines = flatten_first(r#"<rss><item><p>Hello <b>there</b>  </p></item></rss>"#, &["item"]);
        assert_eq!(lines, vec!["Hello", "b: there"]);
    }

    #[test]
    fn test_empty_elements_produce_nothing() {
        let lines = flatten_first(r#"<rss><item><comments/><title>   </title></item></rss>"#, &["item"]);
        assert!(lines.is_empty());
    }

    #[test]
    fn test_control_characters_removed() {
        let lines = flatten_first("<rss><item><title>a\x1b[31mb</title></item></rss>", &["item"]);
        assert_eq!(lines, vec!["title: ab"]);
    }

    #[test]
    fn test_item_block_ends_with_delimiter() {
        let doc = Document::parse(b"<rss><item><title>T</title></item></rss>").unwrap();
        let item = doc.find_child(doc.root(), "item").unwrap();
        let block = Flattener::default().item_block(&doc, item);
        assert_eq!(block, vec!["title: T", ITEM_DELIMITER]);
    }

    #[test]
    fn test_child_line_prefers_alternate_link() {
        let doc = Document::parse(
            br#"<feed><entry>
                <link rel="self" href="http://e/self"/>
                <link rel="alternate" href="http://e/page"/>
            </entry></feed>"#,
        )
        .unwrap();
        let entry = doc.find_child(doc.root(), "entry").unwrap();
        let flattener = Flattener::default();
        assert_eq!(
            flattener.child_line(&doc, entry, "link").as_deref(),
            Some("link: http://e/page")
        );
    }

    #[test]
    fn test_child_line_falls_back_to_other_rel() {
        let doc =
            Document::parse(br#"<feed><entry><link rel="related" href="http://e/r"/></entry></feed>"#)
                .unwrap();
        let entry = doc.find_child(doc.root(), "entry").unwrap();
        assert_eq!(
            Flattener::default().child_line(&doc, entry, "link").as_deref(),
            Some("link: http://e/r")
        );
    }

    #[test]
    fn test_child_line_matches_flattened_output() {
        let doc = Document::parse(
            b"<rss><item><title>T</title><link>\n  http://e/1\n</link></item></rss>",
        )
        .unwrap();
        let item = doc.find_child(doc.root(), "item").unwrap();
        let flattener = Flattener::default();
        let link = flattener.child_line(&doc, item, "link").unwrap();
        assert_eq!(link, "link: http://e/1");
        assert!(flattener.flatten(&doc, item).contains(&link));
        assert_eq!(flattener.child_line(&doc, item, "missing"), None);
    }
}
