//! Tolerant HTML fragment parser.
//!
//! Good enough for server-rendered pages and reactive templates: void and
//! raw-text elements, implicit closes for list/option/table cells, entity
//! decoding, and table-context rules (table parts outside a table are dropped,
//! except inside `<template>` content or when parsing for a table context).

use crate::document::Document;
use crate::node::{is_void, NodeId, RAW_TEXT_ELEMENTS};

const TABLE_PARTS: &[&str] = &[
    "caption", "colgroup", "col", "thead", "tbody", "tfoot", "tr", "td", "th",
];

const TABLE_CONTEXTS: &[&str] = &["table", "thead", "tbody", "tfoot", "tr", "colgroup"];

/// Parse `html` into a detached fragment.
pub fn parse_fragment(doc: &mut Document, html: &str) -> NodeId {
    parse_fragment_in_context(doc, html, None)
}

/// Parse `html` as if it were the inner HTML of a `context` element.
///
/// A table-ish context (`tbody`, `tr`, ...) lets row and cell markup through
/// where a plain parse would drop the table-part tags.
pub fn parse_fragment_in_context(doc: &mut Document, html: &str, context: Option<&str>) -> NodeId {
    let fragment = doc.create_fragment();
    let table_context = context
        .map(|tag| TABLE_CONTEXTS.contains(&tag.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    let mut builder = TreeBuilder {
        doc,
        stack: vec![Frame {
            tag: String::new(),
            insert_into: fragment,
            table_context,
        }],
    };
    builder.run(html);
    fragment
}

/// Parse a whole page into the document root.
pub fn parse_document(html: &str) -> Document {
    let mut doc = Document::new();
    let fragment = parse_fragment(&mut doc, html);
    let root = doc.root();
    // Fragment children are fresh nodes; insertion cannot fail.
    if let Err(err) = doc.append_child(root, fragment) {
        log::warn!("Failed to attach parsed page: {err}");
    }
    doc.take_mutations();
    doc
}

struct Frame {
    tag: String,
    insert_into: NodeId,
    /// Table parts are accepted directly under this frame.
    table_context: bool,
}

struct TreeBuilder<'a> {
    doc: &'a mut Document,
    stack: Vec<Frame>,
}

impl TreeBuilder<'_> {
    fn current(&self) -> &Frame {
        // The base frame is never popped.
        &self.stack[self.stack.len() - 1]
    }

    fn run(&mut self, html: &str) {
        let bytes = html.as_bytes();
        let mut pos = 0;
        let mut text_start = 0;

        while pos < bytes.len() {
            if bytes[pos] != b'<' {
                pos += 1;
                continue;
            }
            let rest = &html[pos..];
            if rest.starts_with("<!--") {
                self.flush_text(&html[text_start..pos]);
                let end = rest[4..].find("-->").map(|i| pos + 4 + i);
                let body_end = end.unwrap_or(html.len());
                self.append_comment(&html[pos + 4..body_end]);
                pos = end.map(|e| e + 3).unwrap_or(html.len());
                text_start = pos;
                continue;
            }
            if rest.starts_with("<!") || rest.starts_with("<?") {
                self.flush_text(&html[text_start..pos]);
                pos = rest.find('>').map(|i| pos + i + 1).unwrap_or(html.len());
                text_start = pos;
                continue;
            }
            if rest.starts_with("</") {
                let name_len = tag_name_len(&rest[2..]);
                if name_len == 0 {
                    pos += 1;
                    continue;
                }
                self.flush_text(&html[text_start..pos]);
                let name = rest[2..2 + name_len].to_ascii_lowercase();
                pos = rest.find('>').map(|i| pos + i + 1).unwrap_or(html.len());
                text_start = pos;
                self.end_tag(&name);
                continue;
            }
            let name_len = tag_name_len(&rest[1..]);
            if name_len == 0 {
                pos += 1;
                continue;
            }
            self.flush_text(&html[text_start..pos]);
            let name = rest[1..1 + name_len].to_ascii_lowercase();
            let (attrs, self_closing, consumed) = parse_attrs(&rest[1 + name_len..]);
            pos += 1 + name_len + consumed;
            text_start = pos;

            let element = self.start_tag(&name, attrs, self_closing);

            if RAW_TEXT_ELEMENTS.contains(&name.as_str()) && !self_closing {
                let close = find_close_tag(&html[pos..], &name);
                let raw_end = close.map(|i| pos + i).unwrap_or(html.len());
                let raw = &html[pos..raw_end];
                if !raw.is_empty() {
                    let text = if matches!(name.as_str(), "textarea" | "title") {
                        decode_entities(raw)
                    } else {
                        raw.to_string()
                    };
                    let node = self.doc.create_text(text);
                    if let Some(element) = element {
                        self.attach(element, node);
                    }
                }
                pos = match close {
                    Some(i) => html[pos + i..]
                        .find('>')
                        .map(|j| pos + i + j + 1)
                        .unwrap_or(html.len()),
                    None => html.len(),
                };
                text_start = pos;
                if element.is_some() {
                    self.end_tag(&name);
                }
            }
        }
        self.flush_text(&html[text_start..]);
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) {
        if let Err(err) = self.doc.append_child(parent, child) {
            log::debug!("Parser dropped node: {err}");
        }
    }

    fn flush_text(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        let parent = self.current().insert_into;
        // Whitespace between table parts has nowhere to go in a table.
        if raw.trim().is_empty() && TABLE_CONTEXTS.contains(&self.current().tag.as_str()) {
            return;
        }
        let node = self.doc.create_text(decode_entities(raw));
        self.attach(parent, node);
    }

    fn append_comment(&mut self, body: &str) {
        let parent = self.current().insert_into;
        let node = self.doc.create_comment(body);
        self.attach(parent, node);
    }

    fn in_table_context(&self) -> bool {
        self.current().table_context
    }

    fn start_tag(
        &mut self,
        name: &str,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    ) -> Option<NodeId> {
        self.implicit_close(name);

        if TABLE_PARTS.contains(&name) && !self.in_table_context() {
            log::debug!("Dropping <{name}> outside table context");
            return None;
        }

        let element = self.doc.create_element(name);
        if let Some(el) = self.doc.element_mut(element) {
            el.attrs = attrs;
        }
        self.doc.init_control_state(element);
        let parent = self.current().insert_into;
        self.attach(parent, element);

        if is_void(name) || self_closing {
            return Some(element);
        }

        let (insert_into, table_context) = match self.doc.template_content(element) {
            Some(content) => (content, true),
            None => (element, TABLE_CONTEXTS.contains(&name)),
        };
        self.stack.push(Frame {
            tag: name.to_string(),
            insert_into,
            table_context,
        });
        Some(element)
    }

    /// Close elements that cannot contain `name` (a new `<li>` ends the open one, etc.).
    fn implicit_close(&mut self, name: &str) {
        let (closes, boundary): (&[&str], &[&str]) = match name {
            "li" => (&["li"], &["ul", "ol", "template"]),
            "option" => (&["option"], &["select", "datalist", "template"]),
            "tr" => (&["tr", "td", "th"], &["table", "tbody", "thead", "tfoot", "template"]),
            "td" | "th" => (&["td", "th"], &["tr", "table", "template"]),
            "tbody" | "thead" | "tfoot" => (
                &["tbody", "thead", "tfoot", "tr", "td", "th"],
                &["table", "template"],
            ),
            _ => return,
        };
        let found = self
            .stack
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .take_while(|(_, f)| !boundary.contains(&f.tag.as_str()))
            .filter(|(_, f)| closes.contains(&f.tag.as_str()))
            .map(|(i, _)| i)
            .last();
        if let Some(index) = found {
            self.stack.truncate(index);
        }
    }

    fn end_tag(&mut self, name: &str) {
        if let Some(index) = self.stack.iter().skip(1).rposition(|f| f.tag == name) {
            self.stack.truncate(index + 1);
        }
    }
}

fn tag_name_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    if bytes.first().map(|b| b.is_ascii_alphabetic()) != Some(true) {
        return 0;
    }
    bytes
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.'))
        .count()
}

/// Parse attributes up to and including the closing `>`.
/// Returns the attributes, whether the tag was self-closing, and bytes consumed.
fn parse_attrs(s: &str) -> (Vec<(String, String)>, bool, usize) {
    let bytes = s.as_bytes();
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut pos = 0;
    let mut self_closing = false;

    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }
        match bytes[pos] {
            b'>' => {
                pos += 1;
                break;
            }
            b'/' => {
                pos += 1;
                if bytes.get(pos) == Some(&b'>') {
                    self_closing = true;
                }
                continue;
            }
            _ => {}
        }

        let name_start = pos;
        while pos < bytes.len()
            && !bytes[pos].is_ascii_whitespace()
            && !matches!(bytes[pos], b'=' | b'>' | b'/')
        {
            pos += 1;
        }
        if pos == name_start {
            // Stray '=' or similar.
            pos += 1;
            continue;
        }
        let name = s[name_start..pos].to_ascii_lowercase();

        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let mut value = String::new();
        if bytes.get(pos) == Some(&b'=') {
            pos += 1;
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            match bytes.get(pos) {
                Some(&quote) if quote == b'"' || quote == b'\'' => {
                    let start = pos + 1;
                    let end = s[start..]
                        .find(quote as char)
                        .map(|i| start + i)
                        .unwrap_or(s.len());
                    value = decode_entities(&s[start..end]);
                    pos = (end + 1).min(s.len());
                }
                _ => {
                    let start = pos;
                    while pos < bytes.len()
                        && !bytes[pos].is_ascii_whitespace()
                        && bytes[pos] != b'>'
                    {
                        pos += 1;
                    }
                    value = decode_entities(&s[start..pos]);
                }
            }
        }
        if !attrs.iter().any(|(n, _)| *n == name) {
            attrs.push((name, value));
        }
    }
    (attrs, self_closing, pos)
}

fn find_close_tag(s: &str, name: &str) -> Option<usize> {
    let lower = s.to_ascii_lowercase();
    let needle = format!("</{name}");
    let mut from = 0;
    while let Some(i) = lower[from..].find(&needle) {
        let at = from + i;
        let after = lower.as_bytes().get(at + needle.len());
        if after.map_or(true, |b| b.is_ascii_whitespace() || *b == b'>' || *b == b'/') {
            return Some(at);
        }
        from = at + needle.len();
    }
    None
}

/// Decode the named and numeric character references that show up in practice.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail
            .char_indices()
            .take(12)
            .find(|(_, c)| *c == ';')
            .map(|(i, _)| i)
        else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32)
            }
            _ if entity.starts_with('#') => entity[1..].parse().ok().and_then(char::from_u32),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::inner_html;
    use pretty_assertions::assert_eq;

    fn roundtrip(html: &str) -> String {
        let mut doc = Document::new();
        let frag = parse_fragment(&mut doc, html);
        inner_html(&doc, frag)
    }

    #[test]
    fn parses_nested_elements_and_attributes() {
        assert_eq!(
            roundtrip(r#"<div id="a" class='b'><span>hi</span><br></div>"#),
            r#"<div id="a" class="b"><span>hi</span><br></div>"#
        );
    }

    #[test]
    fn decodes_entities_in_text_and_attributes() {
        let mut doc = Document::new();
        let frag = parse_fragment(&mut doc, r#"<p title="a &amp; b">&lt;x&gt; &#65;&#x42;</p>"#);
        let p = doc.children(frag)[0];
        assert_eq!(doc.attr(p, "title"), Some("a & b"));
        assert_eq!(doc.text_content(p), "<x> AB");
    }

    #[test]
    fn implicit_list_item_close() {
        assert_eq!(
            roundtrip("<ul><li>a<li>b</ul>"),
            "<ul><li>a</li><li>b</li></ul>"
        );
    }

    #[test]
    fn table_parts_outside_table_are_dropped() {
        assert_eq!(roundtrip("<tr><td>x</td></tr>"), "x");
    }

    #[test]
    fn table_parts_survive_in_template_content() {
        let mut doc = Document::new();
        let frag = parse_fragment(&mut doc, "<template><tr><td>{{row.name}}</td></tr></template>");
        let tpl = doc.children(frag)[0];
        let content = doc.template_content(tpl).unwrap();
        assert_eq!(inner_html(&doc, content), "<tr><td>{{row.name}}</td></tr>");
    }

    #[test]
    fn table_context_parse_keeps_rows() {
        let mut doc = Document::new();
        let frag = parse_fragment_in_context(&mut doc, "<tr><td>1</td></tr>", Some("tbody"));
        assert_eq!(inner_html(&doc, frag), "<tr><td>1</td></tr>");
    }

    #[test]
    fn raw_text_elements_keep_markup() {
        let mut doc = Document::new();
        let frag = parse_fragment(&mut doc, "<script>if (a < b) { x(); }</script><p>ok</p>");
        let script = doc.children(frag)[0];
        assert_eq!(doc.text_content(script), "if (a < b) { x(); }");
        assert_eq!(doc.children(frag).len(), 2);
    }

    #[test]
    fn comments_and_self_closing_tags() {
        assert_eq!(
            roundtrip("<!-- each-start --><slot/><i>x</i>"),
            "<!-- each-start --><slot></slot><i>x</i>"
        );
    }

    #[test]
    fn stray_end_tags_are_ignored() {
        assert_eq!(roundtrip("<b>x</i></b>y"), "<b>x</b>y");
    }

    #[test]
    fn checked_and_selected_attributes_seed_state() {
        let mut doc = Document::new();
        let frag = parse_fragment(
            &mut doc,
            r#"<input type="checkbox" checked><select><option>a</option><option selected>b</option></select>"#,
        );
        let input = doc.children(frag)[0];
        let select = doc.children(frag)[1];
        assert!(doc.checked(input));
        assert_eq!(doc.value(select), "b");
    }
}
