//! Structure-preserving merge of freshly parsed markup into a live subtree.
//!
//! Old children matching a new child's identity (same tag plus same `id` or
//! `name`; same kind for text and comments) are kept and patched in place so
//! node handles held elsewhere stay valid. Unmatched old nodes are removed and
//! unmatched new nodes are moved in.

use crate::document::Document;
use crate::node::{NodeId, NodeKind};
use crate::Result;

/// Counters describing what a merge did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub kept: usize,
    pub inserted: usize,
    pub removed: usize,
}

/// Make the children of `target` look like the children of `source`.
/// `source` is consumed: its unmatched nodes are moved into `target`.
pub fn merge_children(doc: &mut Document, target: NodeId, source: NodeId) -> Result<MergeStats> {
    let mut stats = MergeStats::default();
    merge_into(doc, target, source, &mut stats)?;
    Ok(stats)
}

fn merge_into(
    doc: &mut Document,
    target: NodeId,
    source: NodeId,
    stats: &mut MergeStats,
) -> Result<()> {
    let mut unmatched: Vec<NodeId> = doc.children(target).to_vec();
    let incoming: Vec<NodeId> = doc.children(source).to_vec();

    for (position, new_node) in incoming.into_iter().enumerate() {
        let matched = unmatched
            .iter()
            .position(|old| same_identity(doc, *old, new_node));
        let placed = match matched {
            Some(slot) => {
                let old = unmatched.remove(slot);
                patch(doc, old, new_node, stats)?;
                stats.kept += 1;
                old
            }
            None => {
                stats.inserted += 1;
                new_node
            }
        };
        let current = doc.children(target).get(position).copied();
        if current != Some(placed) {
            doc.insert_before(target, placed, current)?;
        }
    }

    for stale in unmatched {
        doc.detach(stale);
        stats.removed += 1;
    }
    Ok(())
}

fn identity_attr(doc: &Document, id: NodeId) -> Option<(&'static str, String)> {
    if let Some(value) = doc.attr(id, "id") {
        return Some(("id", value.to_string()));
    }
    doc.attr(id, "name").map(|value| ("name", value.to_string()))
}

fn same_identity(doc: &Document, old: NodeId, new: NodeId) -> bool {
    match (doc.kind(old), doc.kind(new)) {
        (NodeKind::Text(_), NodeKind::Text(_)) => true,
        (NodeKind::Comment(a), NodeKind::Comment(b)) => a == b,
        (NodeKind::Element(a), NodeKind::Element(b)) => {
            a.tag == b.tag && identity_attr(doc, old) == identity_attr(doc, new)
        }
        _ => false,
    }
}

fn patch(doc: &mut Document, old: NodeId, new: NodeId, stats: &mut MergeStats) -> Result<()> {
    if let Some(text) = doc.text(new).map(str::to_string) {
        doc.set_text(old, &text);
        return Ok(());
    }
    if !doc.is_element(old) {
        return Ok(());
    }

    let wanted: Vec<(String, String)> = doc.attrs(new).to_vec();
    let stale: Vec<String> = doc
        .attrs(old)
        .iter()
        .filter(|(name, _)| !wanted.iter().any(|(n, _)| n == name))
        .map(|(name, _)| name.clone())
        .collect();
    for name in stale {
        doc.remove_attr(old, &name);
    }
    for (name, value) in &wanted {
        doc.set_attr(old, name, value)?;
    }

    // Live control state follows the server unless the user is typing in it.
    if doc.is_form_control(old) && !doc.is_focused(old) {
        if doc.is_checkable(old) {
            let checked = doc.checked(new);
            doc.set_checked(old, checked);
        } else if !doc.has_tag(old, "select") {
            let value = doc.value(new);
            doc.set_value(old, &value);
        }
    }

    match (doc.template_content(old), doc.template_content(new)) {
        (Some(old_content), Some(new_content)) => {
            merge_into(doc, old_content, new_content, stats)?;
        }
        _ => merge_into(doc, old, new, stats)?,
    }

    if doc.has_tag(old, "option") {
        let selected = doc.is_selected(new);
        doc.set_selected(old, selected);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::parse_fragment;
    use crate::serialize::inner_html;
    use pretty_assertions::assert_eq;

    fn live(doc: &mut Document, html: &str) -> NodeId {
        let app = doc.create_element("div");
        let root = doc.root();
        doc.append_child(root, app).unwrap();
        let frag = parse_fragment(doc, html);
        doc.append_child(app, frag).unwrap();
        app
    }

    #[test]
    fn keeps_matching_nodes_and_patches_them() {
        let mut doc = Document::new();
        let app = live(&mut doc, r#"<p id="a">old</p><span>x</span>"#);
        let p = doc.get_element_by_id("a").unwrap();

        let incoming = parse_fragment(&mut doc, r#"<p id="a" class="c">new</p><em>y</em>"#);
        let stats = merge_children(&mut doc, app, incoming).unwrap();

        assert_eq!(doc.get_element_by_id("a"), Some(p));
        assert_eq!(inner_html(&doc, app), r#"<p id="a" class="c">new</p><em>y</em>"#);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.inserted, 1);
    }

    #[test]
    fn reorders_by_identity() {
        let mut doc = Document::new();
        let app = live(&mut doc, r#"<i id="1"></i><i id="2"></i>"#);
        let one = doc.get_element_by_id("1").unwrap();
        let two = doc.get_element_by_id("2").unwrap();

        let incoming = parse_fragment(&mut doc, r#"<i id="2"></i><i id="1"></i>"#);
        merge_children(&mut doc, app, incoming).unwrap();
        assert_eq!(doc.children(app), &[two, one]);
    }

    #[test]
    fn focused_input_keeps_its_value() {
        let mut doc = Document::new();
        let app = live(&mut doc, r#"<input name="q" value="a">"#);
        let input = doc.children(app)[0];
        doc.set_value(input, "typing");
        doc.focus(input);

        let incoming = parse_fragment(&mut doc, r#"<input name="q" value="server">"#);
        merge_children(&mut doc, app, incoming).unwrap();
        assert_eq!(doc.value(input), "typing");

        doc.blur();
        let incoming = parse_fragment(&mut doc, r#"<input name="q" value="server">"#);
        merge_children(&mut doc, app, incoming).unwrap();
        assert_eq!(doc.value(input), "server");
    }

    #[test]
    fn merging_identical_markup_is_a_no_op() {
        let mut doc = Document::new();
        let html = r#"<ul><li id="x">1</li><li id="y">2</li></ul>"#;
        let app = live(&mut doc, html);
        let before = doc.mutation_count();
        let incoming = parse_fragment(&mut doc, html);
        merge_children(&mut doc, app, incoming).unwrap();
        assert_eq!(doc.mutation_count(), before);
    }
}
