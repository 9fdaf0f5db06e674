use crate::node::{Element, NodeId, NodeKind};
use crate::{DomError, Result};

#[derive(Debug, Clone)]
struct NodeData {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

impl NodeData {
    fn new(kind: NodeKind) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            kind,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<NodeData>,
}

/// Journal entry for a subtree attached to or detached from the live tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Inserted(NodeId),
    Removed(NodeId),
}

/// Arena-backed document.
///
/// All structural edits go through this type so it can keep a mutation counter
/// (used to assert idempotent reconciliation) and a journal of subtrees that
/// entered or left the live tree (drained by lifecycle hooks).
#[derive(Debug, Clone)]
pub struct Document {
    slots: Vec<Slot>,
    /// Released slots, reused by the next allocations
    free: Vec<u32>,
    /// What a released handle reads as
    vacant: NodeData,
    /// Set by allocations and detaches since the last collection
    unswept: bool,
    root: NodeId,
    focused: Option<NodeId>,
    mutations: u64,
    journal: Vec<Mutation>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            slots: Vec::new(),
            free: Vec::new(),
            vacant: NodeData::new(NodeKind::Fragment),
            unswept: false,
            root: NodeId {
                slot: 0,
                generation: 0,
            },
            focused: None,
            mutations: 0,
            journal: Vec::new(),
        };
        doc.root = doc.alloc(NodeKind::Document);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let node = NodeData::new(kind);
        self.unswept = true;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.generation = entry.generation.wrapping_add(1);
            entry.node = Some(node);
            return NodeId {
                slot,
                generation: entry.generation,
            };
        }
        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            slot,
            generation: 0,
        }
    }

    fn data(&self, id: NodeId) -> &NodeData {
        match self.slots.get(id.index()) {
            Some(Slot {
                generation,
                node: Some(node),
            }) if *generation == id.generation => node,
            _ => &self.vacant,
        }
    }

    /// Writes through a released handle land in a scratch node.
    fn data_mut(&mut self, id: NodeId) -> &mut NodeData {
        match self.slots.get_mut(id.index()) {
            Some(Slot {
                generation,
                node: Some(node),
            }) if *generation == id.generation => node,
            _ => {
                self.vacant = NodeData::new(NodeKind::Fragment);
                &mut self.vacant
            }
        }
    }

    /// False once the node's slot has been released.
    pub fn is_live(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|slot| slot.generation == id.generation && slot.node.is_some())
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let mut element = Element::new(tag);
        if element.is_template() {
            element.content = Some(self.alloc(NodeKind::Fragment));
        }
        self.alloc(NodeKind::Element(element))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Text(text.into()))
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Comment(text.into()))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.alloc(NodeKind::Fragment)
    }

    /// Deep clone of a subtree, including template content. The clone is detached.
    pub fn clone_deep(&mut self, id: NodeId) -> NodeId {
        let mut kind = self.data(id).kind.clone();
        if let NodeKind::Element(element) = &mut kind {
            if let Some(content) = element.content {
                element.content = Some(self.clone_deep(content));
            }
        }
        let copy = self.alloc(kind);
        let children = self.data(id).children.clone();
        for child in children {
            let child_copy = self.clone_deep(child);
            self.data_mut(child_copy).parent = Some(copy);
            self.data_mut(copy).children.push(child_copy);
        }
        copy
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.data(id).kind
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.data(id).kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.data_mut(id).kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.data(id).kind.is_element()
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        self.data(id).kind.is_text()
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.tag.as_str())
    }

    pub fn has_tag(&self, id: NodeId, tag: &str) -> bool {
        self.tag(id) == Some(tag)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.data(id).children
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|c| *c == id)?;
        siblings.get(pos + 1).copied()
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|c| *c == id)?;
        pos.checked_sub(1).and_then(|p| siblings.get(p).copied())
    }

    /// True if `node` is `ancestor` or lies beneath it.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        self.contains(self.root, id)
    }

    /// Parent chain starting at `id` itself.
    pub fn ancestors_inclusive(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            out.push(node);
            current = self.parent(node);
        }
        out
    }

    /// Pre-order descendants of `root`, excluding `root` and template content.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    pub fn descendants_inclusive(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = vec![root];
        out.extend(self.descendants(root));
        out
    }

    /// Elements under `root` (inclusive) matching `pred`, in document order.
    pub fn select(&self, root: NodeId, pred: impl Fn(&Element) -> bool) -> Vec<NodeId> {
        self.descendants_inclusive(root)
            .into_iter()
            .filter(|id| self.element(*id).is_some_and(&pred))
            .collect()
    }

    pub fn elements_by_tag(&self, root: NodeId, tag: &str) -> Vec<NodeId> {
        self.select(root, |el| el.tag == tag)
    }

    pub fn get_element_by_id(&self, id_value: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|id| self.attr(*id, "id") == Some(id_value))
    }

    /// Closest inclusive ancestor element matching `pred`.
    pub fn closest(&self, id: NodeId, pred: impl Fn(&Element) -> bool) -> Option<NodeId> {
        self.ancestors_inclusive(id)
            .into_iter()
            .find(|node| self.element(*node).is_some_and(&pred))
    }

    pub fn template_content(&self, id: NodeId) -> Option<NodeId> {
        self.element(id).and_then(|el| el.content)
    }

    // ------------------------------------------------------------------
    // Text and attributes
    // ------------------------------------------------------------------

    /// Data of a text or comment node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.data(id).kind {
            NodeKind::Text(text) | NodeKind::Comment(text) => Some(text),
            _ => None,
        }
    }

    pub fn set_text(&mut self, id: NodeId, value: &str) {
        let changed = match &mut self.data_mut(id).kind {
            NodeKind::Text(text) | NodeKind::Comment(text) if text != value => {
                value.clone_into(text);
                true
            }
            _ => false,
        };
        if changed {
            self.touch(id);
        }
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        if let NodeKind::Text(text) = &self.data(id).kind {
            return text.clone();
        }
        self.descendants(id)
            .into_iter()
            .filter_map(|node| match &self.data(node).kind {
                NodeKind::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replace all children of `id` with a single text node.
    pub fn set_text_content(&mut self, id: NodeId, value: &str) -> Result<()> {
        if let NodeKind::Text(_) | NodeKind::Comment(_) = self.data(id).kind {
            self.set_text(id, value);
            return Ok(());
        }
        if self.children(id).len() == 1 && self.is_text(self.children(id)[0]) {
            let only = self.children(id)[0];
            self.set_text(only, value);
            return Ok(());
        }
        self.clear_children(id);
        if !value.is_empty() {
            let text = self.create_text(value);
            self.append_child(id, text)?;
        }
        Ok(())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|el| el.attr(name))
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.element(id).is_some_and(|el| el.has_attr(name))
    }

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        self.element(id).map(|el| el.attrs.as_slice()).unwrap_or(&[])
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
        let element = self.element_mut(id).ok_or(DomError::NotAnElement(id))?;
        let changed = match element.attrs.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) if existing == value => false,
            Some((_, existing)) => {
                value.clone_into(existing);
                true
            }
            None => {
                element.attrs.push((name.to_string(), value.to_string()));
                true
            }
        };
        if changed {
            self.touch(id);
        }
        Ok(())
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        let element = self.element_mut(id)?;
        let pos = element.attrs.iter().position(|(n, _)| n == name)?;
        let (_, value) = element.attrs.remove(pos);
        self.touch(id);
        Some(value)
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attr(id, "class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) -> Result<()> {
        if self.has_class(id, class) {
            return Ok(());
        }
        let next = match self.attr(id, "class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {class}", existing.trim()),
            _ => class.to_string(),
        };
        self.set_attr(id, "class", &next)
    }

    pub fn remove_class(&mut self, id: NodeId, class: &str) -> Result<()> {
        if !self.has_class(id, class) {
            return Ok(());
        }
        let next = self
            .attr(id, "class")
            .unwrap_or_default()
            .split_whitespace()
            .filter(|c| *c != class)
            .collect::<Vec<_>>()
            .join(" ");
        if next.is_empty() {
            self.remove_attr(id, "class");
            Ok(())
        } else {
            self.set_attr(id, "class", &next)
        }
    }

    // ------------------------------------------------------------------
    // Tree mutation
    // ------------------------------------------------------------------

    /// Detach `id` from its parent. No-op for already detached nodes.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        let was_connected = self.is_connected(parent);
        self.data_mut(parent).children.retain(|c| *c != id);
        self.data_mut(id).parent = None;
        self.unswept = true;
        if was_connected {
            self.mutations += 1;
            self.journal.push(Mutation::Removed(id));
            if self.focused.is_some_and(|f| self.contains(id, f)) {
                self.focused = None;
            }
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` under `parent` before `reference` (append when `None`).
    /// Inserting a fragment moves its children instead.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        for id in [Some(parent), Some(child), reference].into_iter().flatten() {
            if !self.is_live(id) {
                return Err(DomError::Released(id));
            }
        }
        if !self.kind(parent).can_have_children() {
            return Err(DomError::NotAContainer(parent));
        }
        if let Some(reference) = reference {
            if self.parent(reference) != Some(parent) {
                return Err(DomError::NotAChild { parent, reference });
            }
        }
        if matches!(self.kind(child), NodeKind::Fragment) {
            let moved = self.children(child).to_vec();
            for node in moved {
                self.insert_before(parent, node, reference)?;
            }
            return Ok(());
        }
        if self.contains(child, parent) {
            return Err(DomError::Hierarchy { parent, child });
        }
        if reference == Some(child) {
            return Ok(());
        }

        self.detach(child);
        let position = match reference {
            Some(reference) => self
                .children(parent)
                .iter()
                .position(|c| *c == reference)
                .ok_or(DomError::NotAChild { parent, reference })?,
            None => self.children(parent).len(),
        };
        self.data_mut(parent).children.insert(position, child);
        self.data_mut(child).parent = Some(parent);
        if self.is_connected(parent) {
            self.mutations += 1;
            self.journal.push(Mutation::Inserted(child));
        }
        Ok(())
    }

    /// Insert `new_node` right after `node` in its parent.
    pub fn insert_after(&mut self, node: NodeId, new_node: NodeId) -> Result<()> {
        let parent = self.parent(node).ok_or(DomError::NotAChild {
            parent: node,
            reference: node,
        })?;
        let reference = self.next_sibling(node);
        self.insert_before(parent, new_node, reference)
    }

    pub fn clear_children(&mut self, id: NodeId) {
        for child in self.children(id).to_vec() {
            self.detach(child);
        }
    }

    /// Move every child of `from` to the end of `to`.
    pub fn take_children(&mut self, from: NodeId) -> Vec<NodeId> {
        let children = self.children(from).to_vec();
        for child in &children {
            self.detach(*child);
        }
        children
    }

    // ------------------------------------------------------------------
    // Focus and bookkeeping
    // ------------------------------------------------------------------

    pub fn focus(&mut self, id: NodeId) {
        self.focused = Some(id);
    }

    pub fn blur(&mut self) {
        self.focused = None;
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    pub fn is_focused(&self, id: NodeId) -> bool {
        self.focused == Some(id)
    }

    /// Number of changes to the live tree since the document was created.
    /// Work on detached nodes (fresh fragments, template content) is not counted.
    pub fn mutation_count(&self) -> u64 {
        self.mutations
    }

    pub(crate) fn touch(&mut self, id: NodeId) {
        if self.is_connected(id) {
            self.mutations += 1;
        }
    }

    /// Drain the insert/remove journal.
    pub fn take_mutations(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.journal)
    }

    /// Nodes currently holding a slot, detached ones included.
    pub fn node_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Release every node that is not reachable from the root (children and
    /// template content) and not named by an undrained journal entry.
    /// Returns the released handles so owners can prune their side tables.
    /// A no-op when nothing was allocated or detached since the last pass.
    pub fn collect_garbage(&mut self) -> Vec<NodeId> {
        if !self.unswept {
            return Vec::new();
        }
        let mut reachable = vec![false; self.slots.len()];
        let mut stack = vec![self.root];
        stack.extend(self.journal.iter().map(|mutation| match mutation {
            Mutation::Inserted(id) | Mutation::Removed(id) => *id,
        }));
        while let Some(id) = stack.pop() {
            if !self.is_live(id) || std::mem::replace(&mut reachable[id.index()], true) {
                continue;
            }
            let data = self.data(id);
            stack.extend(data.children.iter().copied());
            if let NodeKind::Element(Element {
                content: Some(content),
                ..
            }) = &data.kind
            {
                stack.push(*content);
            }
        }

        let mut released = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.node.is_some() && !reachable[index] {
                slot.node = None;
                released.push(NodeId {
                    slot: index as u32,
                    generation: slot.generation,
                });
                self.free.push(index as u32);
            }
        }
        if self.focused.is_some_and(|f| !self.is_live(f)) {
            self.focused = None;
        }
        self.unswept = !self.journal.is_empty();
        if !released.is_empty() {
            log::trace!("Released {} detached nodes", released.len());
        }
        released
    }
}
