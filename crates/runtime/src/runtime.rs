use crate::bindings::{render_template, Binding, BindingIndex, ControlKind};
use crate::components::ComponentRegistry;
use crate::config::RuntimeConfig;
use crate::delta::{container_key, replay};
use crate::directives::{hydrate_event_directives, hydrated_events, EventKind};
use crate::dispatch::{LifecycleEvent, Toast};
use crate::each::EachBlock;
use crate::error::{Result, RuntimeError};
use crate::hooks::HookRegistry;
use crate::path::{display, final_segment, find_key_by_suffix, is_forbidden, resolve, truthy, StateMap};
use crate::scope::Scope;
use crate::store::StateStore;
use jrx_dom::{merge_children, parse_document, parse_fragment_in_context, Document, MergeStats, NodeId};
use jrx_protocol::{parse_inbound, sort_structural_first, DeltaKind, DeltaOps, InboundBatch, StateEntry};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// One page's reactive state: the document, the state map and every registry
/// derived from them. Driven from a single task through `&mut self`.
pub struct Runtime {
    pub(crate) doc: Document,
    /// Element route partials are injected into
    pub(crate) root: NodeId,
    pub(crate) config: RuntimeConfig,
    pub(crate) store: StateStore,
    pub(crate) bindings: BindingIndex,
    /// Conditional template → nodes it mounted
    pub(crate) if_blocks: HashMap<NodeId, Vec<NodeId>>,
    /// List template → its managed range
    pub(crate) each_blocks: HashMap<NodeId, EachBlock>,
    /// Top-level element of a rendered list entry → the entry's scope
    pub(crate) scopes: HashMap<NodeId, Scope>,
    /// Element → events with a bound call
    pub(crate) listeners: HashMap<NodeId, BTreeSet<EventKind>>,
    pub(crate) hooks: HookRegistry,
    pub(crate) components: ComponentRegistry,
    pub(crate) realtime: bool,
    pub(crate) events: Vec<LifecycleEvent>,
    pub(crate) toasts: Vec<Toast>,
    pub(crate) next_call_id: u64,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("root", &self.root)
            .field("state_keys", &self.store.len())
            .field("bindings", &self.bindings.len())
            .field("if_blocks", &self.if_blocks.len())
            .field("each_blocks", &self.each_blocks.len())
            .field("realtime", &self.realtime)
            .finish()
    }
}

fn locate_root(doc: &Document, id: &str) -> NodeId {
    doc.get_element_by_id(id).unwrap_or_else(|| {
        log::debug!("No #{id} element, using the document as app root");
        doc.root()
    })
}

impl Runtime {
    pub fn new(doc: Document, config: RuntimeConfig) -> Result<Self> {
        config.validate().map_err(RuntimeError::Config)?;
        let root = locate_root(&doc, &config.app_root);
        Ok(Self {
            doc,
            root,
            config,
            store: StateStore::new(),
            bindings: BindingIndex::new(),
            if_blocks: HashMap::new(),
            each_blocks: HashMap::new(),
            scopes: HashMap::new(),
            listeners: HashMap::new(),
            hooks: HookRegistry::new(),
            components: ComponentRegistry::new(),
            realtime: false,
            events: Vec::new(),
            toasts: Vec::new(),
            next_call_id: 0,
        })
    }

    /// Parse a full page. Call [`Runtime::hydrate`] once hooks and initial
    /// state are in place.
    pub fn from_html(html: &str, config: RuntimeConfig) -> Result<Self> {
        Self::new(parse_document(html), config)
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn app_root(&self) -> NodeId {
        self.root
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn state(&self) -> &StateMap {
        self.store.values()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn bindings(&self) -> &BindingIndex {
        &self.bindings
    }

    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    pub fn components_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.components
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    /// Whether the realtime socket is open; relaxes the staleness guard and
    /// disables input debounce.
    pub fn set_realtime(&mut self, realtime: bool) {
        self.realtime = realtime;
    }

    pub fn scope_of(&self, node: NodeId) -> Option<&Scope> {
        self.scopes.get(&node)
    }

    pub fn each_block(&self, template: NodeId) -> Option<&EachBlock> {
        self.each_blocks.get(&template)
    }

    pub fn is_mounted(&self, template: NodeId) -> bool {
        self.if_blocks.contains_key(&template)
    }

    pub fn take_events(&mut self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn take_toasts(&mut self) -> Vec<Toast> {
        std::mem::take(&mut self.toasts)
    }

    // ------------------------------------------------------------------
    // Hydration
    // ------------------------------------------------------------------

    /// Full hydration of the app root: index, render, reconcile blocks,
    /// hydrate directives, bind events.
    pub fn hydrate(&mut self) {
        self.bindings.reindex(&self.doc, self.root);
        self.render_all();
        self.reconcile();
        hydrate_event_directives(&mut self.doc, self.root);
        self.bind_events(self.root);
        self.flush_hooks();
        log::debug!(
            "Hydrated: {} binding keys, {} listeners",
            self.bindings.len(),
            self.listeners.len()
        );
    }

    /// Run the conditional and list passes. Returns true if the DOM changed.
    pub fn reconcile(&mut self) -> bool {
        let mounted = self.update_if_blocks();
        let listed = self.update_each_blocks();
        mounted || listed
    }

    /// Re-render every binding under the app root from state.
    pub fn render_all(&mut self) {
        for binding in self.bindings.bindings_under(&self.doc, &[self.root]) {
            self.render_binding(&binding, None);
        }
    }

    pub(crate) fn rebind(&mut self) {
        self.bindings.reindex(&self.doc, self.root);
        hydrate_event_directives(&mut self.doc, self.root);
        self.bind_events(self.root);
    }

    pub(crate) fn bind_events(&mut self, root: NodeId) {
        let elements = self.doc.select(root, |el| {
            EventKind::ALL
                .iter()
                .any(|kind| el.has_attr(kind.call_attr()))
        });
        for element in elements {
            let events = hydrated_events(&self.doc, element);
            self.listeners.entry(element).or_default().extend(events);
        }
    }

    /// Wire freshly inserted nodes: index, render from state, hydrate directives.
    pub(crate) fn after_insert(&mut self, nodes: &[NodeId]) {
        self.bindings.reindex(&self.doc, self.root);
        for binding in self.bindings.bindings_under(&self.doc, nodes) {
            self.render_binding(&binding, None);
        }
        for &node in nodes {
            hydrate_event_directives(&mut self.doc, node);
            self.bind_events(node);
        }
    }

    /// Detach `nodes` and forget side-table entries of their subtrees.
    pub(crate) fn discard_nodes(&mut self, nodes: &[NodeId]) {
        for &node in nodes {
            for inner in self.doc.descendants_inclusive(node) {
                self.scopes.remove(&inner);
                self.listeners.remove(&inner);
            }
            self.doc.detach(node);
        }
    }

    /// Release nodes that left the tree and prune every table keyed by them.
    pub(crate) fn collect_garbage(&mut self) {
        let released = self.doc.collect_garbage();
        if released.is_empty() {
            return;
        }
        let doc = &self.doc;
        self.bindings.retain_nodes(|node| doc.is_live(node));
        self.scopes.retain(|node, _| doc.is_live(*node));
        self.listeners.retain(|node, _| doc.is_live(*node));
        log::trace!("Pruned side tables after releasing {} nodes", released.len());
    }

    /// Drop registries of blocks whose template left the live tree, along with
    /// the nodes they still own.
    pub(crate) fn release_detached_blocks(&mut self) {
        loop {
            let dead_ifs: Vec<NodeId> = self
                .if_blocks
                .keys()
                .filter(|t| !self.doc.is_connected(**t))
                .copied()
                .collect();
            let dead_lists: Vec<NodeId> = self
                .each_blocks
                .keys()
                .filter(|t| !self.doc.is_connected(**t))
                .copied()
                .collect();
            if dead_ifs.is_empty() && dead_lists.is_empty() {
                return;
            }
            for template in dead_ifs {
                if let Some(nodes) = self.if_blocks.remove(&template) {
                    self.discard_nodes(&nodes);
                }
            }
            for template in dead_lists {
                if let Some(block) = self.each_blocks.remove(&template) {
                    self.discard_block(block);
                }
            }
        }
    }

    fn discard_block(&mut self, block: EachBlock) {
        let mut nodes: Vec<NodeId> = block
            .entries
            .into_values()
            .flat_map(|entry| entry.nodes)
            .collect();
        nodes.push(block.start);
        nodes.push(block.end);
        self.discard_nodes(&nodes);
    }

    // ------------------------------------------------------------------
    // State application
    // ------------------------------------------------------------------

    /// Decode and apply one raw inbound message. Returns its resume cursor.
    pub fn apply_message(&mut self, raw: &str) -> Result<Option<u64>> {
        let batch = parse_inbound(raw)?;
        let seq = batch.seq;
        self.apply_batch(batch);
        Ok(seq)
    }

    /// Apply a batch, structural entries first.
    pub fn apply_batch(&mut self, mut batch: InboundBatch) {
        sort_structural_first(&mut batch.entries);
        for entry in batch.entries {
            match entry {
                StateEntry::Value { key, value } => self.apply_value_inner(&key, value, true),
                StateEntry::Delta { key, kind, changes } => {
                    self.apply_delta_inner(&key, kind, &changes)
                }
            }
        }
        self.flush_hooks();
    }

    /// Store `value` under `key`, reconcile blocks, push to bound nodes and
    /// fan plain objects out to `key.child` keys.
    pub fn apply_value(&mut self, key: &str, value: Value) {
        self.apply_value_inner(key, value, true);
        self.flush_hooks();
    }

    fn apply_value_inner(&mut self, key: &str, value: Value, reconcile: bool) {
        if is_forbidden(key) {
            log::warn!("Refusing update of forbidden key {key:?}");
            return;
        }
        if self.store.is_in_flight(key) {
            log::debug!("Skipping echo of in-flight key {key:?}");
            return;
        }
        self.store.set(key, value.clone());
        if reconcile {
            self.reconcile();
        }
        self.push_key(key, &value);
        if let Value::Object(children) = value {
            for (child, child_value) in children {
                self.apply_value_inner(&format!("{key}.{child}"), child_value, false);
            }
        }
    }

    /// Replay structural operations against the container `key` refers to.
    pub fn apply_delta(&mut self, key: &str, kind: DeltaKind, changes: &[Value]) {
        self.apply_delta_inner(key, kind, changes);
        self.flush_hooks();
    }

    fn apply_delta_inner(&mut self, key: &str, kind: DeltaKind, changes: &[Value]) {
        if is_forbidden(key) {
            log::warn!("Refusing delta for forbidden key {key:?}");
            return;
        }
        let ops = DeltaOps::decode(kind, changes);
        let target = container_key(&self.store, key);
        match self.store.get_mut(&target) {
            Some(container) => replay(container, &ops),
            None => {
                let mut container = kind.empty_container();
                replay(&mut container, &ops);
                self.store.set(&target, container);
            }
        }
        log::debug!("Replayed {} {kind} ops on {target:?}", ops.len());

        let container = self.store.get(&target).cloned().unwrap_or(Value::Null);
        self.reconcile();
        self.push_key(&target, &container);
        if target != key {
            self.push_key(key, &container);
        }
        self.reconcile();
    }

    // ------------------------------------------------------------------
    // DOM push
    // ------------------------------------------------------------------

    /// Push `value` to every node bound to `key`. A miss rebuilds the index
    /// once, then falls back to the key's final segment.
    pub(crate) fn push_key(&mut self, key: &str, value: &Value) {
        let mut bindings = self.bindings.lookup(key).to_vec();
        if bindings.is_empty() {
            self.rebind();
            bindings = self.bindings.lookup(key).to_vec();
        }
        if bindings.is_empty() {
            let short = final_segment(key);
            if short != key {
                bindings = self.bindings.lookup(short).to_vec();
            }
        }
        for binding in bindings {
            self.render_binding(&binding, Some(value));
        }
    }

    fn render_binding(&mut self, binding: &Binding, pushed: Option<&Value>) {
        if !self.doc.is_connected(binding.node()) {
            return;
        }
        match binding {
            Binding::Text { node, template } => {
                let state = self.store.values();
                let text = render_template(template, |expr| display(&resolve(expr, state)));
                self.doc.set_text(*node, &text);
            }
            Binding::Attribute {
                node,
                name,
                template,
            } => {
                let state = self.store.values();
                let value = render_template(template, |expr| display(&resolve(expr, state)));
                if let Err(e) = self.doc.set_attr(*node, name, &value) {
                    log::debug!("Cannot render attribute {name}: {e}");
                }
            }
            Binding::Control { node, key, kind } => {
                let value = match pushed {
                    Some(value) => value.clone(),
                    None => match find_key_by_suffix(self.store.values(), key)
                        .and_then(|real| self.store.get(real))
                    {
                        Some(value) => value.clone(),
                        None => return,
                    },
                };
                self.write_control(*node, *kind, key, &value);
            }
        }
    }

    /// Write `value` into a control unless a guard protects it.
    fn write_control(&mut self, node: NodeId, kind: ControlKind, key: &str, value: &Value) {
        if !kind.is_discrete() && self.doc.is_focused(node) {
            log::debug!("Not overwriting focused control {key:?}");
            return;
        }
        let text = display(value);
        if !self.realtime
            && !kind.is_discrete()
            && text.is_empty()
            && !self.doc.value(node).is_empty()
            && self.store.edited_within(key, self.config.staleness_window())
        {
            log::debug!("Not blanking recently edited control {key:?}");
            return;
        }
        match kind {
            ControlKind::Checkbox => {
                self.doc.set_checked(node, truthy(value));
            }
            ControlKind::Radio => {
                let on = match value {
                    Value::Bool(b) => *b,
                    _ => text == self.doc.value(node),
                };
                self.doc.set_checked(node, on);
            }
            ControlKind::MultiSelect => {
                let values: Vec<String> = match value {
                    Value::Array(items) => items.iter().map(display).collect(),
                    _ if text.is_empty() => Vec::new(),
                    _ => vec![text],
                };
                self.doc.set_selected_values(node, &values);
            }
            _ => {
                self.doc.set_value(node, &text);
            }
        }
    }

    // ------------------------------------------------------------------
    // Route transitions
    // ------------------------------------------------------------------

    /// Forget all state and registries; used before a route change.
    pub fn reset(&mut self) {
        self.store.clear();
        self.bindings.clear();
        self.if_blocks.clear();
        self.each_blocks.clear();
        self.scopes.clear();
        self.listeners.clear();
        self.events.clear();
        self.toasts.clear();
    }

    fn root_context(&self) -> Option<String> {
        self.doc.tag(self.root).map(str::to_string)
    }

    /// Replace the app root's content with a route partial and hydrate it.
    pub fn load_partial(&mut self, html: &str) -> Result<()> {
        let html = self.components.expand(html)?;
        self.reset();
        self.doc.clear_children(self.root);
        let context = self.root_context();
        let fragment = parse_fragment_in_context(&mut self.doc, &html, context.as_deref());
        self.doc.append_child(self.root, fragment)?;
        self.hydrate();
        log::info!("Loaded route partial ({} bytes)", html.len());
        Ok(())
    }

    /// Merge a freshly fetched partial into the live app root, keeping nodes
    /// whose identity matches, then rebind everything. State is kept.
    pub fn resync_partial(&mut self, html: &str) -> Result<MergeStats> {
        let html = self.components.expand(html)?;
        for (_, nodes) in std::mem::take(&mut self.if_blocks) {
            self.discard_nodes(&nodes);
        }
        for (_, block) in std::mem::take(&mut self.each_blocks) {
            self.discard_block(block);
        }
        let context = self.root_context();
        let fragment = parse_fragment_in_context(&mut self.doc, &html, context.as_deref());
        let stats = merge_children(&mut self.doc, self.root, fragment)?;
        self.hydrate();
        log::debug!(
            "Resync merged partial: kept {}, inserted {}, removed {}",
            stats.kept,
            stats.inserted,
            stats.removed
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn runtime(html: &str) -> Runtime {
        let mut rt = Runtime::from_html(html, RuntimeConfig::for_headless()).unwrap();
        rt.hydrate();
        rt
    }

    #[test]
    fn app_root_defaults_to_document() {
        let rt = runtime("<p>x</p>");
        assert_eq!(rt.app_root(), rt.document().root());
        let rt = runtime(r#"<header></header><main id="app"></main>"#);
        assert_eq!(rt.document().attr(rt.app_root(), "id"), Some("app"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = RuntimeConfig {
            app_root: " ".into(),
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            Runtime::from_html("<p></p>", config),
            Err(RuntimeError::Config(_))
        ));
    }

    #[test]
    fn object_values_fan_out() {
        let mut rt = runtime("<p>{{user.name}}</p><input name=\"user.age\">");
        rt.apply_value("user", json!({"name": "Ana", "age": 31}));
        assert_eq!(rt.state().get("user.age"), Some(&json!(31)));
        let p = rt.document().elements_by_tag(rt.app_root(), "p")[0];
        assert_eq!(rt.document().text_content(p), "Ana");
        let input = rt.document().elements_by_tag(rt.app_root(), "input")[0];
        assert_eq!(rt.document().value(input), "31");
    }

    #[test]
    fn attribute_bindings_render() {
        let mut rt = runtime(r#"<i id="h" style="color: {{heartColor}}"></i>"#);
        rt.apply_value("heartColor", json!("red"));
        let h = rt.document().get_element_by_id("h").unwrap();
        assert_eq!(rt.document().attr(h, "style"), Some("color: red"));
    }

    #[test]
    fn namespaced_update_reaches_short_control() {
        let mut rt = runtime(r#"<input name="q">"#);
        rt.apply_value("Search#4.q", json!("rust"));
        let input = rt.document().elements_by_tag(rt.app_root(), "input")[0];
        assert_eq!(rt.document().value(input), "rust");
    }

    #[test]
    fn forbidden_keys_never_apply() {
        let mut rt = runtime("<p>{{a}}</p>");
        rt.apply_value("a.__proto__", json!(1));
        rt.apply_value("constructor", json!(1));
        assert!(rt.state().is_empty());
    }
}
