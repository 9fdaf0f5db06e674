//! `client:mount` / `client:unmount` lifecycle hooks.
//!
//! Attributes name callbacks registered up front (`client:mount="initChart"`
//! or `client:mount="initChart(this)"`; the argument list is ignored and the
//! element is passed). Hooks fire from the document's insert/remove journal.

use crate::runtime::Runtime;
use indexmap::IndexMap;
use jrx_dom::{Document, Mutation, NodeId};
use std::collections::HashMap;
use std::fmt;

pub const MOUNT_ATTR: &str = "client:mount";
pub const UNMOUNT_ATTR: &str = "client:unmount";

pub type HookFn = Box<dyn FnMut(&Document, NodeId) + Send>;

#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<String, HookFn>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.hooks.keys().collect();
        names.sort();
        f.debug_struct("HookRegistry").field("hooks", &names).finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        hook: impl FnMut(&Document, NodeId) + Send + 'static,
    ) {
        self.hooks.insert(name.into(), Box::new(hook));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run the hook an attribute value names. Unknown names are logged.
    fn invoke(&mut self, attr_value: &str, doc: &Document, node: NodeId) -> bool {
        let Some(name) = hook_name(attr_value) else {
            log::warn!("Ignoring malformed hook attribute {attr_value:?}");
            return false;
        };
        match self.hooks.get_mut(name) {
            Some(hook) => {
                hook(doc, node);
                true
            }
            None => {
                log::warn!("No hook registered under {name:?}");
                false
            }
        }
    }
}

/// Hook name an attribute value refers to: `name` or `name(...)`.
pub fn hook_name(value: &str) -> Option<&str> {
    let value = value.trim();
    let name = match value.find('(') {
        Some(open) => value[..open].trim_end(),
        None => value,
    };
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '.' | '-'));
    valid.then_some(name)
}

impl Runtime {
    /// Drain the mutation journal and fire mount/unmount hooks.
    ///
    /// Only a node's net change counts: a subtree that was moved, or inserted
    /// and removed again within one drain, fires nothing.
    ///
    /// Nodes that stay detached afterwards are released.
    pub fn flush_hooks(&mut self) -> usize {
        let journal = self.doc.take_mutations();
        let fired = if journal.is_empty() || self.hooks.is_empty() {
            0
        } else {
            self.fire_hooks(journal)
        };
        self.collect_garbage();
        fired
    }

    fn fire_hooks(&mut self, journal: Vec<Mutation>) -> usize {
        let mut first_seen: IndexMap<NodeId, bool> = IndexMap::new();
        for mutation in journal {
            match mutation {
                Mutation::Inserted(node) => {
                    first_seen.entry(node).or_insert(true);
                }
                Mutation::Removed(node) => {
                    first_seen.entry(node).or_insert(false);
                }
            }
        }

        let mut fired = 0;
        for (node, inserted) in first_seen {
            let connected = self.doc.is_connected(node);
            let attr = match (inserted, connected) {
                (true, true) => MOUNT_ATTR,
                (false, false) => UNMOUNT_ATTR,
                _ => continue,
            };
            for element in self.doc.descendants_inclusive(node) {
                let Some(value) = self.doc.attr(element, attr) else {
                    continue;
                };
                let value = value.to_string();
                if self.hooks.invoke(&value, &self.doc, element) {
                    fired += 1;
                }
            }
        }
        fired
    }
}
