//! Event dispatch: outbound control edits, call preparation with optimistic
//! updates, and call completion with rollback and validation decorations.
//!
//! ```text
//! handle_event ──> EventOutcome { edit: {k,v}?, calls: [CallTrigger] }
//!                                                  │ (host applies debounce)
//! prepare_call ──> clear errors ──> optimistic script ──> build args ──> PreparedCall
//!                                                  │ (host issues the RPC)
//! complete_call ──> rollback? ──> validation errors ──> jrx:call + jrx:success|jrx:error
//! ```

use crate::bindings::{control_value, ControlKind};
use crate::directives::{directive_for, EventKind};
use crate::optimistic::{Script, ScriptState};
use crate::path::resolve;
use crate::runtime::Runtime;
use crate::store::StateStore;
use indexmap::IndexMap;
use jrx_dom::NodeId;
use jrx_protocol::{CallRequest, CallResult, OutboundSet, Violation};
use serde_json::Value;
use std::time::Duration;

pub const OPTIMISTIC_ATTR: &str = "data-optimistic";
pub const ERROR_MARKER: &str = "data-jrx-error";

/// Lifecycle notification for external listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Fired for every completed call
    Call {
        element: NodeId,
        qualified: String,
        ok: bool,
    },
    Success {
        element: NodeId,
        qualified: String,
        payload: Value,
    },
    Error {
        element: NodeId,
        qualified: String,
        code: Option<String>,
        error: Option<String>,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Call { .. } => "jrx:call",
            Self::Success { .. } => "jrx:success",
            Self::Error { .. } => "jrx:error",
        }
    }
}

/// Transient user notification queued when a call fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub message: String,
}

/// A call a DOM event asks for. `debounce` is set for `input` events while the
/// realtime channel is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTrigger {
    pub element: NodeId,
    pub event: EventKind,
    pub debounce: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventOutcome {
    pub prevent_default: bool,
    /// Value edit to send for a bound control
    pub edit: Option<OutboundSet>,
    /// Calls, innermost element first
    pub calls: Vec<CallTrigger>,
}

/// A call ready to be sent. Holds what completion needs to roll back.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    pub id: u64,
    pub element: NodeId,
    pub event: EventKind,
    pub qualified: String,
    pub args: Vec<Value>,
    rollback: Vec<(String, Option<Value>)>,
}

impl PreparedCall {
    pub fn request(&self) -> CallRequest {
        CallRequest {
            args: self.args.clone(),
        }
    }

    pub fn is_optimistic(&self) -> bool {
        !self.rollback.is_empty()
    }

    /// Keys written by the optimistic script.
    pub fn optimistic_keys(&self) -> impl Iterator<Item = &str> {
        self.rollback.iter().map(|(key, _)| key.as_str())
    }
}

/// State view an optimistic script runs against. Remembers the value each
/// real key had before its first write.
struct OptimisticState<'a> {
    store: &'a mut StateStore,
    rollback: IndexMap<String, Option<Value>>,
}

impl ScriptState for OptimisticState<'_> {
    fn read(&self, path: &str) -> Value {
        let key = self.store.real_key(path);
        match self.store.get(&key) {
            Some(value) => value.clone(),
            None => resolve(path, self.store.values()),
        }
    }

    fn write(&mut self, path: &str, value: Value) {
        let key = self.store.real_key(path);
        if !self.rollback.contains_key(&key) {
            let prior = self.store.get(&key).cloned();
            self.rollback.insert(key.clone(), prior);
        }
        self.store.set(&key, value);
    }
}

impl Runtime {
    /// Route a DOM event on `target`. Bound controls produce an outbound edit;
    /// hydrated calls on the target and its ancestors produce call triggers.
    pub fn handle_event(&mut self, target: NodeId, kind: EventKind) -> EventOutcome {
        let mut outcome = EventOutcome::default();

        if let Some(key) = self.bindings.listener_key(target).map(str::to_string) {
            if let Some(control) = ControlKind::of(&self.doc, target) {
                let fires = match kind {
                    EventKind::Change => control.is_checkable(),
                    EventKind::Input => !control.is_checkable(),
                    _ => false,
                };
                if fires {
                    self.store.record_edit(&key);
                    outcome.edit = Some(OutboundSet::new(key, control_value(&self.doc, target)));
                }
            }
        }

        let file_click = kind == EventKind::Click
            && self.doc.has_tag(target, "input")
            && self.doc.input_type(target).as_deref() == Some("file");
        let debounce = (kind == EventKind::Input
            && !self.realtime
            && self.config.input_debounce_ms > 0)
            .then(|| self.config.input_debounce());

        for node in self.doc.ancestors_inclusive(target) {
            let bound = self
                .listeners
                .get(&node)
                .is_some_and(|events| events.contains(&kind));
            if !bound {
                continue;
            }
            if !file_click {
                outcome.prevent_default = true;
            }
            outcome.calls.push(CallTrigger {
                element: node,
                event: kind,
                debounce,
            });
        }
        outcome
    }

    /// Prepare the call `element` carries for `event`: clear old validation
    /// errors, run the optimistic script, build arguments.
    pub fn prepare_call(&mut self, element: NodeId, event: EventKind) -> Option<PreparedCall> {
        if !self.doc.is_connected(element) {
            log::debug!("Skipping call from detached element");
            return None;
        }
        let directive = directive_for(&self.doc, element, event)?;
        self.clear_validation_errors();
        let rollback = self.run_optimistic(element);
        let args = self.build_args(&directive.args, element);
        self.next_call_id += 1;
        log::debug!("Prepared call #{} {}", self.next_call_id, directive.qualified);
        Some(PreparedCall {
            id: self.next_call_id,
            element,
            event,
            qualified: directive.qualified,
            args,
            rollback,
        })
    }

    fn run_optimistic(&mut self, element: NodeId) -> Vec<(String, Option<Value>)> {
        let Some(source) = self.doc.attr(element, OPTIMISTIC_ATTR).map(str::to_string) else {
            return Vec::new();
        };
        let script = match Script::parse(&source) {
            Ok(script) => script,
            Err(e) => {
                log::warn!("Ignoring optimistic script: {e}");
                return Vec::new();
            }
        };
        let mut state = OptimisticState {
            store: &mut self.store,
            rollback: IndexMap::new(),
        };
        script.run(&mut state);
        let rollback: Vec<(String, Option<Value>)> = state.rollback.into_iter().collect();

        for (key, _) in &rollback {
            self.store.mark_in_flight(key);
        }
        self.reconcile();
        for (key, _) in &rollback {
            let value = self.store.get(key).cloned().unwrap_or(Value::Null);
            self.push_key(key, &value);
        }
        self.flush_hooks();
        rollback
    }

    /// Finish a call: roll back optimistic writes on failure, release in-flight
    /// keys, decorate validation errors and queue lifecycle events.
    pub fn complete_call(&mut self, call: PreparedCall, result: &CallResult) {
        if !result.ok && !call.rollback.is_empty() {
            log::debug!("Rolling back {} optimistic keys", call.rollback.len());
            for (key, prior) in &call.rollback {
                match prior {
                    Some(value) => {
                        self.store.set(key, value.clone());
                    }
                    None => {
                        self.store.remove(key);
                    }
                }
            }
        }
        for (key, _) in &call.rollback {
            self.store.clear_in_flight(key);
        }
        if !result.ok && !call.rollback.is_empty() {
            self.reconcile();
            for (key, _) in &call.rollback {
                let value = resolve(key, self.store.values());
                self.push_key(key, &value);
            }
        }

        if result.is_validation() {
            self.render_validation_errors(&result.violations);
        }

        self.events.push(LifecycleEvent::Call {
            element: call.element,
            qualified: call.qualified.clone(),
            ok: result.ok,
        });
        if result.ok {
            self.events.push(LifecycleEvent::Success {
                element: call.element,
                qualified: call.qualified,
                payload: result.payload.clone(),
            });
        } else {
            log::warn!(
                "Call {} failed: {}",
                call.qualified,
                result.error.as_deref().unwrap_or("unknown error")
            );
            self.events.push(LifecycleEvent::Error {
                element: call.element,
                qualified: call.qualified,
                code: result.code.clone(),
                error: result.error.clone(),
            });
            if self.config.toast_on_error {
                self.toasts.push(Toast {
                    message: result
                        .error
                        .clone()
                        .unwrap_or_else(|| "Request failed".to_string()),
                });
            }
        }
        self.flush_hooks();
    }

    /// Mark each violating control and insert its message right after it.
    pub fn render_validation_errors(&mut self, violations: &[Violation]) {
        let invalid_class = self.config.invalid_class.clone();
        let error_class = self.config.error_class.clone();
        for violation in violations {
            let field = violation.field();
            let suffix = format!(".{field}");
            let controls = self.doc.select(self.root, |el| {
                el.is_form_control()
                    && el
                        .attr("name")
                        .is_some_and(|name| name == field || name.ends_with(&suffix))
            });
            if controls.is_empty() {
                log::debug!("No control for violation on {field:?}");
            }
            for control in controls {
                let message = self.doc.create_element("div");
                let text = self.doc.create_text(violation.message.as_str());
                let decorated = self
                    .doc
                    .add_class(control, &invalid_class)
                    .and_then(|()| self.doc.set_attr(control, "aria-invalid", "true"))
                    .and_then(|()| self.doc.set_attr(message, "class", &error_class))
                    .and_then(|()| self.doc.set_attr(message, ERROR_MARKER, field))
                    .and_then(|()| self.doc.append_child(message, text))
                    .and_then(|()| self.doc.insert_after(control, message));
                if let Err(e) = decorated {
                    log::warn!("Cannot decorate invalid field {field:?}: {e}");
                }
            }
        }
    }

    /// Remove every validation decoration under the app root.
    pub fn clear_validation_errors(&mut self) {
        for marker in self.doc.select(self.root, |el| el.has_attr(ERROR_MARKER)) {
            self.doc.detach(marker);
        }
        let invalid_class = self.config.invalid_class.clone();
        for control in self.doc.select(self.root, |el| el.has_attr("aria-invalid")) {
            self.doc.remove_attr(control, "aria-invalid");
            if let Err(e) = self.doc.remove_class(control, &invalid_class) {
                log::debug!("Cannot clear invalid class: {e}");
            }
        }
    }
}
