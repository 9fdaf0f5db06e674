//! # JRX Runtime
//!
//! Reactive core of the JRX client. Keeps a server-rendered document in sync
//! with a flat state map: placeholders and form controls are indexed by the
//! state keys they depend on, `<template>` blocks are mounted and reconciled,
//! structural deltas are replayed in place, and event directives become
//! server calls with optimistic updates.
//!
//! ```text
//! inbound batch ──> apply_value / apply_delta ──> StateStore
//!                                                    │
//!                         ┌──────────────────────────┤
//!                         ▼                          ▼
//!              update_if_blocks / update_each_blocks    push_key ──> BindingIndex
//!                         │                                            │
//!                         └──────────────> Document <───────────────────┘
//!
//! DOM event ──> handle_event ──> prepare_call (optimistic) ──> host RPC
//!                                                               │
//!                                            complete_call <────┘ (rollback, errors)
//! ```

mod args;
pub mod bindings;
pub mod components;
pub mod conditional;
mod config;
pub mod delta;
pub mod directives;
mod dispatch;
pub mod each;
mod error;
pub mod hooks;
pub mod optimistic;
pub mod path;
mod runtime;
pub mod scope;
mod store;

pub use args::{parse_literal, set_nested_property};
pub use bindings::{control_value, Binding, BindingIndex, ControlKind};
pub use components::{ComponentDef, ComponentRegistry};
pub use conditional::{evaluate, parse_condition, Condition};
pub use config::RuntimeConfig;
pub use directives::{parse_directive, CallDirective, EventKind};
pub use dispatch::{CallTrigger, EventOutcome, LifecycleEvent, PreparedCall, Toast};
pub use each::{EachBlock, EachEntry};
pub use error::{Result, RuntimeError};
pub use hooks::HookRegistry;
pub use path::{display, escape_html, resolve, resolve_escaped, truthy, StateMap};
pub use runtime::Runtime;
pub use scope::Scope;
pub use store::StateStore;
