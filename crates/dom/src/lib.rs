//! # JRX DOM
//!
//! In-process document model the reactive runtime mutates. It stands in for a
//! browser DOM: arena-allocated nodes addressed by [`NodeId`], live form-control
//! state, focus, `<template>` content fragments and a journal of subtrees
//! entering or leaving the live tree.
//!
//! ```text
//! html ──> parse_fragment[_in_context] ──> Fragment ──> insert_before ──> live tree
//!                                                            │
//!                                     mutation_count ◄───────┤
//!                                     take_mutations ◄───────┘ (Inserted / Removed)
//!
//! partial html ──> parse_fragment ──> merge_children(app_root, fragment)
//! live tree ──> inner_html / outer_html
//! ```

mod document;
mod error;
mod form;
pub mod html;
pub mod morph;
mod node;
pub mod serialize;

pub use document::{Document, Mutation};
pub use error::{DomError, Result};
pub use html::{parse_document, parse_fragment, parse_fragment_in_context};
pub use morph::{merge_children, MergeStats};
pub use node::{is_void, ControlState, Element, NodeId, NodeKind};
pub use serialize::{escape_attr, escape_text, inner_html, outer_html};
