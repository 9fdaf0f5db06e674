/// Handle to a node inside one [`crate::Document`] arena.
///
/// Slots released by [`crate::Document::collect_garbage`] are reused under a
/// new generation. A handle that outlives its node reads as an empty detached
/// node and never aliases the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    pub fn index(self) -> usize {
        self.slot as usize
    }
}

/// Elements whose start tag never has a matching end tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Elements whose content is raw text up to the matching end tag.
pub const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Document,
    Fragment,
    Element(Element),
    Text(String),
    Comment(String),
}

impl NodeKind {
    pub fn is_element(&self) -> bool {
        matches!(self, Self::Element(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    pub fn can_have_children(&self) -> bool {
        match self {
            Self::Document | Self::Fragment => true,
            Self::Element(el) => !is_void(&el.tag),
            Self::Text(_) | Self::Comment(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    /// Lowercased tag name.
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    /// Content fragment of a `<template>`.
    pub content: Option<NodeId>,
    pub control: ControlState,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            content: None,
            control: ControlState::default(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(n, _)| n == name)
    }

    pub fn is_template(&self) -> bool {
        self.tag == "template"
    }

    pub fn is_form_control(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea" | "select")
    }

    /// `type` of an `<input>`, lowercased, defaulting to `text`.
    pub fn input_type(&self) -> String {
        self.attr("type")
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "text".to_string())
    }
}

/// Live state of a form control, detached from its markup attributes the way a
/// browser keeps `value`/`checked`/`selected` properties apart from the HTML.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlState {
    pub value: Option<String>,
    pub checked: bool,
    pub selected: bool,
}
