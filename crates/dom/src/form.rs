//! Form-control state: value, checked and selection, kept apart from markup.

use crate::document::Document;
use crate::node::NodeId;

impl Document {
    pub fn is_form_control(&self, id: NodeId) -> bool {
        self.element(id).is_some_and(|el| el.is_form_control())
    }

    /// Lowercased `type` of an `<input>`; `None` for anything else.
    pub fn input_type(&self, id: NodeId) -> Option<String> {
        self.element(id)
            .filter(|el| el.tag == "input")
            .map(|el| el.input_type())
    }

    pub fn is_checkable(&self, id: NodeId) -> bool {
        matches!(self.input_type(id).as_deref(), Some("checkbox" | "radio"))
    }

    /// Current value of a control.
    ///
    /// Inputs fall back to their `value` attribute, textareas to their text,
    /// selects to the first selected option (or the first option when single).
    pub fn value(&self, id: NodeId) -> String {
        let Some(el) = self.element(id) else {
            return String::new();
        };
        match el.tag.as_str() {
            "select" => self.selected_values(id).into_iter().next().unwrap_or_default(),
            "option" => self.option_value(id),
            "textarea" => el
                .control
                .value
                .clone()
                .unwrap_or_else(|| self.text_content(id)),
            _ => el
                .control
                .value
                .clone()
                .or_else(|| el.attr("value").map(str::to_string))
                .unwrap_or_else(|| {
                    if self.is_checkable(id) {
                        "on".to_string()
                    } else {
                        String::new()
                    }
                }),
        }
    }

    /// Set a control's live value. Returns `true` if anything changed.
    pub fn set_value(&mut self, id: NodeId, value: &str) -> bool {
        if self.has_tag(id, "select") {
            return self.select_value(id, value);
        }
        if self.value(id) == value {
            return false;
        }
        let Some(el) = self.element_mut(id) else {
            return false;
        };
        el.control.value = Some(value.to_string());
        self.touch(id);
        true
    }

    pub fn checked(&self, id: NodeId) -> bool {
        self.element(id).is_some_and(|el| el.control.checked)
    }

    /// Set checked state. Checking a radio unchecks others with the same name
    /// inside the same form (or document).
    pub fn set_checked(&mut self, id: NodeId, checked: bool) -> bool {
        if self.checked(id) == checked {
            return false;
        }
        if checked && self.input_type(id).as_deref() == Some("radio") {
            for other in self.radio_group(id) {
                if other != id {
                    if let Some(el) = self.element_mut(other) {
                        el.control.checked = false;
                    }
                }
            }
        }
        let Some(el) = self.element_mut(id) else {
            return false;
        };
        el.control.checked = checked;
        self.touch(id);
        true
    }

    /// Other radios sharing `id`'s name within the closest form or the document.
    pub fn radio_group(&self, id: NodeId) -> Vec<NodeId> {
        let Some(name) = self.attr(id, "name") else {
            return vec![id];
        };
        let scope = self
            .closest(id, |el| el.tag == "form")
            .unwrap_or_else(|| self.root());
        self.select(scope, |el| {
            el.tag == "input" && el.input_type() == "radio" && el.attr("name") == Some(name)
        })
    }

    pub fn options(&self, select: NodeId) -> Vec<NodeId> {
        self.elements_by_tag(select, "option")
    }

    pub fn option_value(&self, option: NodeId) -> String {
        match self.attr(option, "value") {
            Some(value) => value.to_string(),
            None => self.text_content(option).trim().to_string(),
        }
    }

    pub fn is_multiple(&self, select: NodeId) -> bool {
        self.has_attr(select, "multiple")
    }

    pub fn is_selected(&self, option: NodeId) -> bool {
        self.element(option).is_some_and(|el| el.control.selected)
    }

    /// Values of the selected options, in document order.
    pub fn selected_values(&self, select: NodeId) -> Vec<String> {
        let options = self.options(select);
        let selected: Vec<String> = options
            .iter()
            .filter(|o| self.is_selected(**o))
            .map(|o| self.option_value(*o))
            .collect();
        if selected.is_empty() && !self.is_multiple(select) {
            return options
                .first()
                .map(|o| vec![self.option_value(*o)])
                .unwrap_or_default();
        }
        selected
    }

    pub fn set_selected(&mut self, option: NodeId, selected: bool) -> bool {
        if self.is_selected(option) == selected {
            return false;
        }
        if selected {
            if let Some(select) = self.closest(option, |el| el.tag == "select") {
                if !self.is_multiple(select) {
                    for other in self.options(select) {
                        if let Some(el) = self.element_mut(other) {
                            el.control.selected = false;
                        }
                    }
                }
            }
        }
        let Some(el) = self.element_mut(option) else {
            return false;
        };
        el.control.selected = selected;
        self.touch(option);
        true
    }

    /// Select the option(s) whose value equals `value`.
    fn select_value(&mut self, select: NodeId, value: &str) -> bool {
        if self.value(select) == value && !self.is_multiple(select) {
            return false;
        }
        let mut changed = false;
        for option in self.options(select) {
            let wanted = self.option_value(option) == value;
            changed |= self.set_selected(option, wanted);
        }
        changed
    }

    /// Apply a set of selected values to a multi-select.
    pub fn set_selected_values(&mut self, select: NodeId, values: &[String]) -> bool {
        let mut changed = false;
        for option in self.options(select) {
            let wanted = values.contains(&self.option_value(option));
            if self.is_selected(option) != wanted {
                if let Some(el) = self.element_mut(option) {
                    el.control.selected = wanted;
                    changed = true;
                }
            }
        }
        if changed {
            self.touch(select);
        }
        changed
    }

    /// Seed live control state from markup attributes (`checked`, `selected`).
    pub(crate) fn init_control_state(&mut self, id: NodeId) {
        let Some(el) = self.element_mut(id) else {
            return;
        };
        match el.tag.as_str() {
            "input" => el.control.checked = el.has_attr("checked"),
            "option" => el.control.selected = el.has_attr("selected"),
            _ => {}
        }
    }
}
