use super::visual::VisualGraph;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    pub nodes_valid: bool,
    pub edges_valid: bool,
}

impl Validity {
    /// Every node needs a title and a body; every edge needs choice text.
    /// Empty sets pass.
    pub fn of(graph: &VisualGraph) -> Self {
        let nodes_valid = graph
            .nodes
            .iter()
            .all(|n| !n.title.is_empty() && !n.body.is_empty());
        let edges_valid = graph.edges.iter().all(|e| !e.label.is_empty());
        Self { nodes_valid, edges_valid }
    }

    pub fn save_eligible(&self) -> bool { self.nodes_valid && self.edges_valid }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SaveButton {
    Saving,
    CannotSave,
    SaveDirty,
    Save,
}

impl SaveButton {
    pub fn label(self) -> &'static str {
        match self {
            SaveButton::Saving => "Saving...",
            SaveButton::CannotSave => "Cannot save",
            SaveButton::SaveDirty => "Save *",
            SaveButton::Save => "Save",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SaveGate {
    pub validity: Validity,
    pub dirty: bool,
    pub saving: bool,
}

impl SaveGate {
    pub fn enabled(&self) -> bool {
        self.validity.save_eligible() && self.dirty && !self.saving
    }

    pub fn button(&self) -> SaveButton {
        if self.saving {
            SaveButton::Saving
        } else if !self.validity.save_eligible() {
            SaveButton::CannotSave
        } else if self.dirty {
            SaveButton::SaveDirty
        } else {
            SaveButton::Save
        }
    }
}
