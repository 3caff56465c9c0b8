use serde::{Deserialize, Serialize};

/// A named, pre-registered ordered list of stages — the only permitted plan
/// shapes (§3 DAG template, §GLOSSARY).
///
/// `selection` is stored as a small predicate DSL rather than executable
/// code so templates can be hydrated from the archive (§4.C) without
/// deserializing closures: each clause tests one intent signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DagTemplate {
    pub name: String,
    pub stages: Vec<String>,
    #[serde(default)]
    pub selection: Vec<SelectionClause>,
}

/// One clause of a template's selection predicate, matched against
/// intent-analysis signals (§3, §4.C).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SelectionClause {
    NeedsWeb { equals: bool },
    Complexity { at_least: u8 },
}

impl DagTemplate {
    pub fn new(name: impl Into<String>, stages: Vec<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            stages: stages.into_iter().map(Into::into).collect(),
            selection: Vec::new(),
        }
    }

    pub fn with_selection(mut self, clauses: Vec<SelectionClause>) -> Self {
        self.selection = clauses;
        self
    }

    /// Does this template's selection predicate match the given signals?
    /// An empty predicate list never matches (it is not a wildcard) —
    /// the `standard` fallback is the only template chosen without a
    /// satisfied predicate (§4.C tie-break rule).
    pub fn matches(&self, needs_web: bool, complexity: u8) -> bool {
        if self.selection.is_empty() {
            return false;
        }
        self.selection.iter().all(|clause| match clause {
            SelectionClause::NeedsWeb { equals } => needs_web == *equals,
            SelectionClause::Complexity { at_least } => complexity >= *at_least,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_with_no_selection_never_matches() {
        let template = DagTemplate::new("standard", vec!["intent", "retrieval"]);
        assert!(!template.matches(true, 5));
    }

    #[test]
    fn needs_web_clause_matches_only_when_signal_present() {
        let template = DagTemplate::new("web_augmented", vec!["intent", "web_augmentation"])
            .with_selection(vec![SelectionClause::NeedsWeb { equals: true }]);
        assert!(template.matches(true, 0));
        assert!(!template.matches(false, 0));
    }

    #[test]
    fn multiple_clauses_require_all_to_match() {
        let template = DagTemplate::new("reasoning_heavy", vec!["intent", "reasoning"])
            .with_selection(vec![
                SelectionClause::NeedsWeb { equals: false },
                SelectionClause::Complexity { at_least: 3 },
            ]);
        assert!(template.matches(false, 4));
        assert!(!template.matches(false, 2));
        assert!(!template.matches(true, 4));
    }
}
