//! Label selectors
//!
//! Labels are the engine's ownership model: every object a workflow creates
//! carries its `workflow` label, so discovery and cleanup are pure functions
//! of (namespace, selector), with no client-side registry of created objects.

use std::collections::{BTreeMap, BTreeSet};

/// Label carrying the owning workflow's name.
pub const WORKFLOW_LABEL: &str = "workflow";
/// Label carrying the stage name.
pub const STAGE_LABEL: &str = "stage";
/// Label carrying the step name.
pub const STEP_LABEL: &str = "step";
/// Pod selector label for service steps (`app=<step>`).
pub const APP_LABEL: &str = "app";

/// An equality + existence label selector with a deterministic rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    eq: BTreeMap<String, String>,
    exists: BTreeSet<String>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    /// All objects owned by one workflow.
    pub fn workflow(name: &str) -> Self {
        Self::new().eq(WORKFLOW_LABEL, name)
    }

    /// All workflow-owned objects, regardless of which workflow.
    pub fn any_workflow() -> Self {
        Self::new().exists(WORKFLOW_LABEL)
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.eq.insert(key.into(), value.into());
        self
    }

    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.exists.insert(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.eq.is_empty() && self.exists.is_empty()
    }

    /// Render as a Kubernetes label-selector query string.
    pub fn to_query(&self) -> String {
        let mut parts: Vec<String> = self
            .eq
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        parts.extend(self.exists.iter().map(|k| k.clone()));
        parts.join(",")
    }

    /// Evaluate the selector against an object's labels.
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let empty = BTreeMap::new();
        let labels = labels.unwrap_or(&empty);
        self.eq.iter().all(|(k, v)| labels.get(k) == Some(v))
            && self.exists.iter().all(|k| labels.contains_key(k))
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_query())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_rendering_is_sorted() {
        let selector = Selector::workflow("wf").eq(STEP_LABEL, "api").eq(STAGE_LABEL, "serve");
        assert_eq!(selector.to_query(), "stage=serve,step=api,workflow=wf");
    }

    #[test]
    fn test_exists_rendering() {
        assert_eq!(Selector::any_workflow().to_query(), "workflow");
    }

    #[test]
    fn test_matches() {
        let labels = BTreeMap::from([
            ("workflow".to_string(), "wf".to_string()),
            ("stage".to_string(), "train".to_string()),
        ]);
        assert!(Selector::workflow("wf").matches(Some(&labels)));
        assert!(Selector::any_workflow().matches(Some(&labels)));
        assert!(!Selector::workflow("other").matches(Some(&labels)));
        assert!(!Selector::workflow("wf").matches(None));
        assert!(Selector::new().matches(None));
    }
}
