//! Evaluation settings

use odata_linq_diagnostics::{ODL0401, ODL0402, QueryError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options controlling in-memory evaluation of URIs
///
/// ```
/// # use odata_linq_eval::EvaluationSettings;
/// let settings = EvaluationSettings::from_json(r#"{"default_page_size": 50}"#)?;
/// assert!(settings.apply_paging);
/// assert_eq!(settings.default_page_size, Some(50));
/// # Ok::<(), odata_linq_diagnostics::QueryError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationSettings {
    /// Hide members that `$select`/`$expand` did not ask for
    #[serde(default = "default_true")]
    pub apply_select_expand: bool,
    /// Emulate server-driven paging for entity set results
    #[serde(default = "default_true")]
    pub apply_paging: bool,
    /// Page size for entity sets without one in the schema
    #[serde(default)]
    pub default_page_size: Option<u32>,
    /// Maximum expression nesting during resolution and evaluation
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            apply_select_expand: default_true(),
            apply_paging: default_true(),
            default_page_size: None,
            max_depth: default_max_depth(),
        }
    }
}

impl EvaluationSettings {
    /// Parse settings from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| QueryError::system(ODL0402, format!("Invalid evaluation settings: {e}")))
    }

    /// Load settings from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| QueryError::system(ODL0401, format!("{}: {e}", path.display())))?;
        Self::from_json(&content)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    256
}
