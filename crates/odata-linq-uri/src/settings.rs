use serde::{Deserialize, Serialize};

/// Options controlling URI rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UriBuilderSettings {
    /// Percent-escape rendered literals
    #[serde(default = "default_escape_literals")]
    pub escape_literals: bool,
    /// Value emitted for `$inlinecount`
    #[serde(default = "default_inline_count_keyword")]
    pub inline_count_keyword: String,
}

impl Default for UriBuilderSettings {
    fn default() -> Self {
        Self {
            escape_literals: default_escape_literals(),
            inline_count_keyword: default_inline_count_keyword(),
        }
    }
}

fn default_escape_literals() -> bool {
    true
}

fn default_inline_count_keyword() -> String {
    "allpages".to_string()
}
