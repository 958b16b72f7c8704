use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Variable bindings handed to template rendering. Values are opaque
/// scalars; the dispatcher only ever reads `hostnamePrefix` as a string.
pub type Params = serde_json::Map<String, Value>;

/// A named boot template plus its default variable bindings and optional
/// overlay environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub params: Params,
}

impl Recipe {
    pub fn new(name: impl Into<String>) -> Self {
        Recipe {
            name: name.into(),
            environment: String::new(),
            params: Params::new(),
        }
    }
}
