/// Model parameter selection
///
/// Non-reasoning models take sampling parameters (temperature/top-p);
/// reasoning models take an effort level instead. The two sets are
/// mutually exclusive and picked by model identifier.
use serde::{Deserialize, Serialize};

/// Effort level for reasoning models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

/// Mutually exclusive model parameter sets
#[derive(Debug, Clone, PartialEq)]
pub enum ModelParams {
    /// Sampling controls for non-reasoning models
    Sampling { temperature: f32, top_p: f32 },
    /// Effort level for reasoning models
    Reasoning { effort: ReasoningEffort },
}

/// Model id prefixes that select the reasoning parameter set
const REASONING_PREFIXES: &[&str] = &["o1", "o3", "o4"];

impl ModelParams {
    /// Whether the model identifier names a reasoning model
    pub fn is_reasoning_model(model: &str) -> bool {
        REASONING_PREFIXES
            .iter()
            .any(|prefix| model.starts_with(prefix))
    }

    /// Default parameter set for a model identifier
    pub fn for_model(model: &str) -> Self {
        if Self::is_reasoning_model(model) {
            ModelParams::Reasoning {
                effort: ReasoningEffort::Medium,
            }
        } else {
            ModelParams::Sampling {
                temperature: 0.7,
                top_p: 1.0,
            }
        }
    }

    /// Merge this parameter set into a request body
    pub fn apply(&self, body: &mut serde_json::Map<String, serde_json::Value>) {
        match self {
            ModelParams::Sampling { temperature, top_p } => {
                body.insert("temperature".to_string(), serde_json::json!(temperature));
                body.insert("top_p".to_string(), serde_json::json!(top_p));
            }
            ModelParams::Reasoning { effort } => {
                body.insert(
                    "reasoning_effort".to_string(),
                    serde_json::to_value(effort).unwrap_or_default(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_family_selection() {
        assert!(ModelParams::is_reasoning_model("o1-mini"));
        assert!(ModelParams::is_reasoning_model("o3"));
        assert!(!ModelParams::is_reasoning_model("gpt-4o-mini"));

        assert!(matches!(
            ModelParams::for_model("o1-preview"),
            ModelParams::Reasoning { .. }
        ));
        assert!(matches!(
            ModelParams::for_model("gpt-4o"),
            ModelParams::Sampling { .. }
        ));
    }

    #[test]
    fn test_parameter_sets_are_exclusive_on_the_wire() {
        let mut body = serde_json::Map::new();
        ModelParams::for_model("gpt-4o").apply(&mut body);
        assert!(body.contains_key("temperature"));
        assert!(body.contains_key("top_p"));
        assert!(!body.contains_key("reasoning_effort"));

        let mut body = serde_json::Map::new();
        ModelParams::for_model("o3-mini").apply(&mut body);
        assert!(!body.contains_key("temperature"));
        assert!(!body.contains_key("top_p"));
        assert_eq!(body["reasoning_effort"], "medium");
    }
}
