//! Intent-to-model routing: a pure offline lookup, no network calls.

use crate::config::{LlmConfig, ModelRef};
use crate::intent::Intent;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ModelRouter {
    default: ModelRef,
    overrides: HashMap<String, ModelRef>,
}

impl ModelRouter {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            default: ModelRef {
                provider: config.provider.clone(),
                model: config.model.clone(),
            },
            overrides: config.intent_overrides.clone(),
        }
    }

    /// Per-intent override if configured, else the global default.
    pub fn resolve(&self, intent: Intent) -> ModelRef {
        self.overrides
            .get(intent.as_str())
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn default_model(&self) -> &ModelRef {
        &self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ModelRouter {
        let mut config = LlmConfig::default();
        config.intent_overrides.insert(
            "builder".to_string(),
            ModelRef {
                provider: "anthropic".to_string(),
                model: "claude-sonnet-4".to_string(),
            },
        );
        ModelRouter::from_config(&config)
    }

    #[test]
    fn override_wins_for_its_intent() {
        let resolved = router().resolve(Intent::Builder);
        assert_eq!(resolved.provider, "anthropic");
        assert_eq!(resolved.model, "claude-sonnet-4");
    }

    #[test]
    fn other_intents_fall_back_to_default() {
        let resolved = router().resolve(Intent::General);
        assert_eq!(resolved.provider, "openai");
        assert_eq!(resolved.model, "gpt-4o");
    }
}
