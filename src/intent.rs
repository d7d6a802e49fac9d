//! Intent routing: deterministic trigger-phrase classification used to
//! pick a specialist instruction variant.

use crate::config::InstructionsConfig;

/// Message intents. Each maps to a fixed specialist instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Builder,
    Entertainment,
    Shopping,
    Scheduling,
    Health,
    Work,
    Personal,
    General,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Builder => "builder",
            Self::Entertainment => "entertainment",
            Self::Shopping => "shopping",
            Self::Scheduling => "scheduling",
            Self::Health => "health",
            Self::Work => "work",
            Self::Personal => "personal",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered trigger table. Order matters: phrase sets are not disjoint
/// ("show" appears in everyday text too), so earlier rows win. The
/// entertainment bucket is intentionally broad.
const TRIGGERS: &[(Intent, &[&str])] = &[
    (
        Intent::Builder,
        &["build me", "build a", "create an app", "create a site", "make me a", "scaffold"],
    ),
    (
        Intent::Entertainment,
        &["watch", "show", "movie", "series", "listen", "playlist", "game", "stream"],
    ),
    (
        Intent::Shopping,
        &["buy", "order", "shopping", "purchase", "groceries", "wishlist"],
    ),
    (
        Intent::Scheduling,
        &["remind", "schedule", "calendar", "appointment", "meeting at", "tomorrow at"],
    ),
    (
        Intent::Health,
        &["workout", "exercise", "doctor", "medication", "sleep", "calories"],
    ),
    (
        Intent::Work,
        &["deadline", "standup", "project", "email to", "report", "invoice"],
    ),
    (
        Intent::Personal,
        &["my family", "my friend", "birthday", "anniversary"],
    ),
];

/// Default specialist instruction per intent, used when config doesn't
/// override it.
fn default_instruction(intent: Intent) -> &'static str {
    match intent {
        Intent::Builder => {
            "The user wants something built. Break the request into concrete \
             steps and drive the build tools toward a working result."
        }
        Intent::Entertainment => {
            "The user is asking about entertainment. Recommend concretely, \
             using their watchlist and past preferences from memory."
        }
        Intent::Shopping => {
            "The user is shopping. Track items on their shopping list and be \
             specific about products and quantities."
        }
        Intent::Scheduling => {
            "The user is scheduling something. Pin down exact dates and times \
             and use the scheduling tools to make it stick."
        }
        Intent::Health => {
            "The user is asking about health. Be careful and factual; suggest \
             a professional for anything serious."
        }
        Intent::Work => {
            "The user is asking about work. Be brief, structured, and \
             action-oriented."
        }
        Intent::Personal => {
            "The user is sharing something personal. Remember the details \
             that matter and respond warmly."
        }
        Intent::General => "Answer helpfully and use tools when they help.",
    }
}

/// Routed result: the matched intent plus its specialist instruction.
#[derive(Debug, Clone)]
pub struct RoutedIntent {
    pub intent: Intent,
    pub instruction: String,
}

/// Deterministic intent router over the ordered trigger table.
#[derive(Debug, Clone)]
pub struct IntentRouter {
    instructions: InstructionsConfig,
}

impl IntentRouter {
    pub fn new(instructions: InstructionsConfig) -> Self {
        Self { instructions }
    }

    /// Case-insensitive substring match; first intent with a matching
    /// phrase wins; no match falls back to `general`.
    pub fn route(&self, message: &str) -> RoutedIntent {
        let lowered = message.to_lowercase();

        let intent = TRIGGERS
            .iter()
            .find(|(_, phrases)| phrases.iter().any(|phrase| lowered.contains(phrase)))
            .map(|(intent, _)| *intent)
            .unwrap_or(Intent::General);

        RoutedIntent {
            intent,
            instruction: self.instruction_for(intent),
        }
    }

    /// Specialist instruction lookup: config override, else the built-in
    /// default. Unrecognized intents receive the general instruction.
    pub fn instruction_for(&self, intent: Intent) -> String {
        self.instructions
            .specialist
            .get(intent.as_str())
            .cloned()
            .unwrap_or_else(|| default_instruction(intent).to_string())
    }

    pub fn base_instructions(&self) -> &str {
        &self.instructions.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> IntentRouter {
        IntentRouter::new(InstructionsConfig::default())
    }

    #[test]
    fn routes_builder_before_entertainment() {
        // "Build me a blog" would also be caught by no entertainment phrase,
        // but "show" overlaps; the table order keeps builder first.
        let routed = router().route("Build me a blog about gardening tips");
        assert_eq!(routed.intent, Intent::Builder);
    }

    #[test]
    fn routes_entertainment() {
        let routed = router().route("What shows should I watch tonight?");
        assert_eq!(routed.intent, Intent::Entertainment);
    }

    #[test]
    fn falls_back_to_general() {
        let routed = router().route("hello");
        assert_eq!(routed.intent, Intent::General);
    }

    #[test]
    fn match_is_case_insensitive() {
        let routed = router().route("REMIND me to stretch");
        assert_eq!(routed.intent, Intent::Scheduling);
    }

    #[test]
    fn config_overrides_specialist_instruction() {
        let mut instructions = InstructionsConfig::default();
        instructions
            .specialist
            .insert("shopping".into(), "custom shopping prompt".into());
        let router = IntentRouter::new(instructions);

        let routed = router.route("add milk to my shopping list");
        assert_eq!(routed.intent, Intent::Shopping);
        assert_eq!(routed.instruction, "custom shopping prompt");
    }
}
