/// AI mode state machine and routing table.
///
/// The active mode decides what happens to the next piece of text: typed by
/// the user or produced by the model. Switching modes is immediate and never
/// touches decisions that were already made.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiMode {
    #[default]
    Disabled,
    Auto,
    Dispatch,
    Command,
    Code,
}

impl AiMode {
    pub const ALL: [AiMode; 5] = [
        AiMode::Disabled,
        AiMode::Auto,
        AiMode::Dispatch,
        AiMode::Command,
        AiMode::Code,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AiMode::Disabled => "disabled",
            AiMode::Auto => "auto",
            AiMode::Dispatch => "dispatch",
            AiMode::Command => "command",
            AiMode::Code => "code",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "disabled" | "off" => Some(AiMode::Disabled),
            "auto" => Some(AiMode::Auto),
            "dispatch" => Some(AiMode::Dispatch),
            "command" => Some(AiMode::Command),
            "code" => Some(AiMode::Code),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AiMode::Disabled => "AI off",
            AiMode::Auto => "Auto-suggest",
            AiMode::Dispatch => "Dispatch",
            AiMode::Command => "Command (gated)",
            AiMode::Code => "Code",
        }
    }

    /// Cycle to the next mode in enumeration order.
    pub fn next(&self) -> Self {
        let idx = Self::ALL.iter().position(|m| m == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    /// How suggestions produced under this mode should be presented.
    pub fn suggestion_kind(&self) -> SuggestionKind {
        match self {
            AiMode::Code => SuggestionKind::Code,
            _ => SuggestionKind::Command,
        }
    }
}

impl std::fmt::Display for AiMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a piece of text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    Model,
}

impl Origin {
    pub fn is_ai(&self) -> bool {
        matches!(self, Origin::Model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    ExecuteDirect,
    ExecuteGated,
    SuggestOnly,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionKind {
    /// A shell command the user may run themselves
    Command,
    /// A code snippet; never executed
    Code,
}

/// The routing table. Pure function of (mode, origin).
pub fn route(mode: AiMode, origin: Origin) -> Route {
    use AiMode::*;
    use Origin::*;
    match (mode, origin) {
        (Disabled, User) => Route::ExecuteDirect,
        (Disabled, Model) => Route::Ignore,
        (Auto, User) => Route::ExecuteDirect,
        (Auto, Model) => Route::SuggestOnly,
        (Dispatch, User) => Route::ExecuteDirect,
        (Dispatch, Model) => Route::ExecuteGated,
        (Command, User) => Route::ExecuteGated,
        (Command, Model) => Route::SuggestOnly,
        (Code, User) => Route::ExecuteDirect,
        (Code, Model) => Route::SuggestOnly,
    }
}

#[derive(Debug, Default)]
pub struct ModeController {
    mode: AiMode,
}

impl ModeController {
    pub fn new(mode: AiMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> AiMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: AiMode) {
        if mode != self.mode {
            tracing::info!(from = %self.mode, to = %mode, "AI mode changed");
        }
        self.mode = mode;
    }

    pub fn route(&self, origin: Origin) -> Route {
        route(self.mode, origin)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_mode_is_disabled() {
        let mc = ModeController::default();
        assert_eq!(mc.mode(), AiMode::Disabled);
        assert_eq!(mc.route(Origin::User), Route::ExecuteDirect);
        assert_eq!(mc.route(Origin::Model), Route::Ignore);
    }

    #[test]
    fn test_routing_table() {
        let expected = [
            (AiMode::Disabled, Route::ExecuteDirect, Route::Ignore),
            (AiMode::Auto, Route::ExecuteDirect, Route::SuggestOnly),
            (AiMode::Dispatch, Route::ExecuteDirect, Route::ExecuteGated),
            (AiMode::Command, Route::ExecuteGated, Route::SuggestOnly),
            (AiMode::Code, Route::ExecuteDirect, Route::SuggestOnly),
        ];
        for (mode, user, model) in expected {
            assert_eq!(route(mode, Origin::User), user, "user text in {mode}");
            assert_eq!(route(mode, Origin::Model), model, "model text in {mode}");
        }
    }

    #[test]
    fn test_routing_depends_only_on_latest_mode() {
        // Every ordered pair of prior mode → current mode gives the same
        // decision as setting the current mode from scratch.
        for prior in AiMode::ALL {
            for current in AiMode::ALL {
                let mut mc = ModeController::new(prior);
                mc.set_mode(AiMode::Dispatch);
                mc.set_mode(current);
                let fresh = ModeController::new(current);
                assert_eq!(mc.route(Origin::User), fresh.route(Origin::User));
                assert_eq!(mc.route(Origin::Model), fresh.route(Origin::Model));
            }
        }
    }

    #[test]
    fn test_parse_and_as_str() {
        for mode in AiMode::ALL {
            assert_eq!(AiMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(AiMode::parse("OFF"), Some(AiMode::Disabled));
        assert_eq!(AiMode::parse("yolo"), None);
    }

    #[test]
    fn test_next_cycles() {
        assert_eq!(AiMode::Disabled.next(), AiMode::Auto);
        assert_eq!(AiMode::Code.next(), AiMode::Disabled);
    }

    #[test]
    fn test_suggestion_kind() {
        assert_eq!(AiMode::Code.suggestion_kind(), SuggestionKind::Code);
        assert_eq!(AiMode::Auto.suggestion_kind(), SuggestionKind::Command);
    }
}
