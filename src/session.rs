/// Per-session terminal state.
///
/// One `SessionState` belongs to exactly one orchestrator. It never goes back
/// to running once terminated — a fresh shell needs a fresh session.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

// ── Theme ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Dark,
    Light,
    HighContrast,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
            Theme::HighContrast => "high_contrast",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "dark" => Some(Theme::Dark),
            "light" => Some(Theme::Light),
            "high_contrast" | "highcontrast" => Some(Theme::HighContrast),
            _ => None,
        }
    }
}

// ── Geometry ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    pub fn new(cols: u16, rows: u16) -> Result<Self, SessionError> {
        if cols == 0 || rows == 0 {
            return Err(SessionError::InvalidGeometry { cols, rows });
        }
        Ok(Self { cols, rows })
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self { cols: 80, rows: 25 }
    }
}

// ── Run state ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// Created, no backend bound yet
    #[default]
    Idle,
    Running,
    /// Terminal state — no transition out
    Terminated,
}

// ── SessionState ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionState {
    run_state: RunState,
    geometry: Geometry,
    cwd: PathBuf,
    theme: Theme,
    syntax_highlighting: bool,
}

impl SessionState {
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            run_state: RunState::Idle,
            geometry: Geometry::default(),
            cwd,
            theme: Theme::default(),
            syntax_highlighting: true,
        }
    }

    /// Starts in the process launch directory.
    pub fn from_launch_dir() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self::new(cwd)
    }

    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn syntax_highlighting(&self) -> bool {
        self.syntax_highlighting
    }

    /// Bind a live backend. Fails without side effects if already running or
    /// if this session has been terminated.
    pub fn start(&mut self) -> Result<(), SessionError> {
        match self.run_state {
            RunState::Idle => {
                self.run_state = RunState::Running;
                Ok(())
            }
            RunState::Running => Err(SessionError::AlreadyRunning),
            RunState::Terminated => Err(SessionError::Terminated),
        }
    }

    /// Idempotent. A session that never started also ends up terminated.
    pub fn terminate(&mut self) {
        self.run_state = RunState::Terminated;
    }

    pub fn update_size(&mut self, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.geometry = Geometry::new(cols, rows)?;
        Ok(())
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
    }

    pub fn set_syntax_highlighting(&mut self, enabled: bool) {
        self.syntax_highlighting = enabled;
    }

    pub fn set_cwd(&mut self, cwd: PathBuf) {
        self.cwd = cwd;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SessionState {
        SessionState::new(PathBuf::from("/tmp"))
    }

    #[test]
    fn test_defaults() {
        let s = state();
        assert!(!s.is_running());
        assert_eq!(s.run_state(), RunState::Idle);
        assert_eq!(s.geometry(), Geometry { cols: 80, rows: 25 });
        assert_eq!(s.theme(), Theme::Dark);
        assert_eq!(s.cwd(), Path::new("/tmp"));
    }

    #[test]
    fn test_update_size_roundtrip() {
        let mut s = state();
        for (cols, rows) in [(1, 1), (120, 40), (80, 25), (u16::MAX, 3)] {
            s.update_size(cols, rows).unwrap();
            assert_eq!(s.geometry(), Geometry { cols, rows });
            s.update_size(cols, rows).unwrap();
            assert_eq!(s.geometry(), Geometry { cols, rows });
        }
    }

    #[test]
    fn test_update_size_rejects_zero_without_side_effect() {
        let mut s = state();
        s.update_size(100, 30).unwrap();
        assert_eq!(
            s.update_size(0, 30),
            Err(SessionError::InvalidGeometry { cols: 0, rows: 30 })
        );
        assert!(s.update_size(100, 0).is_err());
        assert_eq!(s.geometry(), Geometry { cols: 100, rows: 30 });
    }

    #[test]
    fn test_start_twice_is_already_running() {
        let mut s = state();
        s.start().unwrap();
        assert!(s.is_running());
        assert_eq!(s.start(), Err(SessionError::AlreadyRunning));
        assert!(s.is_running());
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let mut s = state();
        s.start().unwrap();
        s.terminate();
        assert!(!s.is_running());
        s.terminate();
        assert!(!s.is_running());
        assert_eq!(s.run_state(), RunState::Terminated);
    }

    #[test]
    fn test_never_restarts_after_terminate() {
        let mut s = state();
        s.start().unwrap();
        s.terminate();
        assert_eq!(s.start(), Err(SessionError::Terminated));
        assert!(!s.is_running());
    }

    #[test]
    fn test_setters() {
        let mut s = state();
        s.set_theme(Theme::HighContrast);
        s.set_syntax_highlighting(false);
        s.set_cwd(PathBuf::from("/var"));
        assert_eq!(s.theme(), Theme::HighContrast);
        assert!(!s.syntax_highlighting());
        assert_eq!(s.cwd(), Path::new("/var"));
    }

    #[test]
    fn test_theme_parse() {
        assert_eq!(Theme::parse("dark"), Some(Theme::Dark));
        assert_eq!(Theme::parse("Light"), Some(Theme::Light));
        assert_eq!(Theme::parse("high-contrast"), Some(Theme::HighContrast));
        assert_eq!(Theme::parse("solarized"), None);
    }
}
