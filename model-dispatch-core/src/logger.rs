//! Action logging with pattern-based filtering and in-memory storage
//!
//! Provides configurable action logging using glob patterns to include/exclude
//! specific action identifiers from logs. Supports both tracing output and an
//! in-memory ring buffer of recent dispatches.
//!
//! # Example
//!
//! ```ignore
//! use model_dispatch_core::logger::{ActionLogConfig, ActionLoggerConfig, ActionLoggerMiddleware};
//!
//! // Log every counter action, tracing only
//! let middleware = ActionLoggerMiddleware::new(ActionLoggerConfig::new(Some("counter.*"), None));
//!
//! // Also keep the last 100 entries in memory
//! let middleware = ActionLoggerMiddleware::with_log(ActionLogConfig::default());
//! if let Some(log) = middleware.log() {
//!     for entry in log.lock().recent(10) {
//!         println!("{}: {}", entry.elapsed_display(), entry.summary);
//!     }
//! }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::action::ActionEnvelope;
use crate::store::Middleware;

/// Configuration for action logging with glob pattern filtering.
///
/// Patterns support:
/// - `*` matches any sequence of characters
/// - `?` matches any single character
/// - Literal text matches exactly
///
/// # Examples
///
/// - `counter.*` matches counter.increment, counter.tryToIncrement, etc.
/// - `*.fetch*` matches any fetch handler of any model
/// - `ui.tick` matches only ui.tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ActionLoggerConfig {
    /// If non-empty, only log actions matching these patterns
    pub include_patterns: Vec<String>,
    /// Exclude actions matching these patterns (applied after include)
    pub exclude_patterns: Vec<String>,
}

impl ActionLoggerConfig {
    /// Create a new config from comma-separated pattern strings
    ///
    /// # Example
    /// ```
    /// use model_dispatch_core::logger::ActionLoggerConfig;
    ///
    /// let config = ActionLoggerConfig::new(Some("search.*,session.connect"), Some("*.tick"));
    /// assert!(config.should_log("search.addChar"));
    /// assert!(config.should_log("session.connect"));
    /// assert!(!config.should_log("search.tick"));
    /// ```
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        Self {
            include_patterns: include.map(split_patterns).unwrap_or_default(),
            exclude_patterns: exclude.map(split_patterns).unwrap_or_default(),
        }
    }

    /// Check if an action identifier should be logged
    pub fn should_log(&self, action_type: &str) -> bool {
        if !self.include_patterns.is_empty()
            && !self
                .include_patterns
                .iter()
                .any(|p| glob_match(p, action_type))
        {
            return false;
        }

        !self
            .exclude_patterns
            .iter()
            .any(|p| glob_match(p, action_type))
    }
}

fn split_patterns(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

// ============================================================================
// In-Memory Action Log
// ============================================================================

/// An entry in the action log
#[derive(Debug, Clone)]
pub struct ActionLogEntry {
    /// Action identifier (`namespace.handler`)
    pub action_type: String,
    /// Rendered envelope (identifier and payload)
    pub summary: String,
    /// Whether the envelope carried completion hooks
    pub tracked: bool,
    /// Timestamp when the action was logged
    pub timestamp: Instant,
    /// Sequence number for ordering
    pub sequence: u64,
    /// Whether the action changed the state (set after reducers run)
    pub state_changed: Option<bool>,
}

impl ActionLogEntry {
    pub fn new(envelope: &ActionEnvelope, sequence: u64) -> Self {
        Self {
            action_type: envelope.action_type().to_string(),
            summary: envelope.to_string(),
            tracked: envelope.hooks().is_some(),
            timestamp: Instant::now(),
            sequence,
            state_changed: None,
        }
    }

    /// Time since this action was logged
    pub fn elapsed(&self) -> std::time::Duration {
        self.timestamp.elapsed()
    }

    /// Format the elapsed time for display (e.g., "2.3s", "150ms")
    pub fn elapsed_display(&self) -> String {
        let elapsed = self.elapsed();
        if elapsed.as_secs() >= 1 {
            format!("{:.1}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        }
    }
}

/// Configuration for the action log ring buffer
#[derive(Debug, Clone)]
pub struct ActionLogConfig {
    /// Maximum number of entries to keep
    pub capacity: usize,
    pub filter: ActionLoggerConfig,
}

impl Default for ActionLogConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            filter: ActionLoggerConfig::default(),
        }
    }
}

impl ActionLogConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn new(capacity: usize, filter: ActionLoggerConfig) -> Self {
        Self { capacity, filter }
    }
}

/// In-memory ring buffer for storing recent actions
///
/// Older entries are discarded when capacity is reached.
#[derive(Debug, Clone)]
pub struct ActionLog {
    entries: VecDeque<ActionLogEntry>,
    config: ActionLogConfig,
    next_sequence: u64,
}

/// Action log shared between a middleware and its readers.
pub type SharedActionLog = Arc<Mutex<ActionLog>>;

impl Default for ActionLog {
    fn default() -> Self {
        Self::new(ActionLogConfig::default())
    }
}

impl ActionLog {
    pub fn new(config: ActionLogConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(config.capacity),
            config,
            next_sequence: 0,
        }
    }

    /// Log an envelope (if it passes the filter)
    ///
    /// Returns the entry if it was logged, None if filtered out.
    pub fn log(&mut self, envelope: &ActionEnvelope) -> Option<&ActionLogEntry> {
        if !self.config.filter.should_log(envelope.action_type()) || self.config.capacity == 0 {
            return None;
        }

        let entry = ActionLogEntry::new(envelope, self.next_sequence);
        self.next_sequence += 1;

        if self.entries.len() >= self.config.capacity {
            self.entries.pop_front();
        }

        self.entries.push_back(entry);
        self.entries.back()
    }

    /// Update the last entry with state_changed info (called after reducers)
    pub fn update_last_state_changed(&mut self, changed: bool) {
        if let Some(entry) = self.entries.back_mut() {
            entry.state_changed = Some(changed);
        }
    }

    /// All entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &ActionLogEntry> {
        self.entries.iter()
    }

    /// The most recent N entries, newest first
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &ActionLogEntry> {
        self.entries.iter().rev().take(count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn config(&self) -> &ActionLogConfig {
        &self.config
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Middleware that logs dispatched envelopes with pattern filtering.
///
/// Supports two modes:
/// - **Tracing only** (default): logs via `tracing::debug!()`
/// - **With storage**: also stores entries in a shared [`ActionLog`]
#[derive(Debug, Clone)]
pub struct ActionLoggerMiddleware {
    config: ActionLoggerConfig,
    log: Option<SharedActionLog>,
    /// Whether the last envelope made it into the log (for state_changed updates)
    last_action_logged: bool,
    active: bool,
}

impl ActionLoggerMiddleware {
    /// Tracing only, no in-memory storage
    pub fn new(config: ActionLoggerConfig) -> Self {
        Self {
            config,
            log: None,
            last_action_logged: false,
            active: true,
        }
    }

    /// Tracing plus in-memory storage
    pub fn with_log(config: ActionLogConfig) -> Self {
        Self {
            config: config.filter.clone(),
            log: Some(Arc::new(Mutex::new(ActionLog::new(config)))),
            last_action_logged: false,
            active: true,
        }
    }

    /// Set whether the middleware is active.
    ///
    /// When inactive, `before`/`after` return immediately.
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Handle to the action log (if storage is enabled)
    pub fn log(&self) -> Option<SharedActionLog> {
        self.log.clone()
    }

    pub fn config(&self) -> &ActionLoggerConfig {
        &self.config
    }
}

impl Middleware for ActionLoggerMiddleware {
    fn before(&mut self, envelope: &ActionEnvelope) {
        if !self.active {
            return;
        }

        if self.config.should_log(envelope.action_type()) {
            tracing::debug!(
                action = %envelope.action_type(),
                payload = %envelope.payload(),
                tracked = envelope.hooks().is_some(),
                "action"
            );
        }

        self.last_action_logged = false;
        if let Some(log) = &self.log {
            if log.lock().log(envelope).is_some() {
                self.last_action_logged = true;
            }
        }
    }

    fn after(&mut self, _envelope: &ActionEnvelope, state_changed: bool) {
        if !self.active || !self.last_action_logged {
            return;
        }
        if let Some(log) = &self.log {
            log.lock().update_last_state_changed(state_changed);
        }
    }
}

/// Simple glob pattern matching supporting `*` and `?`.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let mut pi = 0;
    let mut ti = 0;
    let mut star_pi = None;
    let mut star_ti = 0;

    while ti < text.len() {
        if pi < pattern.len() && (pattern[pi] == '?' || pattern[pi] == text[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < pattern.len() && pattern[pi] == '*' {
            star_pi = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(spi) = star_pi {
            // Backtrack: let the last star swallow one more character
            pi = spi + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }

    pi == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::CompletionHooks;
    use crate::value::Value;

    fn envelope(action_type: &str) -> ActionEnvelope {
        ActionEnvelope::new(action_type, Value::empty_map())
    }

    #[test]
    fn test_glob_match_exact() {
        assert!(glob_match("ui.tick", "ui.tick"));
        assert!(!glob_match("ui.tick", "ui.tock"));
        assert!(!glob_match("ui.tick", "ui.tickTock"));
    }

    #[test]
    fn test_glob_match_star() {
        assert!(glob_match("search.*", "search.addChar"));
        assert!(glob_match("search.*", "search."));
        assert!(!glob_match("search.*", "research.addChar"));
        assert!(glob_match("*.fetch*", "projectA.articles.fetchAll"));
    }

    #[test]
    fn test_glob_match_question() {
        assert!(glob_match("page?.load", "pageA.load"));
        assert!(!glob_match("page?.load", "page.load"));
    }

    #[test]
    fn test_config_include_and_exclude() {
        let config = ActionLoggerConfig::new(Some("counter.*"), Some("counter.try*"));
        assert!(config.should_log("counter.increment"));
        assert!(!config.should_log("counter.tryToIncrement"));
        assert!(!config.should_log("articles.load"));
    }

    #[test]
    fn test_config_default_logs_everything() {
        let config = ActionLoggerConfig::default();
        assert!(config.should_log("anything.at.all"));
    }

    #[test]
    fn test_config_ignores_blank_patterns() {
        let config = ActionLoggerConfig::new(Some(" , "), None);
        assert!(config.include_patterns.is_empty());
        assert!(config.should_log("counter.increment"));
    }

    #[test]
    fn test_action_log_capacity() {
        let mut log = ActionLog::new(ActionLogConfig::with_capacity(3));

        for _ in 0..4 {
            log.log(&envelope("counter.increment"));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.entries().next().unwrap().sequence, 1);

        let recent: Vec<_> = log.recent(2).collect();
        assert_eq!(recent[0].sequence, 3);
        assert_eq!(recent[1].sequence, 2);
    }

    #[test]
    fn test_action_log_records_tracking() {
        let mut log = ActionLog::default();
        log.log(&envelope("counter.increment"));
        log.log(&envelope("counter.tryToIncrement").with_hooks(CompletionHooks::noop()));

        let entries: Vec<_> = log.entries().collect();
        assert!(!entries[0].tracked);
        assert!(entries[1].tracked);
        assert_eq!(
            entries[0].summary,
            r#"{"type":"counter.increment","payload":{}}"#
        );
    }

    #[test]
    fn test_middleware_filtered_action_does_not_update_state_changed() {
        let mut middleware = ActionLoggerMiddleware::with_log(ActionLogConfig::new(
            10,
            ActionLoggerConfig::new(None, Some("ui.tick")),
        ));

        middleware.before(&envelope("counter.increment"));
        middleware.after(&envelope("counter.increment"), true);

        middleware.before(&envelope("ui.tick"));
        middleware.after(&envelope("ui.tick"), false);

        let log = middleware.log().unwrap();
        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries().next().unwrap().state_changed, Some(true));
    }

    #[test]
    fn test_inactive_middleware_logs_nothing() {
        let mut middleware = ActionLoggerMiddleware::with_log(ActionLogConfig::default()).active(false);
        middleware.before(&envelope("counter.increment"));
        assert!(middleware.log().unwrap().lock().is_empty());
    }
}
