//! Heuristic original-id recovery
//!
//! Last resort for abstracted resources that lost their derivation edge.
//! Older naming schemes appended a random `_xxxxxx_xxxxxx` hex suffix to the
//! final path segment and swapped hyphens for underscores; recovery undoes
//! both. The result is a best guess: a miss downstream just means NEW.

use regex::Regex;
use std::sync::LazyLock;

/// Default suffix pattern: `_` + 6 hex + `_` + 6 hex at end of segment
pub const DEFAULT_SUFFIX_PATTERN: &str = "_[0-9a-f]{6}_[0-9a-f]{6}$";

static DEFAULT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(DEFAULT_SUFFIX_PATTERN).expect("DEFAULT_SUFFIX_PATTERN is a valid regex pattern")
});

/// Suffix-stripping id recoverer
#[derive(Debug, Clone)]
pub struct HeuristicRecoverer {
    suffix: Regex,
}

impl HeuristicRecoverer {
    /// Create recoverer with a custom suffix pattern
    ///
    /// # Errors
    /// Returns error if the pattern does not compile.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            suffix: Regex::new(pattern)?,
        })
    }

    /// Suffix pattern in use
    #[inline]
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.suffix.as_str()
    }

    /// Recovered id, or `None` if the heuristic does not apply
    ///
    /// Applies only to paths with at least two non-empty segments whose
    /// final segment ends with the suffix; a match elsewhere in the segment
    /// is ignored even for patterns without `$`. Only the final segment
    /// changes.
    #[must_use]
    pub fn try_recover(&self, id: &str) -> Option<String> {
        let trimmed = id.trim_end_matches('/');
        if trimmed.split('/').filter(|s| !s.is_empty()).count() < 2 {
            return None;
        }

        let (prefix, last) = trimmed.rsplit_once('/')?;
        let found = self.suffix.find_iter(last).find(|m| m.end() == last.len())?;
        let stem = &last[..found.start()];
        if stem.is_empty() {
            return None;
        }

        let recovered = format!("{prefix}/{}", stem.replace('_', "-"));
        tracing::info!(from = %id, to = %recovered, "recovered original id heuristically");
        Some(recovered)
    }

    /// Recovered id, or the input unchanged
    #[must_use]
    pub fn recover(&self, id: &str) -> String {
        self.try_recover(id).unwrap_or_else(|| id.to_string())
    }
}

impl Default for HeuristicRecoverer {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_SUFFIX.clone(),
        }
    }
}
