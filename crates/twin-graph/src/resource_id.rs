//! Cloud resource paths
//!
//! Provides [`ResourceId`], a parsed `/subscriptions/{sub}/...` path.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Parsed subscription-scoped resource path
///
/// Segments keep their original casing; comparisons elsewhere are
/// case-insensitive.
///
/// # Examples
/// - `/subscriptions/S1/resourceGroups/rg` → subscription `S1`, group `rg`
/// - `/subscriptions/S1/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/acct1`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    segments: Vec<String>,
}

impl ResourceId {
    /// Parse a resource path
    ///
    /// # Errors
    /// Returns error if the path is empty or does not start with
    /// `/subscriptions/{id}`.
    pub fn parse(raw: &str) -> Result<Self, ResourceIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ResourceIdError::Empty);
        }
        if !trimmed.starts_with('/') {
            return Err(ResourceIdError::Malformed(raw.to_string()));
        }

        let segments: Vec<String> = trimmed
            .split('/')
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();

        match segments.as_slice() {
            [scope, sub, ..] if scope.eq_ignore_ascii_case("subscriptions") && !sub.trim().is_empty() => {
                Ok(Self { segments })
            }
            _ => Err(ResourceIdError::Malformed(raw.to_string())),
        }
    }

    /// Path segments (no empty segments)
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Subscription segment
    #[inline]
    #[must_use]
    pub fn subscription(&self) -> &str {
        &self.segments[1]
    }

    /// Resource group (if the path is group-scoped)
    #[must_use]
    pub fn resource_group(&self) -> Option<&str> {
        self.segments
            .windows(2)
            .find(|w| w[0].eq_ignore_ascii_case("resourceGroups"))
            .map(|w| w[1].as_str())
    }

    /// Final segment (resource name)
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }

    /// Same path with the subscription segment replaced
    #[must_use]
    pub fn with_subscription(&self, subscription: &str) -> Self {
        let mut segments = self.segments.clone();
        segments[1] = subscription.to_string();
        Self { segments }
    }

    /// Case-insensitive lookup key
    #[inline]
    #[must_use]
    pub fn lookup_key(&self) -> String {
        normalize_key(&self.to_string())
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for ResourceId {
    type Err = ResourceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Normalized map key for an identifier: trimmed and lower-cased
#[inline]
#[must_use]
pub fn normalize_key(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Lookup key for a raw identifier
///
/// Resource paths are keyed by their parsed form, so stray or trailing
/// slashes do not matter. Anything else falls back to [`normalize_key`].
#[must_use]
pub fn canonical_key(id: &str) -> String {
    ResourceId::parse(id).map_or_else(|_| normalize_key(id), |parsed| parsed.lookup_key())
}

/// Subscription segment of a raw path, if it parses
#[must_use]
pub fn subscription_of(raw: &str) -> Option<String> {
    ResourceId::parse(raw)
        .ok()
        .map(|id| id.subscription().to_string())
}

/// Resource path errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceIdError {
    /// Empty input
    #[error("empty resource id")]
    Empty,

    /// Not a `/subscriptions/{id}/...` path
    #[error("malformed resource id: '{0}'")]
    Malformed(String),
}
