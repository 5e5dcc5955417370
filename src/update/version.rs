//! Release version identifiers
//!
//! A `VersionId` is a dotted tuple of non-negative integers with an optional
//! pre-release tag (`2.0.0-beta.1`). Ordering treats missing components as
//! zero, so `1.2` and `1.2.0` are the same version.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Version parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("empty version string")]
    Empty,

    #[error("invalid numeric component '{component}' in '{input}'")]
    InvalidComponent { input: String, component: String },

    #[error("invalid pre-release tag in '{0}'")]
    InvalidPrerelease(String),
}

/// Comparable release version
#[derive(Debug, Clone)]
pub struct VersionId {
    components: Vec<u64>,
    prerelease: Option<String>,
}

impl VersionId {
    /// Create a release version from numeric components
    pub fn new(components: impl Into<Vec<u64>>) -> Self {
        Self {
            components: components.into(),
            prerelease: None,
        }
    }

    /// Create a version with a pre-release tag
    pub fn with_prerelease(components: impl Into<Vec<u64>>, prerelease: impl Into<String>) -> Self {
        Self {
            components: components.into(),
            prerelease: Some(prerelease.into()),
        }
    }

    /// Parse version from string (e.g., "1.2.3", "v2.0-rc.1", "1.4.0+build.7")
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        // Build metadata never participates in ordering
        let without_build = trimmed.split('+').next().unwrap_or_default();
        if without_build.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let (numeric, prerelease) = match without_build.split_once('-') {
            Some((numeric, pre)) => (numeric, Some(pre)),
            None => (without_build, None),
        };

        let components = numeric
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(VersionParseError::InvalidComponent {
                        input: s.to_string(),
                        component: part.to_string(),
                    });
                }
                part.parse::<u64>().map_err(|_| VersionParseError::InvalidComponent {
                    input: s.to_string(),
                    component: part.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let prerelease = match prerelease {
            Some(tag) => {
                let valid = !tag.is_empty()
                    && tag.split('.').all(|ident| {
                        !ident.is_empty()
                            && ident.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
                    });
                if !valid {
                    return Err(VersionParseError::InvalidPrerelease(s.to_string()));
                }
                Some(tag.to_string())
            }
            None => None,
        };

        Ok(Self {
            components,
            prerelease,
        })
    }

    /// Numeric components as written
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// Pre-release tag, if any
    pub fn prerelease(&self) -> Option<&str> {
        self.prerelease.as_deref()
    }

    /// Whether this version carries a pre-release tag
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// Check if this version is strictly newer than `other`
    pub fn is_newer_than(&self, other: &VersionId) -> bool {
        compare(self, other) == Ordering::Greater
    }

    /// Components with trailing zeros removed; equal versions share this form
    fn significant_components(&self) -> &[u64] {
        let len = self
            .components
            .iter()
            .rposition(|&c| c != 0)
            .map_or(0, |idx| idx + 1);
        &self.components[..len]
    }
}

/// Compare two versions.
///
/// Missing numeric components count as zero. A pre-release sorts below the
/// same numeric tuple without a tag; two tags compare identifier by
/// identifier, numerically where both identifiers are numeric.
pub fn compare(a: &VersionId, b: &VersionId) -> Ordering {
    let len = a.components.len().max(b.components.len());
    for idx in 0..len {
        let left = a.components.get(idx).copied().unwrap_or(0);
        let right = b.components.get(idx).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }

    match (&a.prerelease, &b.prerelease) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(left), Some(right)) => compare_prerelease(left, right),
    }
}

fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (numeric_identifier(l), numeric_identifier(r)) {
                    (Some(ln), Some(rn)) => ln.cmp(&rn).then_with(|| l.len().cmp(&r.len())),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Numeric value of an all-digit identifier, `None` for alphanumerics.
///
/// Identifiers too long for u64 are compared as text.
fn numeric_identifier(ident: &str) -> Option<u64> {
    if ident.bytes().all(|b| b.is_ascii_digit()) {
        ident.parse().ok()
    } else {
        None
    }
}

impl PartialEq for VersionId {
    fn eq(&self, other: &Self) -> bool {
        compare(self, other) == Ordering::Equal
    }
}

impl Eq for VersionId {}

impl PartialOrd for VersionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionId {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl Hash for VersionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant_components().hash(state);
        self.prerelease.hash(state);
    }
}

impl FromStr for VersionId {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let numeric = self
            .components
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(".");
        match self.prerelease {
            Some(ref pre) => write!(f, "{}-{}", numeric, pre),
            None => write!(f, "{}", numeric),
        }
    }
}

impl Serialize for VersionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        VersionId::parse(&raw).map_err(serde::de::Error::custom)
    }
}
