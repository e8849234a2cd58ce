//! Ordered set of normalized tokens used for scopes and grant-type lists.
//!
//! Both lists are persisted as comma-separated strings. Parsing lower-cases and
//! trims every fragment, drops empty fragments and removes duplicates while
//! keeping the first-seen order, so serialization is stable.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Separator used when parsing and serializing.
pub const SEPARATOR: char = ',';

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(Vec<String>);

impl ScopeSet {
    /// Parse a comma-separated list.
    pub fn parse(value: &str) -> Self {
        let mut items: Vec<String> = Vec::new();
        for fragment in value.split(SEPARATOR) {
            let normalized = normalize(fragment);
            if normalized.is_empty() || items.contains(&normalized) {
                continue;
            }
            items.push(normalized);
        }
        Self(items)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Membership test; the candidate is normalized first.
    pub fn contains(&self, candidate: &str) -> bool {
        let candidate = normalize(candidate);
        self.0.iter().any(|item| *item == candidate)
    }

    /// Entries of `self` that `authorized` does not carry.
    pub fn missing_from<'a>(&'a self, authorized: &ScopeSet) -> Vec<&'a str> {
        self.iter().filter(|item| !authorized.contains(item)).collect()
    }

    pub fn is_subset_of(&self, authorized: &ScopeSet) -> bool {
        self.missing_from(authorized).is_empty()
    }
}

fn normalize(fragment: &str) -> String {
    fragment.trim().to_lowercase()
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

impl FromStr for ScopeSet {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for ScopeSet {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl<'a> FromIterator<&'a str> for ScopeSet {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        let joined: Vec<&str> = iter.into_iter().collect();
        Self::parse(&joined.join(","))
    }
}

impl Serialize for ScopeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ScopeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_and_dedups() {
        let set = ScopeSet::parse(" Read, WRITE ,read,,admin ");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["read", "write", "admin"]);
        assert_eq!(set.to_string(), "read,write,admin");
    }

    #[test]
    fn test_empty_input() {
        assert!(ScopeSet::parse("").is_empty());
        assert!(ScopeSet::parse(" , ,").is_empty());
        assert_eq!(ScopeSet::default().to_string(), "");
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let set = ScopeSet::parse("Read,Write");
        assert!(set.contains(" READ "));
        assert!(!set.contains("admin"));
    }

    #[test]
    fn test_missing_from() {
        let authorized = ScopeSet::parse("read,write");
        let requested = ScopeSet::parse("read,admin,delete");
        assert_eq!(requested.missing_from(&authorized), vec!["admin", "delete"]);
        assert!(ScopeSet::parse("write").is_subset_of(&authorized));
    }

    #[test]
    fn test_serde_as_string() {
        let set = ScopeSet::parse("read, write");
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "\"read,write\"");
        let back: ScopeSet = serde_json::from_str("\"WRITE,read\"").unwrap();
        assert_eq!(back.to_string(), "write,read");
    }
}
