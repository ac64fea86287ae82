//! Game detail keys with a fixed priority order

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Position of each recognised detail key. Unrecognised keys sort after all of these.
static KNOWN_DETAILS: phf::Map<&'static str, usize> = phf::phf_map! {
    "name" => 0,
    "dlcname" => 1,
    "extratag" => 2,
    "category" => 3,
    "subcategory" => 4,
    "update" => 5,
    "system" => 6,
    "subsystem" => 7,
    "region" => 8,
    "version" => 9,
    "appversion" => 10,
    "ps3systemversion" => 11,
    "title" => 12,
    "titleid" => 13,
    "contentid" => 14,
    "languages" => 15,
    "keys" => 16,
    "rap" => 17,
};

/// A detail key ordered by its position in the known-details list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DetailKey(String);

impl DetailKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_known(&self) -> bool {
        KNOWN_DETAILS.contains_key(self.0.as_str())
    }

    fn priority(&self) -> usize {
        KNOWN_DETAILS
            .get(self.0.as_str())
            .copied()
            .unwrap_or(KNOWN_DETAILS.len())
    }
}

impl Ord for DetailKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Two distinct unrecognised keys share a priority; ordinal order keeps them apart.
        self.priority()
            .cmp(&other.priority())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for DetailKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&str> for DetailKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

pub type Details = BTreeMap<DetailKey, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_keys_follow_fixed_order() {
        let mut details = Details::new();
        details.insert("rap".into(), "1".into());
        details.insert("region".into(), "USA".into());
        details.insert("name".into(), "Game".into());
        details.insert("titleid".into(), "BLUS0001".into());

        let keys: Vec<&str> = details.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["name", "region", "titleid", "rap"]);
    }

    #[test]
    fn test_unknown_keys_sort_last() {
        let mut details = Details::new();
        details.insert("aaa".into(), "x".into());
        details.insert("rap".into(), "y".into());
        details.insert("category".into(), "z".into());

        let keys: Vec<&str> = details.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["category", "rap", "aaa"]);
    }

    #[test]
    fn test_distinct_unknown_keys_are_both_kept() {
        let mut details = Details::new();
        details.insert("zeta".into(), "1".into());
        details.insert("alpha".into(), "2".into());
        assert_eq!(details.len(), 2);
        assert_eq!(
            DetailKey::new("zeta").cmp(&DetailKey::new("zeta")),
            Ordering::Equal
        );
    }
}
