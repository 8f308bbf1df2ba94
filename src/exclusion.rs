//! Name-based exclusion list.
//!
//! Names are trimmed, empty names are dropped and duplicates collapse to
//! their first occurrence, so the list always round-trips through the
//! settings file in insertion order.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ExclusionList {
    names: Vec<String>,
}

impl ExclusionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the name was not already present.
    pub fn insert(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.is_excluded(name) {
            return false;
        }
        self.names.push(name.to_string());
        true
    }

    /// Returns `true` if the name was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let name = name.trim();
        let before = self.names.len();
        self.names.retain(|n| n != name);
        self.names.len() != before
    }

    pub fn set(&mut self, name: &str, excluded: bool) {
        if excluded {
            self.insert(name);
        } else {
            self.remove(name);
        }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        let name = name.trim();
        self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl From<Vec<String>> for ExclusionList {
    fn from(names: Vec<String>) -> Self {
        let mut list = ExclusionList::new();
        for name in &names {
            list.insert(name);
        }
        list
    }
}

impl From<ExclusionList> for Vec<String> {
    fn from(list: ExclusionList) -> Self {
        list.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_on_construction() {
        let list = ExclusionList::from(vec![
            " db ".to_string(),
            "".to_string(),
            "web".to_string(),
            "db".to_string(),
            "   ".to_string(),
        ]);
        assert_eq!(list.names(), &["db".to_string(), "web".to_string()]);
    }

    #[test]
    fn insert_and_remove() {
        let mut list = ExclusionList::new();
        assert!(list.insert("cache"));
        assert!(!list.insert(" cache"));
        assert!(list.is_excluded("cache"));
        assert!(list.remove("cache "));
        assert!(!list.remove("cache"));
        assert!(list.is_empty());
    }

    #[test]
    fn set_toggles_membership() {
        let mut list = ExclusionList::new();
        list.set("a", true);
        list.set("b", true);
        list.set("a", false);
        assert_eq!(list.names(), &["b".to_string()]);
    }

    #[test]
    fn deserializes_from_plain_array() {
        let list: ExclusionList = serde_json::from_str(r#"["x", "x", " y"]"#).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(serde_json::to_string(&list).unwrap(), r#"["x","y"]"#);
    }
}
