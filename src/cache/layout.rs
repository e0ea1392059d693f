use crate::core::{DbError, Result};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Sizes of the cache partitions and the invalidation groups built on them.
///
/// Clearing a group clears every partition it names; a partition depending
/// on the contents of several others (`templates.cached_values`) belongs to
/// each of their groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLayout {
    pub partitions: IndexMap<String, usize>,
    pub groups: IndexMap<String, Vec<String>>,
}

impl Default for CacheLayout {
    fn default() -> Self {
        let partitions = [
            ("default", 8192),
            ("assets", 512),
            ("templates", 1024),
            ("routing", 1024),
            ("routing.rewrites", 8192),
            ("templates.cached_values", 2048),
            ("groups", 8),
        ]
        .into_iter()
        .map(|(name, size)| (name.to_string(), size))
        .collect();

        let groups = [
            ("default", &["default", "templates.cached_values"][..]),
            ("assets", &["assets", "templates.cached_values"]),
            ("templates", &["templates", "templates.cached_values"]),
            (
                "routing",
                &["routing", "routing.rewrites", "templates.cached_values"],
            ),
            ("groups", &["groups", "templates", "templates.cached_values"]),
        ]
        .into_iter()
        .map(|(key, names)| (key.to_string(), names.iter().map(|n| n.to_string()).collect()))
        .collect();

        Self { partitions, groups }
    }
}

impl CacheLayout {
    /// Partition names in layout order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.partitions.keys().map(String::as_str)
    }

    pub fn size(&self, partition: &str) -> Option<usize> {
        self.partitions.get(partition).copied()
    }

    pub fn contains(&self, partition: &str) -> bool {
        self.partitions.contains_key(partition)
    }

    /// Partitions cleared by `name`: the members of a group, or the
    /// partition itself.
    pub fn resolve(&self, name: &str) -> Result<IndexSet<String>> {
        if let Some(members) = self.groups.get(name) {
            return Ok(members.iter().cloned().collect());
        }
        if self.contains(name) {
            return Ok(IndexSet::from([name.to_string()]));
        }
        Err(DbError::KeyNotFound(format!("cache partition or group '{name}'")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.partitions.is_empty() {
            return Err(DbError::Config("the cache layout has no partition".into()));
        }
        if let Some((name, _)) = self.partitions.iter().find(|(_, size)| **size == 0) {
            return Err(DbError::Config(format!("cache partition '{name}' has size 0")));
        }
        for (group, members) in &self.groups {
            if let Some(unknown) = members.iter().find(|m| !self.contains(m)) {
                return Err(DbError::Config(format!(
                    "cache group '{group}' names unknown partition '{unknown}'"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_is_valid() {
        let layout = CacheLayout::default();
        layout.validate().unwrap();
        assert_eq!(layout.names().count(), 7);
        assert_eq!(layout.size("groups"), Some(8));
    }

    #[test]
    fn test_resolve_groups_and_partitions() {
        let layout = CacheLayout::default();
        let routing: Vec<_> = layout.resolve("routing").unwrap().into_iter().collect();
        assert_eq!(
            routing,
            vec!["routing", "routing.rewrites", "templates.cached_values"]
        );
        let rewrites = layout.resolve("routing.rewrites").unwrap();
        assert_eq!(rewrites.len(), 1);
        assert!(layout.resolve("nope").is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_member() {
        let mut layout = CacheLayout::default();
        layout
            .groups
            .insert("bad".into(), vec!["missing".into()]);
        assert!(matches!(layout.validate(), Err(DbError::Config(_))));
    }
}
