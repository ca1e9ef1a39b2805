//! Category hierarchy.
//!
//! Nodes live in an id-indexed table; parent and child links are ids resolved
//! by lookup. A node without parent is a master category. The directory only
//! grows through operations that keep every ancestor chain finite.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{EngineError, ResultEngine};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryNode {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub child_ids: Vec<String>,
}

impl CategoryNode {
    pub fn is_master(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Persisted/imported form of a category, listed in display order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CategoryDirectory {
    nodes: HashMap<String, CategoryNode>,
    masters: Vec<String>,
}

impl CategoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a directory from records in display order. Parents may appear
    /// after their children.
    pub fn from_records(records: Vec<CategoryRecord>) -> ResultEngine<Self> {
        let mut directory = Self::new();
        for record in &records {
            if directory.nodes.contains_key(&record.id) {
                return Err(EngineError::ExistingKey(record.id.clone()));
            }
            directory.nodes.insert(
                record.id.clone(),
                CategoryNode {
                    id: record.id.clone(),
                    name: record.name.clone(),
                    parent_id: record.parent_id.clone(),
                    child_ids: Vec::new(),
                },
            );
        }

        for record in records {
            match record.parent_id {
                None => directory.masters.push(record.id),
                Some(parent_id) => {
                    if parent_id == record.id {
                        return Err(EngineError::InvalidCategory(format!(
                            "'{}' is its own parent",
                            record.id
                        )));
                    }
                    let parent = directory.nodes.get_mut(&parent_id).ok_or_else(|| {
                        EngineError::InvalidCategory(format!(
                            "'{}' references unknown parent '{parent_id}'",
                            record.id
                        ))
                    })?;
                    parent.child_ids.push(record.id);
                }
            }
        }

        for id in directory.nodes.keys() {
            directory.ancestors(id)?;
        }
        Ok(directory)
    }

    pub fn to_records(&self) -> Vec<CategoryRecord> {
        let mut records = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&str> = self.masters.iter().rev().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            records.push(CategoryRecord {
                id: node.id.clone(),
                name: node.name.clone(),
                parent_id: node.parent_id.clone(),
            });
            stack.extend(node.child_ids.iter().rev().map(String::as_str));
        }
        records
    }

    pub fn add_master(&mut self, id: &str, name: &str) -> ResultEngine<()> {
        self.insert(id, name, None)?;
        self.masters.push(id.to_string());
        Ok(())
    }

    pub fn add_child(&mut self, parent_id: &str, id: &str, name: &str) -> ResultEngine<()> {
        if !self.nodes.contains_key(parent_id) {
            return Err(EngineError::KeyNotFound(parent_id.to_string()));
        }
        self.insert(id, name, Some(parent_id.to_string()))?;
        if let Some(parent) = self.nodes.get_mut(parent_id) {
            parent.child_ids.push(id.to_string());
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&CategoryNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn masters_in_order(&self) -> Vec<&CategoryNode> {
        self.masters.iter().filter_map(|id| self.nodes.get(id)).collect()
    }

    pub fn children_of(&self, id: &str) -> Vec<&CategoryNode> {
        self.nodes
            .get(id)
            .map(|node| {
                node.child_ids
                    .iter()
                    .filter_map(|child| self.nodes.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids from the parent of `id` up to its master. Fails on a cycle.
    pub fn ancestors(&self, id: &str) -> ResultEngine<Vec<String>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([id.to_string()]);
        let mut current = self.nodes.get(id).and_then(|node| node.parent_id.clone());
        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                return Err(EngineError::InvalidCategory(format!(
                    "cycle through '{parent}'"
                )));
            }
            current = self.nodes.get(&parent).and_then(|node| node.parent_id.clone());
            chain.push(parent);
        }
        Ok(chain)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn insert(&mut self, id: &str, name: &str, parent_id: Option<String>) -> ResultEngine<()> {
        if self.nodes.contains_key(id) {
            return Err(EngineError::ExistingKey(id.to_string()));
        }
        self.nodes.insert(
            id.to_string(),
            CategoryNode {
                id: id.to_string(),
                name: name.to_string(),
                parent_id,
                child_ids: Vec::new(),
            },
        );
        Ok(())
    }
}
