//! Breadth-first assembly of parent/child enumerations into a forest.
//!
//! Used for device trees and process trees alike. Each node's children are
//! enumerated at most once and an identifier is never enqueued twice, so an
//! inconsistent enumeration (shared children, cycles) still terminates.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use hwsight_common::model::{DeviceForest, DeviceTreeNode};

/// What an enumeration callback reports for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo<K> {
    pub id: K,
    pub name: String,
    /// Raw platform identifier string.
    pub device_id: String,
    pub manufacturer: String,
}

/// Result of a breadth-first traversal.
#[derive(Debug, Clone)]
pub struct TreeMaps<K> {
    /// Child id -> parent id, for every non-root node.
    pub parent: HashMap<K, K>,
    pub name: HashMap<K, String>,
    pub device_id: HashMap<K, String>,
    pub manufacturer: HashMap<K, String>,
    /// Node ids in visiting order.
    pub order: Vec<K>,
}

impl<K> Default for TreeMaps<K> {
    fn default() -> Self {
        Self {
            parent: HashMap::new(),
            name: HashMap::new(),
            device_id: HashMap::new(),
            manufacturer: HashMap::new(),
            order: Vec::new(),
        }
    }
}

/// Walk from `roots`, calling `children` once per visited node.
pub fn assemble<K, F>(roots: Vec<NodeInfo<K>>, mut children: F) -> TreeMaps<K>
where
    K: Clone + Eq + Hash,
    F: FnMut(&K) -> Vec<NodeInfo<K>>,
{
    let mut maps = TreeMaps::default();
    let mut seen: HashSet<K> = HashSet::new();
    let mut queue: VecDeque<K> = VecDeque::new();

    for root in roots {
        if seen.insert(root.id.clone()) {
            queue.push_back(root.id.clone());
            maps.record(root);
        }
    }

    while let Some(id) = queue.pop_front() {
        maps.order.push(id.clone());
        for child in children(&id) {
            if !seen.insert(child.id.clone()) {
                continue;
            }
            maps.parent.insert(child.id.clone(), id.clone());
            queue.push_back(child.id.clone());
            maps.record(child);
        }
    }

    maps
}

impl<K: Clone + Eq + Hash> TreeMaps<K> {
    fn record(&mut self, node: NodeInfo<K>) {
        self.name.insert(node.id.clone(), node.name);
        self.device_id.insert(node.id.clone(), node.device_id);
        self.manufacturer.insert(node.id, node.manufacturer);
    }

    /// Ids of all nodes whose parent is `id`, in visiting order.
    pub fn children_of(&self, id: &K) -> Vec<K> {
        self.order
            .iter()
            .filter(|k| self.parent.get(*k) == Some(id))
            .cloned()
            .collect()
    }

    /// All nodes below `id`, in breadth-first order.
    pub fn descendants_of(&self, id: &K) -> Vec<K> {
        let mut index: HashMap<&K, Vec<&K>> = HashMap::new();
        for k in &self.order {
            if let Some(parent) = self.parent.get(k) {
                index.entry(parent).or_default().push(k);
            }
        }

        let mut out = Vec::new();
        let mut queue: VecDeque<&K> = VecDeque::from([id]);
        while let Some(k) = queue.pop_front() {
            for child in index.get(k).into_iter().flatten() {
                out.push((*child).clone());
                queue.push_back(*child);
            }
        }
        out
    }
}

impl TreeMaps<String> {
    /// Convert into the public device-forest model.
    pub fn into_forest(mut self) -> DeviceForest {
        let nodes = self
            .order
            .iter()
            .map(|id| DeviceTreeNode {
                id: id.clone(),
                parent_id: self.parent.get(id).cloned(),
                name: self.name.remove(id).unwrap_or_default(),
                device_id: self.device_id.remove(id).unwrap_or_default(),
                manufacturer: self.manufacturer.remove(id).unwrap_or_default(),
            })
            .collect();
        DeviceForest::new(nodes)
    }
}

/// Build a parent-pointer forest (such as a process table) from
/// `(id, parent_id)` pairs. Nodes whose parent is absent from the set, or is
/// themselves, become roots.
pub fn assemble_parent_pointers<K>(pairs: &[(K, K)]) -> TreeMaps<K>
where
    K: Clone + Eq + Hash,
{
    let ids: HashSet<&K> = pairs.iter().map(|(id, _)| id).collect();
    let mut by_parent: HashMap<&K, Vec<&K>> = HashMap::new();
    let mut roots = Vec::new();
    for (id, parent) in pairs {
        if parent == id || !ids.contains(parent) {
            roots.push(leaf(id));
        } else {
            by_parent.entry(parent).or_default().push(id);
        }
    }
    assemble(roots, |id| {
        by_parent
            .get(id)
            .map(|kids| kids.iter().map(|k| leaf(*k)).collect())
            .unwrap_or_default()
    })
}

fn leaf<K: Clone>(id: &K) -> NodeInfo<K> {
    NodeInfo {
        id: id.clone(),
        name: String::new(),
        device_id: String::new(),
        manufacturer: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str) -> NodeInfo<String> {
        NodeInfo {
            id: id.to_string(),
            name: format!("{} name", id),
            device_id: format!("RAW\\{}", id.to_uppercase()),
            manufacturer: "Acme".to_string(),
        }
    }

    #[test]
    fn test_diamond_is_visited_once() {
        // root -> a, b; a -> shared; b -> shared
        let graph: HashMap<&str, Vec<&str>> = [
            ("root", vec!["a", "b"]),
            ("a", vec!["shared"]),
            ("b", vec!["shared"]),
            ("shared", vec![]),
        ]
        .into_iter()
        .collect();

        let mut calls: HashMap<String, usize> = HashMap::new();
        let maps = assemble(vec![info("root")], |id: &String| {
            *calls.entry(id.clone()).or_default() += 1;
            graph[id.as_str()].iter().map(|c| info(c)).collect()
        });

        assert_eq!(maps.order, vec!["root", "a", "b", "shared"]);
        assert_eq!(maps.parent["shared"], "a");
        assert!(calls.values().all(|c| *c == 1));
        assert_eq!(calls.len(), 4);
    }

    #[test]
    fn test_cycle_terminates() {
        let maps = assemble(vec![info("x")], |id: &String| match id.as_str() {
            "x" => vec![info("y")],
            "y" => vec![info("x"), info("z")],
            _ => vec![info("x")],
        });
        assert_eq!(maps.order, vec!["x", "y", "z"]);
        assert!(!maps.parent.contains_key("x"));
    }

    #[test]
    fn test_into_forest() {
        let maps = assemble(vec![info("hub"), info("hub")], |id: &String| {
            if id == "hub" { vec![info("kbd")] } else { vec![] }
        });
        let forest = maps.into_forest();
        assert_eq!(forest.len(), 2);
        let kbd = forest.get("kbd").unwrap();
        assert_eq!(kbd.parent_id.as_deref(), Some("hub"));
        assert_eq!(kbd.device_id, "RAW\\KBD");
        assert_eq!(forest.roots().count(), 1);
    }

    #[test]
    fn test_parent_pointers() {
        let pairs = [(1u32, 0u32), (2, 1), (3, 1), (4, 2), (5, 5), (9, 42)];
        let maps = assemble_parent_pointers(&pairs);
        assert_eq!(maps.children_of(&1), vec![2, 3]);
        assert_eq!(maps.descendants_of(&1), vec![2, 3, 4]);
        assert!(maps.descendants_of(&5).is_empty());
        assert!(!maps.parent.contains_key(&9));
    }

    #[test]
    fn test_maps_record_every_node() {
        let maps: TreeMaps<String> = assemble(vec![info("hub")], |id: &String| {
            if id == "hub" {
                vec![info("kbd"), info("mouse")]
            } else {
                vec![]
            }
        });
        assert_eq!(maps.order, vec!["hub", "kbd", "mouse"]);
        assert_eq!(maps.parent.len(), 2);
        assert_eq!(maps.name["mouse"], "mouse name");
        assert_eq!(maps.device_id["hub"], "RAW\\HUB");
        assert_eq!(maps.manufacturer.len(), 3);

        let empty: TreeMaps<String> = TreeMaps::default();
        assert!(empty.order.is_empty());
        assert!(empty.clone().into_forest().is_empty());
    }

    #[test]
    fn test_descendants_of_long_chain() {
        let pairs: Vec<(u32, u32)> = (1..=5000).map(|pid| (pid, pid - 1)).collect();
        let maps = assemble_parent_pointers(&pairs);
        let below = maps.descendants_of(&1);
        assert_eq!(below.len(), 4999);
        assert_eq!(below.first(), Some(&2));
        assert_eq!(below.last(), Some(&5000));
        assert_eq!(maps.descendants_of(&4998), vec![4999, 5000]);
    }

    #[test]
    fn test_descendants_of_keeps_breadth_first_order() {
        let pairs = [(1u32, 0u32), (2, 1), (3, 1), (4, 2), (5, 3), (6, 4)];
        let maps = assemble_parent_pointers(&pairs);
        assert_eq!(maps.descendants_of(&1), vec![2, 3, 4, 5, 6]);
        assert!(maps.descendants_of(&77).is_empty());
    }
}
