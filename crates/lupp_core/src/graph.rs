use std::collections::{HashMap, HashSet, VecDeque};

use crate::store::ScrapeStore;

/// Arena of category nodes with parent to child edges and a visited guard.
///
/// Node ids are indices into `keys`; a key is interned once and keeps its id.
#[derive(Debug, Default, Clone)]
pub struct CategoryGraph {
    ids: HashMap<String, usize>,
    keys: Vec<String>,
    children: Vec<Vec<usize>>,
    visited: HashSet<usize>,
}

impl CategoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph of the categories already in `store`, all marked visited. Edges follow
    /// member stubs that are themselves categories.
    pub fn seeded_from(store: &ScrapeStore) -> Self {
        let mut graph = Self::new();
        for key in store.category_keys_in_order() {
            let id = graph.intern(&key);
            graph.visited.insert(id);
        }
        for key in store.category_keys_in_order() {
            let Some(category) = store.categories.get(&key) else {
                continue;
            };
            let mut members = category
                .pages
                .keys()
                .filter(|member| *member != &key)
                .filter_map(|member| {
                    store
                        .categories
                        .get(member)
                        .map(|child| (child.order, member.as_str()))
                })
                .collect::<Vec<_>>();
            members.sort();
            for (_, member) in members {
                graph.link(&key, member);
            }
        }
        graph
    }

    pub fn intern(&mut self, key: &str) -> usize {
        if let Some(id) = self.ids.get(key) {
            return *id;
        }
        let id = self.keys.len();
        self.ids.insert(key.to_string(), id);
        self.keys.push(key.to_string());
        self.children.push(Vec::new());
        id
    }

    /// Mark `key` visited. Returns `false` when it was visited before and `force` is off.
    pub fn enter(&mut self, key: &str, force: bool) -> bool {
        let id = self.intern(key);
        self.visited.insert(id) || force
    }

    pub fn is_visited(&self, key: &str) -> bool {
        self.ids
            .get(key)
            .is_some_and(|id| self.visited.contains(id))
    }

    pub fn link(&mut self, parent: &str, child: &str) {
        let parent = self.intern(parent);
        let child = self.intern(child);
        if !self.children[parent].contains(&child) {
            self.children[parent].push(child);
        }
    }

    pub fn children(&self, key: &str) -> Vec<&str> {
        self.ids
            .get(key)
            .map(|id| {
                self.children[*id]
                    .iter()
                    .map(|child| self.keys[*child].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `key` and every category reachable from it, breadth first, each once.
    pub fn descendants(&self, key: &str) -> Vec<&str> {
        let Some(start) = self.ids.get(key).copied() else {
            return Vec::new();
        };
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut reached = Vec::new();
        while let Some(id) = queue.pop_front() {
            reached.push(self.keys[id].as_str());
            for child in &self.children[id] {
                if seen.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }
        reached
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
