/// Label registry: registrations for the whole run, plus a bounded cache
/// of materialized labels.
use rustc_hash::FxHashMap;
use std::rc::Rc;
use tracing::{debug, error, info};

use crate::schema::label::{Label, LabelDefinition, LabelId};

pub const DEFAULT_CACHE_SIZE: usize = 100;

#[derive(Debug)]
struct CachedLabel {
    label: Rc<Label>,
    last_used: u64,
}

/// Maps label ids to their definitions.
///
/// Eviction only ever drops a materialized [`Label`]; the registration
/// stays, and the next `get` rebuilds the label transparently.
#[derive(Debug)]
pub struct LabelRegistry {
    definitions: FxHashMap<LabelId, LabelDefinition>,
    cache: FxHashMap<LabelId, CachedLabel>,
    capacity: usize,
    clock: u64,
}

impl Default for LabelRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

impl LabelRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            definitions: FxHashMap::default(),
            cache: FxHashMap::default(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    /// Register a label. Re-registering an id replaces the old definition.
    pub fn add(&mut self, definition: LabelDefinition) {
        let id = definition.id().to_string();
        if self.definitions.contains_key(&id) {
            info!(label = %id, "label already registered, overwriting");
        }
        self.cache.remove(&id);
        self.definitions.insert(id, definition);
    }

    pub fn add_all(&mut self, definitions: impl IntoIterator<Item = LabelDefinition>) {
        for definition in definitions {
            self.add(definition);
        }
    }

    /// Look up a label, materializing it if it is not cached. A missing id
    /// is logged and yields `None`.
    pub fn get(&mut self, id: &str) -> Option<Rc<Label>> {
        self.clock += 1;
        let now = self.clock;
        if let Some(cached) = self.cache.get_mut(id) {
            cached.last_used = now;
            return Some(cached.label.clone());
        }
        let Some(definition) = self.definitions.get(id) else {
            error!(label = %id, "label not found");
            return None;
        };
        let label = Rc::new(definition.materialize());
        self.cache.insert(
            id.to_string(),
            CachedLabel {
                label: label.clone(),
                last_used: now,
            },
        );
        self.evict();
        Some(label)
    }

    pub fn has(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear(&mut self) {
        self.definitions.clear();
        self.cache.clear();
    }

    fn evict(&mut self) {
        while self.cache.len() > self.capacity {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|(_, cached)| cached.last_used)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    debug!(label = %id, "evicting cached label");
                    self.cache.remove(&id);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::label::Step;
    use std::cell::Cell;

    fn label(id: &str, steps: usize) -> LabelDefinition {
        let steps = (0..steps)
            .map(|i| Step::new(format!("{id} step {i}"), |_, _| async { Ok(None) }))
            .collect();
        LabelDefinition::new(id, steps)
    }

    #[test]
    fn add_and_get() {
        let mut registry = LabelRegistry::default();
        registry.add(label("start", 2));
        assert!(registry.has("start"));
        assert_eq!(registry.get("start").map(|l| l.steps_count()), Some(2));
    }

    #[test]
    fn missing_label_is_none() {
        let mut registry = LabelRegistry::default();
        assert!(registry.get("nope").is_none());
        assert!(!registry.has("nope"));
    }

    #[test]
    fn overwrite_replaces_definition_and_cache() {
        let mut registry = LabelRegistry::default();
        registry.add(label("start", 1));
        assert_eq!(registry.get("start").map(|l| l.steps_count()), Some(1));
        registry.add(label("start", 3));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("start").map(|l| l.steps_count()), Some(3));
    }

    #[test]
    fn eviction_keeps_registration() {
        let mut registry = LabelRegistry::new(2);
        registry.add_all([label("a", 1), label("b", 1), label("c", 1)]);
        registry.get("a");
        registry.get("b");
        registry.get("c");
        assert_eq!(registry.cached_len(), 2);
        assert!(registry.get("a").is_some());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let builds = std::rc::Rc::new(Cell::new(0));
        let counter = builds.clone();
        let mut registry = LabelRegistry::new(2);
        registry.add(LabelDefinition::generated("gen", move || {
            counter.set(counter.get() + 1);
            Vec::new()
        }));
        registry.add_all([label("x", 1), label("y", 1)]);

        registry.get("gen");
        registry.get("x");
        registry.get("gen");
        registry.get("y");
        // "x" was the oldest, so "gen" is still cached.
        registry.get("gen");
        assert_eq!(builds.get(), 1);

        registry.get("x");
        registry.get("y");
        registry.get("gen");
        assert_eq!(builds.get(), 2);
    }
}
