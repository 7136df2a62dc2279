//! Multi-index view - a dynamic entity set materialized from index membership
//!
//! Each tick takes the desired set of index keys and reconciles, in order:
//! 1. Index readers (open added, close removed)
//! 2. Index updates
//! 3. Entity → indexes membership, from Valid indexes only
//! 4. Entity set and its added/removed diff
//! 5. Entity view lifecycle
//! 6. Entity view ticks
//!
//! Everything exposed afterwards reflects the end of that sequence.

use std::collections::{BTreeMap, BTreeSet};

use shoal_core::{present_members, ReaderId, SetDiff, ShoalResult};
use shoal_stream::{ReaderUpdate, StreamContext};

use crate::{Classifiers, EntityView};

/// Entity set derived from a set of tracked indexes
#[derive(Debug)]
pub struct MultiIndexView {
    classifiers: Classifiers,
    indexes: BTreeMap<String, ReaderId>,
    index_updates: BTreeMap<String, ReaderUpdate>,
    indexes_added: Vec<String>,
    indexes_removed: Vec<String>,
    entities: BTreeMap<String, EntityView>,
    /// Entity -> tracked indexes it is a present member of, ordered by index key
    entity_indexes: BTreeMap<String, Vec<String>>,
    entities_added: Vec<String>,
    entities_removed: Vec<String>,
}

impl MultiIndexView {
    pub fn new(classifiers: Classifiers) -> Self {
        MultiIndexView {
            classifiers,
            indexes: BTreeMap::new(),
            index_updates: BTreeMap::new(),
            indexes_added: Vec::new(),
            indexes_removed: Vec::new(),
            entities: BTreeMap::new(),
            entity_indexes: BTreeMap::new(),
            entities_added: Vec::new(),
            entities_removed: Vec::new(),
        }
    }

    /// Reconcile against the desired set of index keys
    pub fn tick<'a, I>(&mut self, ctx: &mut StreamContext, desired: I) -> ShoalResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.index_updates.clear();

        // Stage 1: Track the desired indexes
        let index_diff = SetDiff::between(self.indexes.keys().map(String::as_str), desired);
        for index in &index_diff.added {
            let reader = ctx.open_reader(index)?;
            self.indexes.insert(index.clone(), reader);
            tracing::debug!(index = %index, "tracking index");
        }
        for index in &index_diff.removed {
            if let Some(reader) = self.indexes.remove(index) {
                ctx.close_reader(reader)?;
                tracing::debug!(index = %index, "released index");
            }
        }
        self.indexes_added = index_diff.added;
        self.indexes_removed = index_diff.removed;

        // Stage 2: Poll index readers
        for (index, reader) in &self.indexes {
            if let Some(update) = ctx.poll_reader(*reader)? {
                self.index_updates.insert(index.clone(), update);
            }
        }

        // Stage 3: Membership table from Valid indexes
        self.entity_indexes.clear();
        for (index, reader) in &self.indexes {
            let Some(members) = ctx.data(*reader) else {
                continue;
            };
            for entity in present_members(members) {
                self.entity_indexes
                    .entry(entity.to_string())
                    .or_default()
                    .push(index.clone());
            }
        }

        // Stage 4: Entity set diff
        let entity_diff = SetDiff::between(
            self.entities.keys().map(String::as_str),
            self.entity_indexes.keys().map(String::as_str),
        );

        // Stage 5: Entity view lifecycle
        for entity in &entity_diff.added {
            let view = EntityView::open(entity, ctx, self.classifiers.clone())?;
            self.entities.insert(entity.clone(), view);
        }
        for entity in &entity_diff.removed {
            if let Some(view) = self.entities.remove(entity) {
                view.close(ctx)?;
            }
        }
        self.entities_added = entity_diff.added;
        self.entities_removed = entity_diff.removed;

        // Stage 6: Entity view ticks
        for view in self.entities.values_mut() {
            view.tick(ctx)?;
        }

        Ok(())
    }

    /// Close every entity view and index reader
    pub fn close(&mut self, ctx: &mut StreamContext) -> ShoalResult<()> {
        for (_, view) in std::mem::take(&mut self.entities) {
            view.close(ctx)?;
        }
        for (_, reader) in std::mem::take(&mut self.indexes) {
            ctx.close_reader(reader)?;
        }
        self.entity_indexes.clear();
        self.index_updates.clear();
        Ok(())
    }

    /// Tracked index keys and their readers
    pub fn indexes(&self) -> &BTreeMap<String, ReaderId> {
        &self.indexes
    }

    /// Indexes that produced an update this tick
    pub fn index_updates(&self) -> &BTreeMap<String, ReaderUpdate> {
        &self.index_updates
    }

    pub fn indexes_added(&self) -> &[String] {
        &self.indexes_added
    }

    pub fn indexes_removed(&self) -> &[String] {
        &self.indexes_removed
    }

    pub fn entities(&self) -> &BTreeMap<String, EntityView> {
        &self.entities
    }

    pub fn entity(&self, key: &str) -> Option<&EntityView> {
        self.entities.get(key)
    }

    /// Indexes an entity currently appears in, ordered by index key
    pub fn entity_indexes(&self) -> &BTreeMap<String, Vec<String>> {
        &self.entity_indexes
    }

    pub fn entities_added(&self) -> &[String] {
        &self.entities_added
    }

    pub fn entities_removed(&self) -> &[String] {
        &self.entities_removed
    }

    /// Distinct read dependencies of every valid entity
    pub fn read_dependencies(&self) -> BTreeSet<String> {
        self.entities
            .values()
            .filter_map(|view| view.classification())
            .flat_map(|c| c.read_dependencies.iter().cloned())
            .collect()
    }
}
