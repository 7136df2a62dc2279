//! Server view - authority orchestration for one named process
//!
//! The assignment index maps authority keys to server names. A server owns
//! every entity listed under an authority key assigned to it (WriteView) and
//! tracks the read dependencies of those entities (ReadView).
//!
//! Migration is two independent writes: absence from the old authority
//! index and presence in the new one. Between them the entity can be seen
//! under zero or two authorities, and readers must tolerate both.

use shoal_core::{ReaderId, SetDiff, ShoalResult};
use shoal_stream::{ReconcilingWriter, StreamContext};

use crate::{write_to_index, Classifiers, EntityLogic, MultiIndexView};

/// An authority change issued during a tick
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Migration {
    pub entity: String,
    pub from: String,
    pub to: String,
}

/// Outcome of one orchestrator tick
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    /// Authority indexes assigned to this server
    pub owned_indexes: usize,
    /// Valid entities in the WriteView
    pub owned_entities: usize,
    /// Read-dependency indexes tracked by the ReadView
    pub read_indexes: usize,
    /// Patches published by domain logic
    pub updates_published: usize,
    pub read_index_adds: usize,
    pub read_index_removes: usize,
    pub migrations: Vec<Migration>,
}

/// Orchestrator for one server name
#[derive(Debug)]
pub struct ServerView {
    name: String,
    assignment_key: String,
    assignments: ReaderId,
    write_view: MultiIndexView,
    read_view: MultiIndexView,
}

impl ServerView {
    /// Open the assignment reader and create empty write and read views
    pub fn open(
        ctx: &mut StreamContext,
        assignment_key: &str,
        name: &str,
        classifiers: Classifiers,
    ) -> ShoalResult<Self> {
        let assignments = ctx.open_reader(assignment_key)?;
        tracing::info!(server = name, assignments = assignment_key, "server view opened");

        Ok(ServerView {
            name: name.to_string(),
            assignment_key: assignment_key.to_string(),
            assignments,
            write_view: MultiIndexView::new(classifiers.clone()),
            read_view: MultiIndexView::new(classifiers),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn assignment_key(&self) -> &str {
        &self.assignment_key
    }

    pub fn write_view(&self) -> &MultiIndexView {
        &self.write_view
    }

    pub fn read_view(&self) -> &MultiIndexView {
        &self.read_view
    }

    /// Authority keys currently assigned to this server
    pub fn owned_indexes(&self, ctx: &StreamContext) -> Vec<String> {
        ctx.data(self.assignments)
            .map(|assignments| {
                assignments
                    .iter()
                    .filter(|(_, owner)| **owner == self.name.as_bytes())
                    .map(|(index, _)| index.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run one orchestration tick
    pub fn tick(
        &mut self,
        ctx: &mut StreamContext,
        writer: &mut ReconcilingWriter,
        logic: &mut dyn EntityLogic,
        dt: f64,
    ) -> ShoalResult<TickReport> {
        let mut report = TickReport::default();

        // Stage 1: Refresh assignments
        ctx.poll_reader(self.assignments)?;

        // Stage 2: Owned entities
        let owned = self.owned_indexes(ctx);
        report.owned_indexes = owned.len();
        self.write_view.tick(ctx, owned.iter().map(String::as_str))?;

        // Stage 3: Read dependencies of owned entities
        let dependencies = self.write_view.read_dependencies();
        report.read_indexes = dependencies.len();
        self.read_view
            .tick(ctx, dependencies.iter().map(String::as_str))?;

        // Stage 4: Domain logic
        for (key, view) in self.write_view.entities() {
            if !view.is_valid() {
                continue;
            }
            report.owned_entities += 1;

            let Some(fields) = view.fields(ctx) else {
                continue;
            };
            if let Some(patch) = logic.tick(key, fields, dt) {
                if !patch.is_empty() {
                    writer.send(key, &patch.fields, &patch.events)?;
                    report.updates_published += 1;
                }
            }
        }

        for (key, view) in self.write_view.entities() {
            let Some(classification) = view.classification() else {
                continue;
            };

            // Stage 5: Read-interest reconciliation
            if let Some(current) = self.read_view.entity_indexes().get(key) {
                let diff = SetDiff::between(
                    current.iter().map(String::as_str),
                    classification.read_indexes.iter().map(String::as_str),
                );
                for index in &diff.added {
                    tracing::debug!(entity = %key, index = %index, "joining read index");
                    write_to_index(writer, index, key, true)?;
                }
                for index in &diff.removed {
                    tracing::debug!(entity = %key, index = %index, "leaving read index");
                    write_to_index(writer, index, key, false)?;
                }
                report.read_index_adds += diff.added.len();
                report.read_index_removes += diff.removed.len();
            }

            // Stage 6: Authority migration
            let current = self
                .write_view
                .entity_indexes()
                .get(key)
                .and_then(|indexes| indexes.first());
            if let Some(current) = current {
                let desired = &classification.write_index;
                if current != desired {
                    tracing::info!(entity = %key, from = %current, to = %desired, "migrating authority");
                    write_to_index(writer, current, key, false)?;
                    write_to_index(writer, desired, key, true)?;
                    report.migrations.push(Migration {
                        entity: key.clone(),
                        from: current.clone(),
                        to: desired.clone(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Close both views and the assignment reader
    pub fn close(&mut self, ctx: &mut StreamContext) -> ShoalResult<()> {
        self.write_view.close(ctx)?;
        self.read_view.close(ctx)?;
        ctx.close_reader(self.assignments)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use bytes::Bytes;
    use shoal_core::{f64_value, is_present, read_f64, FieldMap};
    use shoal_store::InMemoryStore;
    use shoal_stream::StreamConfig;

    use crate::EntityPatch;

    struct Fixture {
        store: InMemoryStore,
        ctx: StreamContext,
        writer: ReconcilingWriter,
        seed: ReconcilingWriter,
    }

    impl Fixture {
        fn new() -> Self {
            let store = InMemoryStore::new();
            let ctx = StreamContext::new(
                Box::new(store.connect()),
                Box::new(store.connect()),
                StreamConfig::local(),
            )
            .unwrap();
            let writer = ReconcilingWriter::new(Box::new(store.connect()));
            let seed = ReconcilingWriter::new(Box::new(store.connect()));
            Fixture {
                store,
                ctx,
                writer,
                seed,
            }
        }

        fn assign(&mut self, index: &str, server: &str) {
            let mut diff = FieldMap::new();
            diff.insert(index.to_string(), Bytes::copy_from_slice(server.as_bytes()));
            self.seed.send("main", &diff, &[]).unwrap();
        }

        fn entity(&mut self, key: &str, x: f64, y: f64) {
            let mut fields = FieldMap::new();
            fields.insert("x".into(), f64_value(x));
            fields.insert("y".into(), f64_value(y));
            fields.insert("vx".into(), f64_value(1.0));
            fields.insert("vy".into(), f64_value(2.0));
            self.seed.send(key, &fields, &[]).unwrap();
        }

        fn member(&mut self, index: &str, key: &str) {
            write_to_index(&mut self.seed, index, key, true).unwrap();
        }

        fn tick(&mut self, view: &mut ServerView, logic: &mut dyn EntityLogic) -> TickReport {
            self.ctx.begin_tick();
            view.tick(&mut self.ctx, &mut self.writer, logic, 0.1).unwrap()
        }

        fn present(&self, index: &str, key: &str) -> bool {
            self.store
                .hash(index)
                .is_some_and(|hash| is_present(&hash, key))
        }
    }

    fn idle(_: &str, _: &FieldMap, _: f64) -> Option<EntityPatch> {
        None
    }

    #[test]
    fn test_write_view_follows_assignment() {
        let mut fx = Fixture::new();
        fx.assign("writeIndex:0,0", "server-1");
        fx.assign("writeIndex:1,0", "server-2");

        let mut view = ServerView::open(&mut fx.ctx, "main", "server-1", Classifiers::grid(10.0)).unwrap();
        for _ in 0..4 {
            fx.tick(&mut view, &mut idle);
        }

        assert_eq!(view.owned_indexes(&fx.ctx), vec!["writeIndex:0,0".to_string()]);
        assert!(view.write_view().indexes().contains_key("writeIndex:0,0"));
        assert!(!view.write_view().indexes().contains_key("writeIndex:1,0"));

        fx.assign("writeIndex:0,0", "server-2");
        let report = fx.tick(&mut view, &mut idle);
        assert_eq!(report.owned_indexes, 0);
        assert!(view.write_view().indexes().is_empty());
    }

    #[test]
    fn test_logic_runs_on_owned_entities() {
        let mut fx = Fixture::new();
        fx.assign("writeIndex:0,0", "server-1");
        fx.entity("e1", 0.0, 0.0);
        fx.member("writeIndex:0,0", "e1");

        let mut view = ServerView::open(&mut fx.ctx, "main", "server-1", Classifiers::grid(10.0)).unwrap();
        let mut motion = |_: &str, fields: &FieldMap, dt: f64| -> Option<EntityPatch> {
            let x = read_f64(fields, "x")? + read_f64(fields, "vx")? * dt;
            let mut patch = FieldMap::new();
            patch.insert("x".into(), f64_value(x));
            Some(EntityPatch::new(patch))
        };

        let mut published = 0;
        for _ in 0..8 {
            published += fx.tick(&mut view, &mut motion).updates_published;
        }

        assert!(published > 0);
        let x = read_f64(&fx.store.hash("e1").unwrap(), "x").unwrap();
        assert!(x > 0.0);
    }

    #[test]
    fn test_migration_settles_in_one_tick() {
        let mut fx = Fixture::new();
        fx.assign("writeIndex:0,0", "server-1");
        fx.assign("writeIndex:1,0", "server-1");
        // Classified under 1,0 but listed under 0,0
        fx.entity("e1", 15.0, 0.0);
        fx.member("writeIndex:0,0", "e1");

        let mut view = ServerView::open(&mut fx.ctx, "main", "server-1", Classifiers::grid(10.0)).unwrap();

        let mut migrations = Vec::new();
        for _ in 0..8 {
            let report = fx.tick(&mut view, &mut idle);
            if !report.migrations.is_empty() {
                migrations = report.migrations;
                break;
            }
        }

        assert_eq!(
            migrations,
            vec![Migration {
                entity: "e1".into(),
                from: "writeIndex:0,0".into(),
                to: "writeIndex:1,0".into(),
            }]
        );
        // Both writes were issued within that tick
        assert!(!fx.present("writeIndex:0,0", "e1"));
        assert!(fx.present("writeIndex:1,0", "e1"));

        // The entity stays owned and no further migration is issued
        for _ in 0..4 {
            let report = fx.tick(&mut view, &mut idle);
            assert!(report.migrations.is_empty());
        }
        assert_eq!(view.write_view().entity_indexes()["e1"], ["writeIndex:1,0"]);
        assert!(view.write_view().entity("e1").unwrap().is_valid());
    }

    #[test]
    fn test_migration_to_foreign_index_releases_entity() {
        let mut fx = Fixture::new();
        fx.assign("writeIndex:0,0", "server-1");
        fx.assign("writeIndex:1,0", "server-2");
        fx.entity("e1", 15.0, 0.0);
        fx.member("writeIndex:0,0", "e1");

        let mut view = ServerView::open(&mut fx.ctx, "main", "server-1", Classifiers::grid(10.0)).unwrap();
        let mut migrated = false;
        for _ in 0..8 {
            migrated |= !fx.tick(&mut view, &mut idle).migrations.is_empty();
        }

        assert!(migrated);
        assert!(fx.present("writeIndex:1,0", "e1"));
        assert!(view.write_view().entity("e1").is_none());
    }

    #[test]
    fn test_read_interest_reconciliation() {
        let mut fx = Fixture::new();
        fx.assign("auth", "server-1");
        fx.entity("e1", 0.0, 0.0);
        fx.member("auth", "e1");
        fx.member("read-A", "e1");

        let classifiers = Classifiers::new(
            |_: &FieldMap| BTreeSet::from(["read-B".to_string()]),
            |_: &FieldMap| BTreeSet::from(["read-A".to_string(), "read-B".to_string()]),
            |_: &FieldMap| "auth".to_string(),
        );
        let mut view = ServerView::open(&mut fx.ctx, "main", "server-1", classifiers).unwrap();

        let mut adds = 0;
        let mut removes = 0;
        for _ in 0..10 {
            let report = fx.tick(&mut view, &mut idle);
            adds += report.read_index_adds;
            removes += report.read_index_removes;
        }

        assert_eq!((adds, removes), (1, 1));
        assert!(!fx.present("read-A", "e1"));
        assert!(fx.present("read-B", "e1"));
        assert_eq!(view.read_view().entity_indexes()["e1"], ["read-B"]);
    }

    #[test]
    fn test_close_releases_everything() {
        let mut fx = Fixture::new();
        fx.assign("writeIndex:0,0", "server-1");
        fx.entity("e1", 0.0, 0.0);
        fx.member("writeIndex:0,0", "e1");

        let mut view = ServerView::open(&mut fx.ctx, "main", "server-1", Classifiers::grid(10.0)).unwrap();
        for _ in 0..6 {
            fx.tick(&mut view, &mut idle);
        }
        assert!(fx.ctx.reader_count() > 1);

        view.close(&mut fx.ctx).unwrap();
        assert_eq!(fx.ctx.reader_count(), 0);
    }
}
