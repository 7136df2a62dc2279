//! Multi-node cluster harness
//!
//! Wires N nodes to one `InMemoryStore`, with a separate seeding writer for
//! assignments, entities and index membership. Nodes are ticked in lockstep.

use bytes::Bytes;

use shoal_core::{f64_value, is_present, FieldMap, ReaderId, ShoalError, ShoalResult};
use shoal_runtime::{MotionLogic, Node, NodeConfig};
use shoal_store::InMemoryStore;
use shoal_stream::{ReconcilingWriter, StreamConfig, StreamContext};
use shoal_views::{write_to_index, Classifiers, EntityLogic, TickReport};

use crate::chaos::{ChaosClient, ChaosConfig};

/// Assignment index key used by every cluster node
pub const ASSIGNMENT_KEY: &str = "main";

/// Nodes sharing one in-memory store
pub struct Cluster {
    store: InMemoryStore,
    seed: ReconcilingWriter,
    nodes: Vec<Node>,
    cell_size: f64,
}

impl Cluster {
    pub fn new() -> Self {
        Self::with_cell_size(10.0)
    }

    pub fn with_cell_size(cell_size: f64) -> Self {
        let store = InMemoryStore::new();
        let seed = ReconcilingWriter::new(Box::new(store.connect()));
        Cluster {
            store,
            seed,
            nodes: Vec::new(),
            cell_size,
        }
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    fn config(&self, name: &str) -> NodeConfig {
        NodeConfig {
            cell_size: self.cell_size,
            assignment_key: ASSIGNMENT_KEY.into(),
            ..NodeConfig::local(name)
        }
    }

    /// Add a node running `MotionLogic` with grid classifiers
    pub fn add_node(&mut self, name: &str) -> ShoalResult<usize> {
        let config = self.config(name);
        let classifiers = config.classifiers();
        self.add_node_with(config, classifiers, Box::new(MotionLogic::new()))
    }

    pub fn add_node_with(
        &mut self,
        config: NodeConfig,
        classifiers: Classifiers,
        logic: Box<dyn EntityLogic + Send>,
    ) -> ShoalResult<usize> {
        let node = Node::in_memory(&self.store, config, classifiers, logic)?;
        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }

    /// Add a node whose snapshot-read connection goes through a chaos client
    pub fn add_chaotic_node(
        &mut self,
        name: &str,
        chaos: ChaosConfig,
        seed: u64,
    ) -> ShoalResult<usize> {
        self.add_chaotic_node_with(name, chaos, ChaosConfig::none(), seed)
    }

    /// Add a node with separate chaos on its snapshot-read and pub/sub
    /// connections
    pub fn add_chaotic_node_with(
        &mut self,
        name: &str,
        commands: ChaosConfig,
        log: ChaosConfig,
        seed: u64,
    ) -> ShoalResult<usize> {
        let config = self.config(name);
        let classifiers = config.classifiers();
        let subscriber = ChaosClient::new(self.store.connect(), log, seed.wrapping_add(1));
        let commands = ChaosClient::new(self.store.connect(), commands, seed);
        let node = Node::new(
            config,
            Box::new(subscriber),
            Box::new(commands),
            Box::new(self.store.connect()),
            classifiers,
            Box::new(MotionLogic::new()),
        )?;
        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name() == name)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Assign an authority index to a server
    pub fn assign(&mut self, index: &str, server: &str) -> ShoalResult<()> {
        let mut diff = FieldMap::new();
        diff.insert(index.into(), Bytes::copy_from_slice(server.as_bytes()));
        self.seed.send(ASSIGNMENT_KEY, &diff, &[])?;
        Ok(())
    }

    /// Write an entity with position and velocity
    pub fn seed_entity(&mut self, key: &str, x: f64, y: f64, vx: f64, vy: f64) -> ShoalResult<()> {
        let mut fields = FieldMap::new();
        fields.insert("x".into(), f64_value(x));
        fields.insert("y".into(), f64_value(y));
        fields.insert("vx".into(), f64_value(vx));
        fields.insert("vy".into(), f64_value(vy));
        self.seed.send(key, &fields, &[])?;
        Ok(())
    }

    /// Write arbitrary fields to a key through the seeding writer
    pub fn write(&mut self, key: &str, fields: &FieldMap, events: &[Bytes]) -> ShoalResult<()> {
        self.seed.send(key, fields, events)?;
        Ok(())
    }

    pub fn add_to_index(&mut self, index: &str, member: &str) -> ShoalResult<()> {
        write_to_index(&mut self.seed, index, member, true)?;
        Ok(())
    }

    pub fn remove_from_index(&mut self, index: &str, member: &str) -> ShoalResult<()> {
        write_to_index(&mut self.seed, index, member, false)?;
        Ok(())
    }

    /// Tick every node once with a fixed time step
    pub fn tick_all(&mut self, dt: f64) -> ShoalResult<Vec<TickReport>> {
        let reports = self
            .nodes
            .iter_mut()
            .map(|node| node.tick_with_dt(dt))
            .collect::<ShoalResult<Vec<_>>>()?;
        self.seed.drain_replies();
        Ok(reports)
    }

    /// Tick `n` times, collecting every node's reports
    pub fn run_ticks(&mut self, n: usize, dt: f64) -> ShoalResult<Vec<Vec<TickReport>>> {
        (0..n).map(|_| self.tick_all(dt)).collect()
    }

    /// Tick until `done` holds, up to `max_ticks`
    pub fn tick_until<F>(&mut self, max_ticks: usize, dt: f64, mut done: F) -> ShoalResult<usize>
    where
        F: FnMut(&Cluster) -> bool,
    {
        for tick in 0..max_ticks {
            if done(&*self) {
                return Ok(tick);
            }
            self.tick_all(dt)?;
        }
        if done(&*self) {
            Ok(max_ticks)
        } else {
            Err(ShoalError::Protocol(format!(
                "condition not reached after {max_ticks} ticks"
            )))
        }
    }

    /// Authoritative store state of a key
    pub fn hash(&self, key: &str) -> Option<FieldMap> {
        self.store.hash(key)
    }

    pub fn is_member(&self, index: &str, member: &str) -> bool {
        self.store
            .hash(index)
            .is_some_and(|hash| is_present(&hash, member))
    }

    /// Nodes holding a valid view of `entity` in their write view
    pub fn owners(&self, entity: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|node| {
                node.server()
                    .write_view()
                    .entity(entity)
                    .is_some_and(|view| view.is_valid())
            })
            .map(Node::name)
            .collect()
    }

    /// A standalone reading context on the cluster's store
    pub fn observer(&self) -> ShoalResult<Observer> {
        self.lagged_observer(ChaosConfig::none(), 0)
    }

    /// An observer whose pub/sub connection goes through a chaos client
    pub fn lagged_observer(&self, log: ChaosConfig, seed: u64) -> ShoalResult<Observer> {
        let ctx = StreamContext::new(
            Box::new(ChaosClient::new(self.store.connect(), log, seed)),
            Box::new(self.store.connect()),
            StreamConfig::local(),
        )?;
        Ok(Observer { ctx })
    }

    /// Close every node's readers
    pub fn shutdown(&mut self) -> ShoalResult<()> {
        for node in &mut self.nodes {
            node.shutdown()?;
        }
        Ok(())
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader-only participant, ticked independently of the nodes
pub struct Observer {
    ctx: StreamContext,
}

impl Observer {
    pub fn open(&mut self, key: &str) -> ShoalResult<ReaderId> {
        self.ctx.open_reader(key)
    }

    /// Run one tick and poll every given reader
    pub fn tick(&mut self, readers: &[ReaderId]) -> ShoalResult<()> {
        self.ctx.begin_tick();
        for reader in readers {
            self.ctx.poll_reader(*reader)?;
        }
        self.ctx.flush()
    }

    pub fn data(&self, reader: ReaderId) -> Option<&FieldMap> {
        self.ctx.data(reader)
    }

    pub fn context(&self) -> &StreamContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut StreamContext {
        &mut self.ctx
    }
}

