//! Node - one server process driving its authority orchestrator

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use shoal_core::ShoalResult;
use shoal_store::{InMemoryStore, StoreClient};
use shoal_stream::{ReconcilingWriter, StreamContext};
use shoal_transport::TcpStoreClient;
use shoal_views::{Classifiers, EntityLogic, ServerView, TickReport};

use crate::NodeConfig;

#[derive(Clone, Debug, Default)]
pub struct RuntimeStats {
    pub ticks: u64,
    /// Valid owned entities as of the last tick
    pub entities_owned: usize,
    /// Authority indexes assigned as of the last tick
    pub indexes_owned: usize,
    pub updates_published: u64,
    pub read_index_changes: u64,
    pub migrations: u64,
    pub failed_batches: u64,
    pub last_tick_duration: Duration,
}

/// A running server: connections, writer, orchestrator and domain logic
pub struct Node {
    config: NodeConfig,
    ctx: StreamContext,
    writer: ReconcilingWriter,
    server: ServerView,
    logic: Box<dyn EntityLogic + Send>,
    stats: RuntimeStats,
    last_tick: Option<Instant>,
    closed: bool,
}

impl Node {
    /// Build a node over three store connections: pub/sub, snapshot reads
    /// and writes
    pub fn new(
        config: NodeConfig,
        subscriber: Box<dyn StoreClient>,
        commands: Box<dyn StoreClient>,
        writes: Box<dyn StoreClient>,
        classifiers: Classifiers,
        logic: Box<dyn EntityLogic + Send>,
    ) -> ShoalResult<Self> {
        config.validate()?;

        let mut ctx = StreamContext::new(subscriber, commands, config.stream.clone())?;
        let server = ServerView::open(
            &mut ctx,
            &config.assignment_key,
            &config.server_name,
            classifiers,
        )?;
        let writer = ReconcilingWriter::new(writes);

        tracing::info!(
            server = %config.server_name,
            writer_tag = writer.tag(),
            "node created"
        );

        Ok(Node {
            config,
            ctx,
            writer,
            server,
            logic,
            stats: RuntimeStats::default(),
            last_tick: None,
            closed: false,
        })
    }

    /// Node backed by an in-process store
    pub fn in_memory(
        store: &InMemoryStore,
        config: NodeConfig,
        classifiers: Classifiers,
        logic: Box<dyn EntityLogic + Send>,
    ) -> ShoalResult<Self> {
        Self::new(
            config,
            Box::new(store.connect()),
            Box::new(store.connect()),
            Box::new(store.connect()),
            classifiers,
            logic,
        )
    }

    /// Open three connections to `config.store_addr`
    pub async fn connect(
        config: NodeConfig,
        classifiers: Classifiers,
        logic: Box<dyn EntityLogic + Send>,
    ) -> ShoalResult<Self> {
        let addr = config.store_addr.as_str();
        let subscriber = TcpStoreClient::connect(addr, config.database).await?;
        let commands = TcpStoreClient::connect(addr, config.database).await?;
        let writes = TcpStoreClient::connect(addr, config.database).await?;
        tracing::info!(addr = %addr, db = config.database, "connected to store");

        Self::new(
            config,
            Box::new(subscriber),
            Box::new(commands),
            Box::new(writes),
            classifiers,
            logic,
        )
    }

    /// Tick with `dt` measured from the previous tick
    pub fn tick(&mut self) -> ShoalResult<TickReport> {
        let now = Instant::now();
        let dt = match self.last_tick {
            Some(last) => now.duration_since(last),
            None => self.config.tick_interval(),
        };
        self.last_tick = Some(now);
        self.tick_with_dt(dt.as_secs_f64())
    }

    /// Execute one tick with an explicit time step in seconds
    pub fn tick_with_dt(&mut self, dt: f64) -> ShoalResult<TickReport> {
        let start = Instant::now();

        // Stage 1: Drain connections
        self.ctx.begin_tick();

        // Stage 2: Orchestrate
        let report = self
            .server
            .tick(&mut self.ctx, &mut self.writer, self.logic.as_mut(), dt)?;

        // Stage 3: Confirm writes
        let failed = self.writer.drain_replies();
        if failed > 0 {
            tracing::warn!(failed, "write batches rejected");
        }

        // Stage 4: Flush
        self.writer.flush()?;
        self.ctx.flush()?;

        // Stage 5: Stats
        self.stats.ticks += 1;
        self.stats.entities_owned = report.owned_entities;
        self.stats.indexes_owned = report.owned_indexes;
        self.stats.updates_published += report.updates_published as u64;
        self.stats.read_index_changes +=
            (report.read_index_adds + report.read_index_removes) as u64;
        self.stats.migrations += report.migrations.len() as u64;
        self.stats.failed_batches += failed as u64;
        self.stats.last_tick_duration = start.elapsed();

        Ok(report)
    }

    /// Tick every `tick_interval` until `shutdown` becomes true or its
    /// sender is dropped, then release every reader
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> ShoalResult<()> {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            server = %self.config.server_name,
            interval_ms = self.config.tick_interval_ms,
            "node running"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        tracing::error!(server = %self.config.server_name, error = %e, "tick failed");
                        return Err(e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.shutdown()
    }

    /// Close the orchestrator's readers and flush what is left
    pub fn shutdown(&mut self) -> ShoalResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.server.close(&mut self.ctx)?;
        self.writer.flush()?;
        self.ctx.flush()?;

        tracing::info!(
            server = %self.config.server_name,
            ticks = self.stats.ticks,
            "node stopped"
        );
        Ok(())
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.server_name
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn server(&self) -> &ServerView {
        &self.server
    }

    pub fn context(&self) -> &StreamContext {
        &self.ctx
    }

    pub fn writer(&self) -> &ReconcilingWriter {
        &self.writer
    }

    /// Authority keys currently assigned to this node
    pub fn owned_indexes(&self) -> Vec<String> {
        self.server.owned_indexes(&self.ctx)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
