use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::classifier::Classifier;
use super::marker::{Clock, MarkerCatalog, SystemClock, WatermarkValue};
use super::point::Point;
use crate::checkpoint::{PositionStore, Positions};
use crate::config::{CommandConfig, Config, ConnectorConfig};
use crate::event::{ChangeEvent, ErrorEvent, EventDispatcher, Row, SourceMetadata};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::{Error, Result};

/// Executes a resolved command and returns one page of rows.
#[async_trait]
pub trait RowReader: Send + Sync {
    async fn read(
        &self,
        connector: &ConnectorConfig,
        command: &str,
        args: &[WatermarkValue],
        page_index: u64,
        page_size: usize,
    ) -> anyhow::Result<Vec<Row>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed { events: u64 },
    /// A previous run was still in flight
    Skipped,
    Failed,
}

/// Clears the busy flag on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Polls change-log queries and turns classified rows into change events.
pub struct PollingExtractor {
    name: String,
    task_key: String,
    schedule: String,
    connector: ConnectorConfig,
    commands: Vec<CommandConfig>,
    page_size: usize,
    catalog: MarkerCatalog,
    classifier: Classifier,
    reader: Arc<dyn RowReader>,
    store: Arc<dyn PositionStore>,
    dispatcher: Arc<EventDispatcher>,
    clock: Arc<dyn Clock>,
    positions: Mutex<Positions>,
    busy: AtomicBool,
}

impl PollingExtractor {
    pub fn new(
        config: &Config,
        reader: Arc<dyn RowReader>,
        store: Arc<dyn PositionStore>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            name: config.mapping.id.clone(),
            task_key: config.task_key(),
            schedule: config.listener.schedule.clone(),
            connector: config.connector.clone(),
            commands: config.listener.commands.clone(),
            page_size: config.listener.read_num,
            catalog: config.marker_catalog(),
            classifier: config.classifier(),
            reader,
            store,
            dispatcher,
            clock: Arc::new(SystemClock),
            positions: Mutex::new(Positions::new()),
            busy: AtomicBool::new(false),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn positions(&self) -> Positions {
        self.positions.lock().await.clone()
    }

    /// Loads persisted positions, runs once, then hands itself to `scheduler`.
    pub async fn start(self: &Arc<Self>, scheduler: &dyn Scheduler) -> Result<RunStatus> {
        self.load_positions().await?;
        info!(
            "Starting polling extractor {} with {} commands",
            self.name,
            self.commands.len()
        );
        let status = self.run().await;
        scheduler
            .start(&self.task_key, &self.schedule, self.clone())
            .await?;
        Ok(status)
    }

    pub async fn load_positions(&self) -> Result<()> {
        let loaded = self.store.load().await?;
        debug!("Extractor {} loaded {} positions", self.name, loaded.len());
        *self.positions.lock().await = loaded;
        Ok(())
    }

    pub async fn close(&self, scheduler: &dyn Scheduler) {
        if scheduler.stop(&self.task_key).await {
            info!("Closed polling extractor {}", self.name);
        }
    }

    /// Runs every command once, unless a previous run is still going.
    pub async fn run(&self) -> RunStatus {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Extractor {} still running, skipping tick", self.name);
            return RunStatus::Skipped;
        }
        let _guard = BusyGuard(&self.busy);

        match self.run_commands().await {
            Ok(events) => {
                debug!("Extractor {} emitted {} events", self.name, events);
                RunStatus::Completed { events }
            }
            Err(e) => {
                error!("Extractor {} failed: {}", self.name, e);
                self.dispatcher
                    .emit_error(&ErrorEvent::new(self.name.clone(), e.to_string()))
                    .await;
                RunStatus::Failed
            }
        }
    }

    /// Resolves each command and returns the rewritten text and arguments
    /// without reading or persisting anything.
    pub async fn resolve_all(&self) -> Result<Vec<(String, Vec<WatermarkValue>)>> {
        let positions = self.positions.lock().await;
        self.commands
            .iter()
            .enumerate()
            .map(|(index, command)| {
                let point = Point::resolve(
                    index,
                    &command.query,
                    &self.catalog,
                    &positions,
                    self.clock.as_ref(),
                )?;
                Ok((point.command().to_string(), point.args().to_vec()))
            })
            .collect()
    }

    async fn run_commands(&self) -> Result<u64> {
        // Fail on bad templates before any command reads
        for command in &self.commands {
            self.catalog.validate(&command.query)?;
        }

        let mut positions = self.positions.lock().await;
        let mut events = 0;
        for (index, command) in self.commands.iter().enumerate() {
            events += self.run_command(index, command, &mut positions).await?;
        }
        Ok(events)
    }

    async fn run_command(
        &self,
        index: usize,
        command: &CommandConfig,
        positions: &mut Positions,
    ) -> Result<u64> {
        let mut point = Point::resolve(
            index,
            &command.query,
            &self.catalog,
            positions,
            self.clock.as_ref(),
        )?;
        debug!("Command {} resolved to {:?} {:?}", index, point.command(), point.args());

        // Seeds are persisted before reading so an empty or failed run
        // keeps its lower bound
        let mut seeded = false;
        for (key, value) in point.seeded() {
            if !positions.contains_key(key) {
                positions.insert(key.clone(), value.clone());
                seeded = true;
            }
        }
        if seeded {
            self.store.save(positions).await?;
            debug!("Extractor {} seeded positions for command {}", self.name, index);
        }

        let mut page_index = 1u64;
        let mut events = 0u64;
        loop {
            let rows = self
                .reader
                .read(
                    &self.connector,
                    point.command(),
                    point.args(),
                    page_index,
                    self.page_size,
                )
                .await
                .map_err(|source| Error::ExtractionExecution {
                    command: index,
                    source,
                })?;
            let page = page_index;
            page_index += 1;
            if rows.is_empty() {
                break;
            }

            trace!("Command {} page {}: {} rows", index, page, rows.len());
            for row in rows {
                let Some(op) = self.classifier.classify(&row) else {
                    trace!("Skipping row without a recognised {}", self.classifier.field());
                    continue;
                };
                let source = SourceMetadata::new(self.name.clone())
                    .with_position(format!("{}:{}", index, page));
                let event = ChangeEvent::from_row(command.table.clone(), op, row, source);
                self.dispatcher.emit(&event).await;
                events += 1;
            }
            point.refresh();
        }

        if point.is_refreshed() {
            positions.extend(point.into_committed());
            self.store.save(positions).await?;
            info!("Extractor {} committed positions for command {}", self.name, index);
        }
        Ok(events)
    }
}

#[async_trait]
impl ScheduledTask for PollingExtractor {
    async fn run_scheduled(&self) {
        self.run().await;
    }
}
