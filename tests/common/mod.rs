#![allow(dead_code)]

use async_trait::async_trait;
use cdc_capture::config::{
    CommandConfig, Config, ConnectorConfig, ListenerConfig, ListenerType, MappingConfig,
    MarkerConfig, PositionConfig,
};
use cdc_capture::event::{ChangeEvent, ChangeListener, ErrorEvent, Row};
use cdc_capture::meta::SyncModel;
use cdc_capture::polling::{Bound, RowReader, WatermarkValue};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify};

/// Polling configuration with one `beginId` literal marker defaulting to 0.
pub fn test_config(commands: &[(&str, &str)]) -> Config {
    Config {
        connector: ConnectorConfig {
            url: "mysql://test@localhost/shop".to_string(),
            properties: HashMap::new(),
        },
        mapping: MappingConfig {
            id: format!("test_mapping_{}", std::process::id()),
            model: SyncModel::Increment,
        },
        listener: ListenerConfig {
            listener_type: ListenerType::Timing,
            schedule: "*/30 * * * * ?".to_string(),
            read_num: 2,
            event_field_name: "op".to_string(),
            update: "U".to_string(),
            insert: "I".to_string(),
            delete: "D".to_string(),
            commands: commands
                .iter()
                .map(|(table, query)| CommandConfig {
                    table: table.to_string(),
                    query: query.to_string(),
                })
                .collect(),
            markers: vec![MarkerConfig {
                literal: "beginId".to_string(),
                bound: Bound::Begin,
                default_value: "0".to_string(),
            }],
            columns: HashMap::new(),
        },
        position: PositionConfig {
            path: PathBuf::from("positions.json"),
        },
    }
}

pub fn row(id: i64, op: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), serde_json::json!(id));
    row.insert("op".to_string(), serde_json::json!(op));
    row
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadCall {
    pub command: String,
    pub args: Vec<WatermarkValue>,
    pub page_index: u64,
    pub page_size: usize,
}

/// Serves queued pages, then empty pages forever.
#[derive(Default)]
pub struct PagedReader {
    pages: Mutex<VecDeque<Vec<Row>>>,
    calls: Mutex<Vec<ReadCall>>,
}

impl PagedReader {
    pub fn new(pages: Vec<Vec<Row>>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn push_page(&self, page: Vec<Row>) {
        self.pages.lock().await.push_back(page);
    }

    pub async fn calls(&self) -> Vec<ReadCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl RowReader for PagedReader {
    async fn read(
        &self,
        _connector: &ConnectorConfig,
        command: &str,
        args: &[WatermarkValue],
        page_index: u64,
        page_size: usize,
    ) -> anyhow::Result<Vec<Row>> {
        self.calls.lock().await.push(ReadCall {
            command: command.to_string(),
            args: args.to_vec(),
            page_index,
            page_size,
        });
        Ok(self.pages.lock().await.pop_front().unwrap_or_default())
    }
}

/// Blocks inside `read` until released.
#[derive(Default)]
pub struct BlockingReader {
    pub entered: Notify,
    pub release: Notify,
    pub calls: AtomicUsize,
}

#[async_trait]
impl RowReader for BlockingReader {
    async fn read(
        &self,
        _connector: &ConnectorConfig,
        _command: &str,
        _args: &[WatermarkValue],
        _page_index: u64,
        _page_size: usize,
    ) -> anyhow::Result<Vec<Row>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(Vec::new())
    }
}

pub struct FailingReader;

#[async_trait]
impl RowReader for FailingReader {
    async fn read(
        &self,
        _connector: &ConnectorConfig,
        _command: &str,
        _args: &[WatermarkValue],
        _page_index: u64,
        _page_size: usize,
    ) -> anyhow::Result<Vec<Row>> {
        anyhow::bail!("connection refused")
    }
}

#[derive(Default)]
pub struct CollectingListener {
    pub events: Mutex<Vec<ChangeEvent>>,
    pub errors: Mutex<Vec<ErrorEvent>>,
}

#[async_trait]
impl ChangeListener for CollectingListener {
    async fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }

    async fn on_error(&self, event: &ErrorEvent) {
        self.errors.lock().await.push(event.clone());
    }
}
