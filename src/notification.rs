//! Push-based row change notifications.
//!
//! Each notification already carries its operation, so there is no polling,
//! classification or checkpoint: notifications are forwarded once, in the
//! order the channel delivers them.

use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::event::{ChangeEvent, ChangeOperation, EventDispatcher, Row, SourceMetadata};

/// Operation codes used by change notification channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOperation {
    Insert,
    Update,
    Delete,
    Other(i32),
}

impl RowOperation {
    pub const INSERT: i32 = 2;
    pub const UPDATE: i32 = 4;
    pub const DELETE: i32 = 8;

    pub fn from_code(code: i32) -> Self {
        match code {
            Self::INSERT => RowOperation::Insert,
            Self::UPDATE => RowOperation::Update,
            Self::DELETE => RowOperation::Delete,
            other => RowOperation::Other(other),
        }
    }

    pub fn change_operation(self) -> Option<ChangeOperation> {
        match self {
            RowOperation::Insert => Some(ChangeOperation::Insert),
            RowOperation::Update => Some(ChangeOperation::Update),
            RowOperation::Delete => Some(ChangeOperation::Delete),
            RowOperation::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowChangeNotification {
    pub table_name: String,
    pub event: i32,
    pub data: Vec<Value>,
}

pub struct NotificationExtractor {
    name: String,
    columns: HashMap<String, Vec<String>>,
    dispatcher: Arc<EventDispatcher>,
}

impl NotificationExtractor {
    /// `columns` names the values of each table's notifications in order;
    /// tables without an entry get positional names (`@1`, `@2`, ...).
    pub fn new(
        name: impl Into<String>,
        columns: HashMap<String, Vec<String>>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            dispatcher,
        }
    }

    /// Forwards one notification; returns whether an event was emitted.
    pub async fn handle(&self, notification: RowChangeNotification) -> bool {
        let Some(op) = RowOperation::from_code(notification.event).change_operation() else {
            debug!(
                "Ignoring notification with operation {} on {}",
                notification.event, notification.table_name
            );
            return false;
        };

        let row = self.to_row(&notification.table_name, notification.data);
        let source = SourceMetadata::new(self.name.clone());
        let event = ChangeEvent::from_row(notification.table_name, op, row, source);
        self.dispatcher.emit(&event).await;
        true
    }

    /// Consumes the channel until every sender is dropped.
    pub async fn run(&self, receiver: mpsc::Receiver<RowChangeNotification>) -> u64 {
        info!("Notification extractor {} listening", self.name);
        let mut stream = ReceiverStream::new(receiver);
        let mut forwarded = 0;
        while let Some(notification) = stream.next().await {
            if self.handle(notification).await {
                forwarded += 1;
            }
        }
        info!(
            "Notification channel for {} closed after {} events",
            self.name, forwarded
        );
        forwarded
    }

    fn to_row(&self, table: &str, data: Vec<Value>) -> Row {
        let names = self.columns.get(table);
        data.into_iter()
            .enumerate()
            .map(|(i, value)| {
                let name = names
                    .and_then(|n| n.get(i))
                    .cloned()
                    .unwrap_or_else(|| format!("@{}", i + 1));
                (name, value)
            })
            .collect()
    }
}
