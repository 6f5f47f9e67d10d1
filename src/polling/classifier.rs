use serde_json::Value;
use std::collections::HashSet;

use crate::event::{ChangeOperation, Row};

/// Maps a row's discriminator value to an operation.
///
/// Rules are checked update, insert, delete; the first match wins.
#[derive(Debug, Clone)]
pub struct Classifier {
    field: String,
    rules: Vec<(ChangeOperation, HashSet<String>)>,
}

impl Classifier {
    pub fn new(field: impl Into<String>, update: &str, insert: &str, delete: &str) -> Self {
        Self {
            field: field.into(),
            rules: vec![
                (ChangeOperation::Update, split_values(update)),
                (ChangeOperation::Insert, split_values(insert)),
                (ChangeOperation::Delete, split_values(delete)),
            ],
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// `None` when the discriminator is missing, null, or matches no rule.
    pub fn classify(&self, row: &Row) -> Option<ChangeOperation> {
        let value = match row.get(&self.field)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => return None,
        };
        self.rules
            .iter()
            .find(|(_, values)| values.contains(&value))
            .map(|(op, _)| *op)
    }
}

fn split_values(list: &str) -> HashSet<String> {
    list.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}
