//! Per-run resolution of one command template.

use std::collections::HashMap;
use tracing::debug;

use super::marker::{Bound, Clock, Family, MarkerCatalog, Watermark, WatermarkValue};
use crate::Result;

/// Key under which a begin marker's checkpoint is stored.
pub fn checkpoint_key(command_index: usize, marker: &Watermark) -> String {
    format!("{}{}", command_index, marker.literal)
}

/// Working state for one command during one run.
///
/// Holds the rewritten command, its positional arguments, the values
/// seeded for begin markers that had no checkpoint, and the checkpoint
/// values staged for commit once a page has been read.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    command: String,
    args: Vec<WatermarkValue>,
    seeded: HashMap<String, String>,
    staged: HashMap<Family, (String, String)>,
    committed: HashMap<String, String>,
    refreshed: bool,
}

impl Point {
    /// Rewrites every marker in `template` to `?` and binds its argument.
    ///
    /// Markers are visited in catalog order; arguments follow the order the
    /// placeholders appear in the text.
    pub fn resolve(
        command_index: usize,
        template: &str,
        catalog: &MarkerCatalog,
        positions: &HashMap<String, String>,
        clock: &dyn Clock,
    ) -> Result<Self> {
        catalog.validate(template)?;

        let mut bound: Vec<(usize, String, WatermarkValue)> = Vec::new();
        let mut seeded = HashMap::new();
        let mut staged: HashMap<Family, (String, String)> = HashMap::new();

        for marker in catalog.markers() {
            let quoted = marker.quoted();
            let Some(offset) = template.find(&quoted) else {
                continue;
            };
            let fresh = marker.fresh_value(clock);

            let arg = match marker.bound {
                Bound::Begin => {
                    let key = checkpoint_key(command_index, marker);
                    let arg = match positions.get(&key) {
                        Some(stored) => marker.parse_value(&key, stored)?,
                        None => {
                            debug!("Seeding checkpoint {} with {}", key, fresh);
                            let seed = fresh.to_string();
                            if !seed.trim().is_empty() {
                                seeded.insert(key.clone(), seed);
                            }
                            fresh.clone()
                        }
                    };
                    staged.insert(marker.family.clone(), (key, fresh.to_string()));
                    arg
                }
                Bound::End => {
                    // Next run begins where this one ends
                    if let Some((_, value)) = staged.get_mut(&marker.family) {
                        *value = fresh.to_string();
                    }
                    fresh
                }
            };
            bound.push((offset, quoted, arg));
        }

        bound.sort_by_key(|(offset, _, _)| *offset);
        let mut command = template.to_string();
        let mut args = Vec::with_capacity(bound.len());
        for (_, quoted, arg) in bound {
            command = command.replacen(&quoted, "?", 1);
            args.push(arg);
        }

        Ok(Self {
            command,
            args,
            seeded,
            staged,
            committed: HashMap::new(),
            refreshed: false,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[WatermarkValue] {
        &self.args
    }

    /// Checkpoint values chosen for begin markers that had none stored.
    ///
    /// The caller records these before reading, so a run that finds no rows
    /// still fixes the lower bound for the next one.
    pub fn seeded(&self) -> &HashMap<String, String> {
        &self.seeded
    }

    /// Commits staged checkpoint values; called after every non-empty page.
    /// Blank values are never committed.
    pub fn refresh(&mut self) {
        for (key, value) in self.staged.values() {
            if value.trim().is_empty() {
                continue;
            }
            self.committed.insert(key.clone(), value.clone());
            self.refreshed = true;
        }
    }

    pub fn is_refreshed(&self) -> bool {
        self.refreshed
    }

    pub fn committed(&self) -> &HashMap<String, String> {
        &self.committed
    }

    pub fn into_committed(self) -> HashMap<String, String> {
        self.committed
    }
}
