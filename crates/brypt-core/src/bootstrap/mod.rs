//! The bootstrap cache: remembers how to reach peers across restarts.
//! Records are staged as pending updates and applied atomically, and
//! persistence to a file is optional — a cache with no bound path is a
//! pure in-memory cache used by tests.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::{EventPublisher, RuntimeEvent};

/// How a bootstrap record was learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    User,
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapRecord {
    pub protocol: String,
    pub remote_address: String,
    pub origin: Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateResult {
    pub applied: usize,
    pub difference: isize,
}

/// A staged mutation, applied atomically by `update_cache`.
enum PendingChange {
    Insert(BootstrapRecord),
    Remove { protocol: String, remote_address: String },
}

pub struct BootstrapCache {
    records: HashMap<(String, String), BootstrapRecord>,
    pending: Vec<PendingChange>,
    file: Option<PathBuf>,
}

impl BootstrapCache {
    pub fn new() -> Self {
        Self { records: HashMap::new(), pending: Vec::new(), file: None }
    }

    /// A cache bound to a file: `load` reads any existing records, and each
    /// `update_cache` call persists the resulting set.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self { records: HashMap::new(), pending: Vec::new(), file: Some(path.into()) }
    }

    pub fn load(&mut self) -> Result<()> {
        let Some(path) = &self.file else { return Ok(()) };
        if !path.exists() {
            return Ok(());
        }
        let contents = fs::read_to_string(path)?;
        let records: Vec<BootstrapRecord> = serde_json::from_str(&contents)
            .map_err(|e| crate::error::Error::InvalidConfig(e.to_string()))?;
        for record in records {
            self.records.insert((record.protocol.clone(), record.remote_address.clone()), record);
        }
        Ok(())
    }

    /// Stages a record for the next `update_cache` call; does not take
    /// effect immediately.
    pub fn stage(&mut self, protocol: impl Into<String>, remote_address: impl Into<String>, origin: Origin) {
        self.pending.push(PendingChange::Insert(BootstrapRecord {
            protocol: protocol.into(),
            remote_address: remote_address.into(),
            origin,
        }));
    }

    /// Stages removal of a record for the next `update_cache` call.
    pub fn stage_removal(&mut self, protocol: impl Into<String>, remote_address: impl Into<String>) {
        self.pending.push(PendingChange::Remove { protocol: protocol.into(), remote_address: remote_address.into() });
    }

    /// Applies every staged change atomically, persists if bound to a file,
    /// and returns how many changes were applied and the net change in
    /// cache size.
    pub fn update_cache(&mut self) -> Result<UpdateResult> {
        let before = self.records.len();
        let applied = self.pending.len();
        for change in self.pending.drain(..) {
            match change {
                PendingChange::Insert(record) => {
                    self.records.insert((record.protocol.clone(), record.remote_address.clone()), record);
                }
                PendingChange::Remove { protocol, remote_address } => {
                    self.records.remove(&(protocol, remote_address));
                }
            }
        }
        let difference = self.records.len() as isize - before as isize;

        if let Some(path) = &self.file {
            let all: Vec<&BootstrapRecord> = self.records.values().collect();
            let serialized = serde_json::to_string_pretty(&all)
                .map_err(|e| crate::error::Error::InvalidConfig(e.to_string()))?;
            fs::write(path, serialized)?;
        }

        Ok(UpdateResult { applied, difference })
    }

    pub fn contains(&self, protocol: &str, remote_address: &str) -> bool {
        self.records.contains_key(&(protocol.to_string(), remote_address.to_string()))
    }

    pub fn records(&self) -> impl Iterator<Item = &BootstrapRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}

impl Default for BootstrapCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscribes a bootstrap cache to `EndpointStarted`/`EndpointStopped`
/// runtime events rather than holding a raw observer pointer into the
/// proxy store: a started endpoint stages a network-origin record keyed by
/// its remote address, and a stopped endpoint stages that record's removal.
pub fn record_from_event(cache: &mut BootstrapCache, event: &RuntimeEvent) {
    match event {
        RuntimeEvent::EndpointStarted { protocol, remote_address } if !remote_address.is_empty() => {
            cache.stage(protocol.clone(), remote_address.clone(), Origin::Network);
        }
        RuntimeEvent::EndpointStopped { protocol, remote_address } if !remote_address.is_empty() => {
            cache.stage_removal(protocol.clone(), remote_address.clone());
        }
        _ => {}
    }
}
