//! Persisted simulation state.
//!
//! The simulation subsystem owns this blob; the exit monitor only reads it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aiguard_core::Position;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PositionResult;

/// Simulation state as persisted by the simulation subsystem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationState {
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub open_positions: Vec<Position>,
}

impl SimulationState {
    /// Active, not paused and holding at least one position.
    pub fn has_work(&self) -> bool {
        self.is_active && !self.is_paused && !self.open_positions.is_empty()
    }

    pub fn position(&self, id: &str) -> Option<&Position> {
        self.open_positions.iter().find(|p| p.id == id)
    }
}

/// Authoritative simulation state, re-read on every use.
#[async_trait]
pub trait SimulationStateSource: Send + Sync {
    async fn load(&self) -> PositionResult<SimulationState>;
}

/// Reads the state from a JSON file. A missing file is an inactive
/// simulation.
#[derive(Debug, Clone)]
pub struct JsonFileStateSource {
    path: PathBuf,
}

impl JsonFileStateSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SimulationStateSource for JsonFileStateSource {
    async fn load(&self) -> PositionResult<SimulationState> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No simulation state file");
                return Ok(SimulationState::default());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// In-memory state shared with an embedded simulation.
#[derive(Debug, Clone, Default)]
pub struct SharedStateSource {
    state: Arc<RwLock<SimulationState>>,
}

impl SharedStateSource {
    pub fn new(state: SimulationState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Replace the state.
    pub fn set(&self, state: SimulationState) {
        *self.state.write() = state;
    }

    /// Mutate the state in place.
    pub fn update(&self, f: impl FnOnce(&mut SimulationState)) {
        f(&mut self.state.write());
    }

    pub fn get(&self) -> SimulationState {
        self.state.read().clone()
    }
}

#[async_trait]
impl SimulationStateSource for SharedStateSource {
    async fn load(&self) -> PositionResult<SimulationState> {
        Ok(self.get())
    }
}
