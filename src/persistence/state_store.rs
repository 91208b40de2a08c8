use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::{BotState, PendingEntry, Position};
use crate::{BotError, Result};

/// On-disk position record
///
/// Every field is optional so a damaged record can be detected instead of
/// failing the whole load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredPosition {
    entry_price: Option<f64>,
    size: Option<f64>,
    entry_time: Option<DateTime<Utc>>,
    sl_price: Option<f64>,
    tp_price: Option<f64>,
    trailing_sl_price: Option<f64>,
    #[serde(default)]
    trailing_activated: bool,
    highest_price_since_activation: Option<f64>,
    #[serde(default)]
    entry_approximated: bool,
}

/// On-disk state layout, keyed by symbol
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredState {
    symbol: Option<String>,
    #[serde(default)]
    has_position: bool,
    position: Option<StoredPosition>,
    #[serde(default)]
    pending_confirmation: bool,
    pending_signal_time: Option<DateTime<Utc>>,
    pending_candle_open_time: Option<DateTime<Utc>>,
    last_realized_loss_time: Option<DateTime<Utc>>,
    last_modified: Option<DateTime<Utc>>,
}

impl From<&BotState> for StoredState {
    fn from(state: &BotState) -> Self {
        Self {
            symbol: Some(state.symbol.clone()),
            has_position: state.has_position(),
            position: state.position.as_ref().map(|p| StoredPosition {
                entry_price: Some(p.entry_price),
                size: Some(p.size),
                entry_time: Some(p.entry_time),
                sl_price: Some(p.sl_price),
                tp_price: Some(p.tp_price),
                trailing_sl_price: Some(p.trailing_sl_price),
                trailing_activated: p.trailing_activated,
                highest_price_since_activation: p.highest_price_since_activation,
                entry_approximated: p.entry_approximated,
            }),
            pending_confirmation: state.pending_confirmation(),
            pending_signal_time: state.pending.as_ref().map(|p| p.signal_time),
            pending_candle_open_time: state.pending.as_ref().map(|p| p.candle_open_time),
            last_realized_loss_time: state.last_realized_loss_time,
            last_modified: Some(state.last_modified),
        }
    }
}

fn rebuild_position(stored: StoredPosition) -> std::result::Result<Position, String> {
    let entry_price = stored.entry_price.ok_or("position missing entry_price")?;
    let size = stored.size.ok_or("position missing size")?;
    let sl_price = stored.sl_price.ok_or("position missing sl_price")?;
    let tp_price = stored.tp_price.ok_or("position missing tp_price")?;
    let entry_time = stored.entry_time.ok_or("position missing entry_time")?;

    let position = Position {
        entry_price,
        size,
        entry_time,
        sl_price,
        tp_price,
        trailing_sl_price: stored.trailing_sl_price.unwrap_or(sl_price),
        trailing_activated: stored.trailing_activated,
        highest_price_since_activation: stored.highest_price_since_activation,
        entry_approximated: stored.entry_approximated,
    };
    position.validate()?;
    Ok(position)
}

/// Result of loading the state file
#[derive(Debug, Clone)]
pub struct LoadedState {
    pub state: BotState,
    /// Set when the stored position had to be discarded
    pub corruption: Option<String>,
}

/// Atomic JSON store for the bot state
///
/// Writes go to a temp file in the same directory, are fsynced and then
/// renamed over the target, so a crash never leaves a half-written file.
#[derive(Debug, Clone)]
pub struct StateStore {
    symbol: String,
    path: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: impl AsRef<Path>, symbol: &str) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;

        let file_name = format!("state_{}.json", super::file_key(symbol));
        Ok(Self {
            symbol: symbol.to_string(),
            path: dir.join(file_name),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state, falling back to defaults on first run
    ///
    /// A damaged position never aborts the load: it is dropped (state is FLAT)
    /// and described in `corruption`.
    pub fn load(&self) -> Result<LoadedState> {
        if !self.path.exists() {
            tracing::warn!(
                "{} not found, starting with default state",
                self.path.display()
            );
            return Ok(LoadedState {
                state: BotState::new(&self.symbol),
                corruption: None,
            });
        }

        let raw = fs::read_to_string(&self.path)?;
        let stored: StoredState = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                return Ok(LoadedState {
                    state: BotState::new(&self.symbol),
                    corruption: Some(format!("state file unreadable: {}", e)),
                })
            }
        };

        Ok(self.rebuild(stored))
    }

    fn rebuild(&self, stored: StoredState) -> LoadedState {
        let mut state = BotState::new(stored.symbol.unwrap_or_else(|| self.symbol.clone()));
        let mut corruption = None;

        if stored.has_position {
            match stored.position.map(rebuild_position) {
                Some(Ok(position)) => state.position = Some(position),
                Some(Err(reason)) => corruption = Some(reason),
                None => corruption = Some("has_position set without a position record".into()),
            }
        }

        if stored.pending_confirmation && state.position.is_none() && corruption.is_none() {
            match (stored.pending_signal_time, stored.pending_candle_open_time) {
                (Some(signal_time), Some(candle_open_time)) => {
                    state.pending = Some(PendingEntry {
                        signal_time,
                        candle_open_time,
                    })
                }
                _ => tracing::warn!("Dropping pending entry with missing timestamps"),
            }
        }

        state.last_realized_loss_time = stored.last_realized_loss_time;
        if let Some(modified) = stored.last_modified {
            state.last_modified = modified;
        }

        LoadedState { state, corruption }
    }

    pub fn save(&self, state: &BotState) -> Result<()> {
        let json = serde_json::to_string_pretty(&StoredState::from(state))?;

        let tmp = self
            .path
            .with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4()));
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };

        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(BotError::Persistence(format!(
                "failed to write {}: {}",
                self.path.display(),
                e
            )));
        }

        tracing::debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}
