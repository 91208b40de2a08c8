use csv::{ReaderBuilder, WriterBuilder};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::models::TradeRecord;
use crate::Result;

/// Append-only CSV ledger of completed round trips
#[derive(Debug, Clone)]
pub struct TradeLedger {
    path: PathBuf,
}

impl TradeLedger {
    pub fn new(data_dir: impl AsRef<Path>, symbol: &str) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;

        Ok(Self {
            path: dir.join(format!("trades_{}.csv", super::file_key(symbol))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &TradeRecord) -> Result<()> {
        let file_has_data = fs::metadata(&self.path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;

        tracing::info!(
            reason = %record.reason,
            pnl_percent = record.pnl_percent,
            "📒 Trade recorded in {}",
            self.path.display()
        );
        Ok(())
    }

    /// Every recorded trade, oldest first
    pub fn load_all(&self) -> Result<Vec<TradeRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

        let mut records = Vec::new();
        for result in reader.deserialize() {
            let record: TradeRecord = result?;
            records.push(record);
        }

        Ok(records)
    }
}
