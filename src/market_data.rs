use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::models::Bar;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    bars: Vec<Bar>,
    sector_map: HashMap<String, String>,
}

/// Validated bar series plus the symbol-to-sector map the risk manager
/// consults. Bars are held behind an Arc so sweep workers can share them
/// without copying.
#[derive(Debug, Clone)]
pub struct MarketData {
    bars: Arc<Vec<Bar>>,
    sector_map: Arc<HashMap<String, String>>,
    symbols: Vec<String>,
}

impl MarketData {
    /// Wraps a bar series, rejecting input the simulation loop cannot
    /// replay: timestamps out of order, or duplicate timestamps per symbol.
    pub fn from_bars(bars: Vec<Bar>, sector_map: HashMap<String, String>) -> Result<Self> {
        if bars.is_empty() {
            return Err(anyhow!("Market data must contain at least one bar"));
        }

        let mut seen: HashSet<(String, i64)> = HashSet::with_capacity(bars.len());
        for (i, bar) in bars.iter().enumerate() {
            if bar.symbol.trim().is_empty() {
                return Err(anyhow!("Bar at index {} has an empty symbol", i));
            }
            if !bar.close.is_finite() || bar.close <= 0.0 {
                return Err(anyhow!(
                    "Bar at index {} for {} has unusable close price {}",
                    i,
                    bar.symbol,
                    bar.close
                ));
            }
            if i > 0 && bar.timestamp < bars[i - 1].timestamp {
                return Err(anyhow!(
                    "Bars must be sorted by timestamp ascending (index {} for {})",
                    i,
                    bar.symbol
                ));
            }
            if !seen.insert((bar.symbol.clone(), bar.timestamp.timestamp_millis())) {
                return Err(anyhow!(
                    "Duplicate bar for {} at {}",
                    bar.symbol,
                    bar.timestamp
                ));
            }
        }

        let mut symbols = Vec::new();
        let mut known = HashSet::new();
        for bar in &bars {
            if known.insert(bar.symbol.clone()) {
                symbols.push(bar.symbol.clone());
            }
        }

        Ok(Self {
            bars: Arc::new(bars),
            sector_map: Arc::new(sector_map),
            symbols,
        })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn bars_arc(&self) -> Arc<Vec<Bar>> {
        Arc::clone(&self.bars)
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn sector_of(&self, symbol: &str) -> Option<&str> {
        self.sector_map.get(symbol).map(|s| s.as_str())
    }

    pub fn sector_map_arc(&self) -> Arc<HashMap<String, String>> {
        Arc::clone(&self.sector_map)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        Self::from_bars(snapshot.bars, snapshot.sector_map)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            bars: self.bars.as_ref().clone(),
            sector_map: self.sector_map.as_ref().clone(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }
}
