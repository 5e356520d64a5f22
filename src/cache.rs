//! On-disk event cache and pool-data export.
//!
//! Every gathered block range is written to `events_<from>_<to>.json` under
//! the cache directory. A restarted process with cached events enabled
//! serves ranges the cache fully covers from disk instead of the chain.

use crate::error::{TrackerError, TrackerResult};
use crate::events::{order_records, UpdateRecord};
use crate::snapshot::PoolSnapshot;
use crate::store::Pool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the exported pool data.
pub const POOL_DATA_FILE: &str = "latest_pool_data.json";

/// Records of one gathered block range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRange {
    /// First block covered
    pub from_block: u64,
    /// Last block covered, inclusive
    pub to_block: u64,
    /// When the range was written
    pub written_at: DateTime<Utc>,
    /// Records in chain order
    pub records: Vec<UpdateRecord>,
}

#[derive(Serialize)]
struct PoolDataExport<'a> {
    block_number: u64,
    written_at: DateTime<Utc>,
    pools: Vec<&'a Pool>,
}

/// Directory-backed event cache.
#[derive(Debug, Clone)]
pub struct EventCache {
    dir: PathBuf,
}

impl EventCache {
    /// Open the cache, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns a cache error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> TrackerResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            TrackerError::cache(
                format!("Failed to create cache directory {}", dir.display()),
                Some(Box::new(e)),
            )
        })?;
        Ok(Self { dir })
    }

    /// Cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn range_path(&self, from_block: u64, to_block: u64) -> PathBuf {
        self.dir.join(format!("events_{from_block}_{to_block}.json"))
    }

    /// Write the records of `[from_block, to_block]`.
    ///
    /// # Errors
    ///
    /// Returns a cache error if serialization or the write fails.
    pub fn save(&self, from_block: u64, to_block: u64, records: &[UpdateRecord]) -> TrackerResult<()> {
        let range = CachedRange {
            from_block,
            to_block,
            written_at: Utc::now(),
            records: records.to_vec(),
        };
        let json = serde_json::to_string(&range)
            .map_err(|e| TrackerError::cache("Failed to serialize cached range", Some(Box::new(e))))?;

        let path = self.range_path(from_block, to_block);
        fs::write(&path, json).map_err(|e| {
            TrackerError::cache(
                format!("Failed to write cache file {}", path.display()),
                Some(Box::new(e)),
            )
        })?;

        debug!(from_block, to_block, records = records.len(), "Cached block range");
        Ok(())
    }

    /// Block ranges present in the cache, sorted by start block.
    ///
    /// # Errors
    ///
    /// Returns a cache error if the directory cannot be listed.
    pub fn ranges(&self) -> TrackerResult<Vec<(u64, u64)>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            TrackerError::cache(
                format!("Failed to list cache directory {}", self.dir.display()),
                Some(Box::new(e)),
            )
        })?;

        let mut ranges: Vec<(u64, u64)> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| parse_range_name(&entry.file_name().to_string_lossy()))
            .collect();
        ranges.sort_unstable();
        Ok(ranges)
    }

    /// Records of `[from_block, to_block]` if cached ranges cover it without gaps.
    ///
    /// # Errors
    ///
    /// Returns a cache error if a covering file cannot be read or parsed.
    pub fn load(&self, from_block: u64, to_block: u64) -> TrackerResult<Option<Vec<UpdateRecord>>> {
        let overlapping: Vec<(u64, u64)> = self
            .ranges()?
            .into_iter()
            .filter(|(start, end)| *end >= from_block && *start <= to_block)
            .collect();

        let mut next = from_block;
        for (start, end) in &overlapping {
            if *start > next {
                break;
            }
            next = next.max(end.saturating_add(1));
        }
        if next <= to_block {
            return Ok(None);
        }

        let mut records = Vec::new();
        for (start, end) in overlapping {
            let range = self.read_range(start, end)?;
            records.extend(
                range
                    .records
                    .into_iter()
                    .filter(|r| r.block_number >= from_block && r.block_number <= to_block),
            );
        }

        // Overlapping files may repeat a log.
        order_records(&mut records);
        records.dedup_by_key(|r| r.ordering_key());

        debug!(from_block, to_block, records = records.len(), "Loaded cached records");
        Ok(Some(records))
    }

    fn read_range(&self, from_block: u64, to_block: u64) -> TrackerResult<CachedRange> {
        let path = self.range_path(from_block, to_block);
        let json = fs::read_to_string(&path).map_err(|e| {
            TrackerError::cache(
                format!("Failed to read cache file {}", path.display()),
                Some(Box::new(e)),
            )
        })?;
        serde_json::from_str(&json).map_err(|e| {
            TrackerError::cache(
                format!("Failed to parse cache file {}", path.display()),
                Some(Box::new(e)),
            )
        })
    }

    /// Write the active pools of `snapshot` to [`POOL_DATA_FILE`].
    ///
    /// # Errors
    ///
    /// Returns a cache error if serialization or the write fails.
    pub fn write_pool_data(&self, snapshot: &PoolSnapshot) -> TrackerResult<PathBuf> {
        let export = PoolDataExport {
            block_number: snapshot.block_number(),
            written_at: Utc::now(),
            pools: snapshot.pools().values().collect(),
        };
        let json = serde_json::to_string_pretty(&export)
            .map_err(|e| TrackerError::cache("Failed to serialize pool data", Some(Box::new(e))))?;

        let path = self.dir.join(POOL_DATA_FILE);
        fs::write(&path, json).map_err(|e| {
            TrackerError::cache(
                format!("Failed to write pool data {}", path.display()),
                Some(Box::new(e)),
            )
        })?;

        info!(path = %path.display(), pools = snapshot.len(), "Pool data written");
        Ok(path)
    }
}

fn parse_range_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_prefix("events_")?.strip_suffix(".json")?;
    let (from, to) = stem.split_once('_')?;
    match (from.parse(), to.parse()) {
        (Ok(from), Ok(to)) if from <= to => Some((from, to)),
        _ => {
            warn!(file = name, "Ignoring malformed cache file name");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, Payload};
    use crate::store::PoolState;
    use crate::tokens::TokenRegistry;
    use alloy::primitives::{address, Address, B256, U256};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const PAIR: Address = address!("000000000000000000000000000000000000000A");

    fn record(block: u64, index: u64) -> UpdateRecord {
        UpdateRecord {
            pool_key: PAIR,
            block_number: block,
            log_index: index,
            kind: EventKind::Sync,
            payload: Payload::Reserves {
                reserve0: U256::from(block),
                reserve1: U256::from(index),
            },
        }
    }

    #[test]
    fn test_save_and_load_exact_range() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EventCache::open(dir.path()).unwrap();
        cache.save(1, 10, &[record(3, 0), record(9, 1)]).unwrap();

        let records = cache.load(1, 10).unwrap().unwrap();
        assert_eq!(records, vec![record(3, 0), record(9, 1)]);
    }

    #[test]
    fn test_load_spans_adjacent_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EventCache::open(dir.path()).unwrap();
        cache.save(1, 10, &[record(3, 0), record(9, 1)]).unwrap();
        cache.save(11, 20, &[record(15, 0)]).unwrap();

        let records = cache.load(5, 18).unwrap().unwrap();
        let keys: Vec<u64> = records.iter().map(|r| r.block_number).collect();
        assert_eq!(keys, vec![9, 15]);
        assert_eq!(cache.ranges().unwrap(), vec![(1, 10), (11, 20)]);
    }

    #[test]
    fn test_gap_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EventCache::open(dir.path()).unwrap();
        cache.save(1, 10, &[]).unwrap();
        cache.save(12, 20, &[]).unwrap();

        assert!(cache.load(5, 15).unwrap().is_none());
        assert!(cache.load(21, 30).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_cache_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EventCache::open(dir.path()).unwrap();
        fs::write(dir.path().join("events_1_10.json"), "not json").unwrap();

        assert!(matches!(cache.load(1, 10), Err(TrackerError::CacheError { .. })));
    }

    #[test]
    fn test_write_pool_data() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EventCache::open(dir.path()).unwrap();
        let pool = Pool::new(
            "uniswap_v2",
            PAIR,
            Address::ZERO,
            Address::ZERO,
            "0.003".to_string(),
            0.003,
            PoolState::Uninitialized,
            0,
        );
        let pools: BTreeMap<B256, Pool> = BTreeMap::from([(pool.canonical_id, pool)]);
        let snapshot = PoolSnapshot::new(42, Arc::new(pools), Arc::new(TokenRegistry::default()));

        let path = cache.write_pool_data(&snapshot).unwrap();
        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["block_number"], 42);
        assert_eq!(written["pools"].as_array().map(Vec::len), Some(1));
    }
}
