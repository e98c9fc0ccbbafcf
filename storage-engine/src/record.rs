use aerocache::{Bin, Bins, Record, RecordKey, RecordMetadata};
use serde::{Deserialize, Serialize};
use shared::{Error, Result};
use std::time::Duration;

/// Current wall clock time in milliseconds since the UNIX epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// When a written record stops being visible
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoidTime {
    Never,
    At(i64),
    Expired,
}

impl VoidTime {
    fn deadline(self) -> Option<i64> {
        match self {
            VoidTime::At(ms) => Some(ms),
            VoidTime::Never | VoidTime::Expired => None,
        }
    }
}

/// Record as kept by the embedded stores
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub set_name: Option<String>,
    pub user_key: Option<String>,
    pub bins: Bins,
    pub generation: u32,
    pub void_time_ms: Option<i64>,
    pub last_update_ms: i64,
}

impl StoredRecord {
    /// Empty record at generation 0, not yet written
    pub fn empty(key: &RecordKey, send_key: bool, now: i64) -> Self {
        Self {
            set_name: key.set_name.clone(),
            user_key: send_key.then(|| key.user_key.clone()),
            bins: Bins::new(),
            generation: 0,
            void_time_ms: None,
            last_update_ms: now,
        }
    }

    pub fn is_live(&self, now: i64) -> bool {
        self.void_time_ms.is_none_or(|void| void > now)
    }

    pub fn time_to_live(&self, now: i64) -> Option<Duration> {
        self.void_time_ms
            .map(|void| Duration::from_millis(u64::try_from(void - now).unwrap_or(0)))
    }

    pub fn meta(&self, now: i64) -> RecordMetadata {
        RecordMetadata {
            generation: self.generation,
            ttl: self.void_time_ms.map(|void| {
                let remaining = (void - now).max(0);
                u32::try_from((remaining + 999) / 1000).unwrap_or(u32::MAX)
            }),
        }
    }

    pub fn to_record(&self, now: i64) -> Record {
        Record {
            meta: self.meta(now),
            bins: self.bins.clone(),
        }
    }

    /// Bumps the generation and applies the write's void time
    pub fn touch(&mut self, void: VoidTime, now: i64) {
        self.generation = self.generation.wrapping_add(1).max(1);
        self.void_time_ms = void.deadline();
        self.last_update_ms = now;
    }

    pub fn replace_bins(&mut self, bins: Bins, void: VoidTime, now: i64) {
        self.bins = bins;
        self.touch(void, now);
    }

    /// Adds `delta` to an integer bin, treating a missing bin as 0
    pub fn apply_add(&mut self, bin_name: &str, delta: i64) -> Result<i64> {
        let current = match self.bins.get(bin_name) {
            None => 0,
            Some(Bin::Int(i)) => *i,
            Some(other) => {
                return Err(Error::BinIncompatibleType(format!(
                    "bin '{}' is not an integer: {:?}",
                    bin_name, other
                )));
            }
        };
        let next = current.checked_add(delta).ok_or_else(|| {
            Error::BinIncompatibleType(format!("bin '{}' would overflow", bin_name))
        })?;
        self.bins.insert(bin_name.to_string(), Bin::Int(next));
        Ok(next)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize record: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize record: {}", e)))
    }
}
