//! Code allocator and file registry: share code -> stored file.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use rand::Rng;

/// Numeric share code. Doubles as the TCP port of its one-shot listener.
pub type ShareCode = u16;

/// Default code range: the IANA dynamic/private port range.
pub const DEFAULT_CODE_RANGE: RangeInclusive<ShareCode> = 49152..=65535;

/// Collision retries before `offer` gives up on a crowded range.
const MAX_OFFER_ATTEMPTS: usize = 1024;

/// One registered file, reachable by its code until served or expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOffer {
    pub code: ShareCode,
    /// Absolute path of the stored blob.
    pub path: PathBuf,
    /// Name announced to the downloader (already sanitized).
    pub file_name: String,
    pub created_at: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no free share code after {0} attempts")]
    Exhausted(usize),
    #[error("invalid code range {0}..={1}")]
    EmptyRange(ShareCode, ShareCode),
}

/// Thread-safe map of active offers. Check-and-insert happens under one lock.
pub struct Registry {
    range: RangeInclusive<ShareCode>,
    offers: Mutex<HashMap<ShareCode, FileOffer>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            range: DEFAULT_CODE_RANGE,
            offers: Mutex::new(HashMap::new()),
        }
    }

    /// Registry drawing codes from `range` (inclusive on both ends).
    pub fn with_range(range: RangeInclusive<ShareCode>) -> Result<Self, RegistryError> {
        if range.is_empty() {
            return Err(RegistryError::EmptyRange(*range.start(), *range.end()));
        }
        Ok(Self {
            range,
            offers: Mutex::new(HashMap::new()),
        })
    }

    pub fn range(&self) -> &RangeInclusive<ShareCode> {
        &self.range
    }

    /// Register `path` under a fresh random code and return the code.
    pub fn offer(
        &self,
        path: impl AsRef<Path>,
        file_name: impl Into<String>,
    ) -> Result<ShareCode, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let file_name = file_name.into();
        let mut rng = rand::thread_rng();
        let mut offers = self.lock();
        for _ in 0..MAX_OFFER_ATTEMPTS {
            let code = rng.gen_range(self.range.clone());
            if let Entry::Vacant(slot) = offers.entry(code) {
                slot.insert(FileOffer {
                    code,
                    path,
                    file_name,
                    created_at: Instant::now(),
                });
                return Ok(code);
            }
        }
        Err(RegistryError::Exhausted(MAX_OFFER_ATTEMPTS))
    }

    pub fn lookup(&self, code: ShareCode) -> Option<FileOffer> {
        self.lock().get(&code).cloned()
    }

    /// Evict an offer. Returns it if it was still registered.
    pub fn withdraw(&self, code: ShareCode) -> Option<FileOffer> {
        self.lock().remove(&code)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave the map half-updated.
    fn lock(&self) -> MutexGuard<'_, HashMap<ShareCode, FileOffer>> {
        self.offers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
