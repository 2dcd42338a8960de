//! Compiled-program cache.
//!
//! Maps a cache key to the program compiled for it. Keys are composed by
//! [`ComputeRuntime`](crate::ComputeRuntime) as `{algorithm}:{types}:{device identity}:{options}`,
//! so identical source and options on the same device always land on the same entry.
//!
//! # Thread Safety
//!
//! Each key owns a [`OnceCell`] stored in a papaya map. Concurrent requests for the same key
//! block on that cell, so a program is compiled at most once per key; requests for other keys
//! proceed independently. A failed build leaves the cell empty and is retried by the next
//! request.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kiln_device::{Device, Program};
use once_cell::sync::OnceCell;
use papaya::HashMap;

use crate::disk_cache::DiskCache;
use crate::error::Result;

type Slot = Arc<OnceCell<Arc<dyn Program>>>;

/// Counters since creation (or the last [`ProgramCache::clear`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served from memory.
    pub hits: u64,
    /// Requests that had to produce a program.
    pub misses: u64,
    /// Misses that invoked the device compiler.
    pub builds: u64,
    /// Misses served from the disk cache.
    pub disk_hits: u64,
}

#[derive(Default)]
pub struct ProgramCache {
    entries: HashMap<String, Slot>,
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
    disk_hits: AtomicU64,
}

impl std::fmt::Debug for ProgramCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramCache").field("len", &self.len()).field("stats", &self.stats()).finish()
    }
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the program for `key`, producing and compiling it on a miss.
    ///
    /// `source` runs only on a miss. With a disk cache the produced source is hashed and a
    /// stored binary is tried before compiling.
    pub fn get_or_build(
        &self,
        device: &Device,
        key: &str,
        options: &str,
        disk: Option<&DiskCache>,
        source: impl FnOnce() -> Result<String>,
    ) -> Result<Arc<dyn Program>> {
        let slot = self.slot(key);
        if let Some(program) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(program.key = key, "program cache hit");
            return Ok(Arc::clone(program));
        }

        let mut produced = false;
        let program = slot.get_or_try_init(|| {
            produced = true;
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.produce(device, key, options, disk, source)
        })?;
        if !produced {
            // Another thread finished the build while this one waited on the cell.
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Arc::clone(program))
    }

    fn slot(&self, key: &str) -> Slot {
        let guard = self.entries.guard();
        if let Some(slot) = self.entries.get(key, &guard) {
            return Arc::clone(slot);
        }
        Arc::clone(self.entries.get_or_insert_with(key.to_string(), || Arc::new(OnceCell::new()), &guard))
    }

    fn produce(
        &self,
        device: &Device,
        key: &str,
        options: &str,
        disk: Option<&DiskCache>,
        source: impl FnOnce() -> Result<String>,
    ) -> Result<Arc<dyn Program>> {
        let source = source()?;
        let identity = device.identity();

        if let Some(disk) = disk
            && let Some(binary) = disk.load(&source, &identity, options)
        {
            match (device.runtime)(key, &binary) {
                Ok(program) => {
                    self.disk_hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(program.key = key, "program loaded from disk cache");
                    return Ok(program);
                }
                Err(e) => tracing::warn!(program.key = key, error = %e, "rejected disk cache entry"),
            }
        }

        tracing::debug!(program.key = key, source.len = source.len(), "program cache miss, compiling");
        self.builds.fetch_add(1, Ordering::Relaxed);
        let binary = device.compiler.compile(&source, options)?;
        let program = (device.runtime)(key, &binary)?;
        if let Some(disk) = disk {
            disk.store(&source, &identity, options, &binary);
        }
        Ok(program)
    }

    pub fn contains(&self, key: &str) -> bool {
        let guard = self.entries.guard();
        self.entries.get(key, &guard).is_some_and(|slot| slot.get().is_some())
    }

    /// Number of compiled programs held.
    pub fn len(&self) -> usize {
        let guard = self.entries.guard();
        self.entries.iter(&guard).filter(|(_, slot)| slot.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
        }
    }

    /// Drop every entry and reset the counters. Programs still referenced by kernels stay alive.
    pub fn clear(&self) {
        let guard = self.entries.guard();
        self.entries.clear(&guard);
        for counter in [&self.hits, &self.misses, &self.builds, &self.disk_hits] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
