//! Content-addressed persistence of compiled binaries.
//!
//! Entries live at `{dir}/{xxh3_128(source, identity, options):032x}.bin` and hold
//! `{u64 LE size}{size bytes}`. A load that fails for any reason is reported as a miss, so a
//! corrupt or foreign entry only costs a recompilation.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use xxhash_rust::xxh3::Xxh3;

#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry for a compilation input.
    pub fn entry_path(&self, source: &str, identity: &str, options: &str) -> PathBuf {
        let mut hasher = Xxh3::new();
        hasher.update(source.as_bytes());
        hasher.update(&[0]);
        hasher.update(identity.as_bytes());
        hasher.update(&[0]);
        hasher.update(options.as_bytes());
        self.dir.join(format!("{:032x}.bin", hasher.digest128()))
    }

    pub fn load(&self, source: &str, identity: &str, options: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(source, identity, options);
        match read_entry(&path) {
            Ok(binary) => Some(binary),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding unreadable program cache entry");
                None
            }
        }
    }

    /// Persist `binary`. Failures are logged; the in-memory result is unaffected.
    pub fn store(&self, source: &str, identity: &str, options: &str, binary: &[u8]) {
        let path = self.entry_path(source, identity, options);
        if let Err(e) = self.write_entry(&path, binary) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write program cache entry");
        }
    }

    fn write_entry(&self, path: &Path, binary: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        // Readers never observe a partial entry: write aside, then rename into place.
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(&(binary.len() as u64).to_le_bytes())?;
        file.write_all(binary)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

fn read_entry(path: &Path) -> io::Result<Vec<u8>> {
    let bytes = fs::read(path)?;
    let Some((header, payload)) = bytes.split_first_chunk::<8>() else {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated size header"));
    };
    let size = u64::from_le_bytes(*header);
    if size != payload.len() as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("size header says {size} bytes, file holds {}", payload.len()),
        ));
    }
    Ok(payload.to_vec())
}
