// Plot index database
// identifier -> (plot path, offset) over every discovered plot

use crate::format::{self, PlotError};
use redb::{Database, ReadableTableMetadata, TableDefinition};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use umbra_core::Identifier;

// Keys are raw identifiers; values are the packed location record
const PLOTS_TABLE: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("plots");

const INDEX_FILE_NAME: &str = "plots.redb";

/// Entries inserted per write transaction during reindexing
pub const DEFAULT_BATCH_SIZE: usize = 1024;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt index record: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    DatabaseError(#[from] redb::Error),
    #[error("database creation error: {0}")]
    DatabaseCreationError(#[from] redb::DatabaseError),
    #[error("storage error: {0}")]
    StorageError(#[from] redb::StorageError),
    #[error("table error: {0}")]
    TableError(#[from] redb::TableError),
    #[error("commit error: {0}")]
    CommitError(#[from] redb::CommitError),
    #[error("transaction error: {0}")]
    TransactionError(#[from] redb::TransactionError),
}

/// Where a private key blob lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlotLocation {
    pub path: PathBuf,
    pub offset: u64,
}

/// Persistent identifier index over all plots
pub struct PlotIndex {
    db: Arc<Database>,
    dir: PathBuf,
}

impl PlotIndex {
    /// Create a fresh index, deleting any previous database directory
    pub fn create(dir: &Path) -> Result<Self, IndexError> {
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        std::fs::create_dir_all(dir)?;

        let db = Database::create(dir.join(INDEX_FILE_NAME))?;
        let init_txn = db.begin_write()?;
        {
            let _ = init_txn.open_table(PLOTS_TABLE)?;
        }
        init_txn.commit()?;

        Ok(PlotIndex {
            db: Arc::new(db),
            dir: dir.to_path_buf(),
        })
    }

    /// Scan the given directories for plot files and rebuild the index.
    /// Individual plot failures are logged and skipped. Returns the total
    /// number of entries indexed.
    pub fn reindex(&self, plot_dirs: &[PathBuf], batch_size: usize) -> Result<u64, IndexError> {
        let mut total = 0u64;

        for dir in plot_dirs {
            let read_dir = match std::fs::read_dir(dir) {
                Ok(rd) => rd,
                Err(e) => {
                    warn!("skipping plot directory {}: {e}", dir.display());
                    continue;
                }
            };

            for dir_entry in read_dir {
                let dir_entry = dir_entry?;
                let path = dir_entry.path();
                let name = dir_entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if !format::is_plot_file_name(name) {
                    continue;
                }

                match self.index_plot(&path, batch_size) {
                    Ok(count) => {
                        total += count;
                        info!("indexed {} entries from {}", count, path.display());
                    }
                    Err(e) => warn!("skipping unreadable plot {}: {e}", path.display()),
                }
            }
        }

        info!("plot reindex complete: {total} entries");
        Ok(total)
    }

    fn index_plot(&self, path: &Path, batch_size: usize) -> Result<u64, IndexError> {
        let mut file = File::open(path)?;
        let header = read_header_for_index(&mut file, path)?;

        let mut inserted = 0u64;
        for batch in header.entries.chunks(batch_size.max(1)) {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(PLOTS_TABLE)?;
                for entry in batch {
                    let value = pack_location(path, entry.offset as u64)?;
                    table.insert(entry.identifier.as_bytes(), value.as_slice())?;
                    inserted += 1;
                }
            }
            write_txn.commit()?;
        }

        Ok(inserted)
    }

    /// Exact lookup by identifier
    pub fn lookup(&self, identifier: &Identifier) -> Result<Option<PlotLocation>, IndexError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PLOTS_TABLE)?;

        match table.get(identifier.as_bytes())? {
            Some(guard) => Ok(Some(unpack_location(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Closest match: first entry at-or-after the key in identifier order,
    /// wrapping around to the smallest identifier. `None` only when the
    /// index is empty.
    pub fn lookup_closest(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<(Identifier, PlotLocation)>, IndexError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PLOTS_TABLE)?;

        if let Some(found) = table.range::<&[u8; 32]>(identifier.as_bytes()..)?.next() {
            let (key, value) = found?;
            return Ok(Some((
                Identifier::from_bytes(*key.value()),
                unpack_location(value.value())?,
            )));
        }

        // Wrap to the start of the keyspace
        if let Some(found) = table.range::<&[u8; 32]>(..)?.next() {
            let (key, value) = found?;
            return Ok(Some((
                Identifier::from_bytes(*key.value()),
                unpack_location(value.value())?,
            )));
        }

        Ok(None)
    }

    /// Number of indexed entries
    pub fn count(&self) -> Result<u64, IndexError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PLOTS_TABLE)?;
        Ok(table.len()?)
    }

    /// Index size on disk in bytes
    pub fn approximate_size(&self) -> Result<u64, IndexError> {
        Ok(std::fs::metadata(self.dir.join(INDEX_FILE_NAME))?.len())
    }
}

fn read_header_for_index(file: &mut File, path: &Path) -> Result<format::PlotHeader, IndexError> {
    format::read_header(file).map_err(|e| match e {
        PlotError::Io(io) => IndexError::Io(io),
        other => IndexError::Corrupt(format!("{}: {other}", path.display())),
    })
}

/// Record layout: `path_len u32 LE || path utf8 || offset u64 LE`
fn pack_location(path: &Path, offset: u64) -> Result<Vec<u8>, IndexError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| IndexError::Corrupt(format!("non-utf8 plot path {}", path.display())))?;

    let mut out = Vec::with_capacity(4 + path_str.len() + 8);
    out.extend_from_slice(&(path_str.len() as u32).to_le_bytes());
    out.extend_from_slice(path_str.as_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    Ok(out)
}

fn unpack_location(bytes: &[u8]) -> Result<PlotLocation, IndexError> {
    if bytes.len() < 12 {
        return Err(IndexError::Corrupt("record shorter than framing".into()));
    }
    let path_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if bytes.len() != 4 + path_len + 8 {
        return Err(IndexError::Corrupt(format!(
            "record length {} inconsistent with path length {path_len}",
            bytes.len()
        )));
    }
    let path = std::str::from_utf8(&bytes[4..4 + path_len])
        .map_err(|_| IndexError::Corrupt("non-utf8 path in record".into()))?;
    let offset_bytes: [u8; 8] = bytes[4 + path_len..]
        .try_into()
        .map_err(|_| IndexError::Corrupt("bad offset framing".into()))?;

    Ok(PlotLocation {
        path: PathBuf::from(path),
        offset: u64::from_le_bytes(offset_bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{plot_file_name, write_plot};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Scratch {
        root: PathBuf,
    }

    impl Scratch {
        fn new(name: &str) -> Self {
            let root = std::env::temp_dir().join(format!("umbra-plot-index-{name}"));
            let _ = std::fs::remove_dir_all(&root);
            std::fs::create_dir_all(&root).unwrap();
            Scratch { root }
        }

        fn plots(&self) -> PathBuf {
            let dir = self.root.join("plots");
            std::fs::create_dir_all(&dir).unwrap();
            dir
        }

        fn index(&self) -> PathBuf {
            self.root.join("index")
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let packed = pack_location(Path::new("/tmp/umbra_v1_k2_x.dat"), 12345).unwrap();
        let location = unpack_location(&packed).unwrap();
        assert_eq!(location.path, PathBuf::from("/tmp/umbra_v1_k2_x.dat"));
        assert_eq!(location.offset, 12345);
    }

    #[test]
    fn test_unpack_rejects_bad_framing() {
        assert!(unpack_location(&[1, 2, 3]).is_err());
        let mut packed = pack_location(Path::new("/p"), 1).unwrap();
        packed.truncate(packed.len() - 1);
        assert!(unpack_location(&packed).is_err());
    }

    #[test]
    fn test_reindex_and_lookup() {
        let scratch = Scratch::new("reindex");
        let plots = scratch.plots();
        let mut rng = StdRng::seed_from_u64(10);
        let header = write_plot(&plots.join(plot_file_name(2, "a")), 2, &mut rng).unwrap();

        let index = PlotIndex::create(&scratch.index()).unwrap();
        let total = index.reindex(&[plots.clone()], DEFAULT_BATCH_SIZE).unwrap();
        assert_eq!(total, 4);
        assert_eq!(index.count().unwrap(), 4);
        assert!(index.approximate_size().unwrap() > 0);

        let entry = &header.entries[1];
        let location = index.lookup(&entry.identifier).unwrap().unwrap();
        assert_eq!(location.offset, entry.offset as u64);

        let missing = Identifier::from_bytes([0xee; 32]);
        assert!(index.lookup(&missing).unwrap().is_none());
    }

    #[test]
    fn test_lookup_closest_wraps() {
        let scratch = Scratch::new("closest");
        let plots = scratch.plots();
        let mut rng = StdRng::seed_from_u64(11);
        let header = write_plot(&plots.join(plot_file_name(2, "b")), 2, &mut rng).unwrap();

        let index = PlotIndex::create(&scratch.index()).unwrap();
        index.reindex(&[plots], DEFAULT_BATCH_SIZE).unwrap();

        // At-or-after the smallest key resolves exactly
        let first = &header.entries[0];
        let (found, _) = index.lookup_closest(&first.identifier).unwrap().unwrap();
        assert_eq!(found, first.identifier);

        // Beyond the largest key wraps to the smallest
        let (wrapped, _) = index
            .lookup_closest(&Identifier::from_bytes([0xff; 32]))
            .unwrap()
            .unwrap();
        assert_eq!(wrapped, first.identifier);
    }

    #[test]
    fn test_reindex_skips_corrupt_plot() {
        let scratch = Scratch::new("skip-corrupt");
        let plots = scratch.plots();
        let mut rng = StdRng::seed_from_u64(12);
        write_plot(&plots.join(plot_file_name(1, "good")), 1, &mut rng).unwrap();
        std::fs::write(plots.join(plot_file_name(1, "bad")), b"garbage").unwrap();

        let index = PlotIndex::create(&scratch.index()).unwrap();
        let total = index.reindex(&[plots], DEFAULT_BATCH_SIZE).unwrap();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_create_wipes_previous_database() {
        let scratch = Scratch::new("wipe");
        let plots = scratch.plots();
        let mut rng = StdRng::seed_from_u64(13);
        write_plot(&plots.join(plot_file_name(1, "w")), 1, &mut rng).unwrap();

        {
            let index = PlotIndex::create(&scratch.index()).unwrap();
            index.reindex(&[plots], DEFAULT_BATCH_SIZE).unwrap();
            assert_eq!(index.count().unwrap(), 2);
        }

        let fresh = PlotIndex::create(&scratch.index()).unwrap();
        assert_eq!(fresh.count().unwrap(), 0);
    }
}
