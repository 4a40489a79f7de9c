// Plot file format
// Header + sorted identifier index + raw private-key region

use rand::RngCore;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;
use umbra_core::{Address, CoreError, Identifier, Keypair, ADDRESS_SIZE, PRIVATE_KEY_SIZE};

/// File magic, carries the format version
pub const PLOT_MAGIC: [u8; 8] = *b"UMBRA001";

/// Plot files are discovered by this name prefix
pub const PLOT_FILE_PREFIX: &str = "umbra_v1_k";

/// ... and this suffix
pub const PLOT_FILE_SUFFIX: &str = ".dat";

/// Largest accepted plot size exponent
pub const MAX_K: u32 = 32;

/// Entry counts cap at 2^20 regardless of k
const ENTRY_COUNT_CAP_LOG2: u32 = 20;

/// Fixed preamble: magic (8) + k (4) + entry count (4)
const PREAMBLE_SIZE: u64 = 16;

/// Per-entry bytes: address (25) + identifier (32) + offset (4)
const ENTRY_SIZE: usize = ADDRESS_SIZE + 32 + 4;

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("malformed plot: {0}")]
    MalformedPlot(String),
    #[error("plot integrity failure at entry {entry}: {field}")]
    PlotIntegrity { entry: u32, field: &'static str },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("key error: {0}")]
    Key(#[from] CoreError),
}

/// One index entry of the plot header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlotEntry {
    pub address: Address,
    pub identifier: Identifier,
    pub offset: u32,
}

/// Parsed plot header
#[derive(Clone, Debug)]
pub struct PlotHeader {
    pub k: u32,
    pub entries: Vec<PlotEntry>,
}

/// How hard `validate_file` should look
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationMode {
    /// File size and entry ordering only
    Quick,
    /// Reconstruct every key pair and recompute address + identifier
    Full,
}

impl PlotHeader {
    /// Number of entries a plot with the given k holds
    pub fn entry_count_for_k(k: u32) -> u32 {
        1 << k.min(ENTRY_COUNT_CAP_LOG2)
    }

    /// Byte length of the header for an entry count
    pub fn header_size(entry_count: u32) -> u64 {
        PREAMBLE_SIZE + entry_count as u64 * ENTRY_SIZE as u64
    }

    /// Total file size the header implies
    pub fn expected_file_size(&self) -> u64 {
        let n = self.entries.len() as u64;
        Self::header_size(self.entries.len() as u32) + n * PRIVATE_KEY_SIZE as u64
    }
}

/// Conventional file name for a fresh plot
pub fn plot_file_name(k: u32, tag: &str) -> String {
    format!("{PLOT_FILE_PREFIX}{k}_{tag}{PLOT_FILE_SUFFIX}")
}

/// Whether a file name looks like a plot
pub fn is_plot_file_name(name: &str) -> bool {
    name.starts_with(PLOT_FILE_PREFIX) && name.ends_with(PLOT_FILE_SUFFIX)
}

/// Parse and sanity-check a plot header
pub fn read_header(file: &mut File) -> Result<PlotHeader, PlotError> {
    file.seek(SeekFrom::Start(0))?;

    let mut preamble = [0u8; PREAMBLE_SIZE as usize];
    file.read_exact(&mut preamble)
        .map_err(|_| PlotError::MalformedPlot("file shorter than preamble".into()))?;

    if preamble[..8] != PLOT_MAGIC {
        return Err(PlotError::MalformedPlot("bad magic".into()));
    }
    let k = u32::from_le_bytes([preamble[8], preamble[9], preamble[10], preamble[11]]);
    if k == 0 || k > MAX_K {
        return Err(PlotError::MalformedPlot(format!("k {k} out of range")));
    }
    let entry_count =
        u32::from_le_bytes([preamble[12], preamble[13], preamble[14], preamble[15]]);
    if entry_count != PlotHeader::entry_count_for_k(k) {
        return Err(PlotError::MalformedPlot(format!(
            "entry count {entry_count} does not match k {k}"
        )));
    }

    let header_size = PlotHeader::header_size(entry_count);
    let mut raw = vec![0u8; entry_count as usize * ENTRY_SIZE];
    file.read_exact(&mut raw)
        .map_err(|_| PlotError::MalformedPlot("truncated entry table".into()))?;

    let mut entries: Vec<PlotEntry> = Vec::with_capacity(entry_count as usize);
    for i in 0..entry_count as usize {
        let chunk = &raw[i * ENTRY_SIZE..(i + 1) * ENTRY_SIZE];

        let mut address_bytes = [0u8; ADDRESS_SIZE];
        address_bytes.copy_from_slice(&chunk[..ADDRESS_SIZE]);
        let mut identifier_bytes = [0u8; 32];
        identifier_bytes.copy_from_slice(&chunk[ADDRESS_SIZE..ADDRESS_SIZE + 32]);
        let offset = u32::from_le_bytes([
            chunk[ENTRY_SIZE - 4],
            chunk[ENTRY_SIZE - 3],
            chunk[ENTRY_SIZE - 2],
            chunk[ENTRY_SIZE - 1],
        ]);

        let expected = header_size + i as u64 * PRIVATE_KEY_SIZE as u64;
        if offset as u64 != expected {
            return Err(PlotError::MalformedPlot(format!(
                "entry {i} offset {offset} != expected {expected}"
            )));
        }

        let entry = PlotEntry {
            address: Address::from_bytes(address_bytes),
            identifier: Identifier::from_bytes(identifier_bytes),
            offset,
        };
        if let Some(prev) = entries.last() {
            if entry.identifier <= prev.identifier {
                return Err(PlotError::MalformedPlot(format!(
                    "entries not strictly increasing at index {i}"
                )));
            }
        }
        entries.push(entry);
    }

    Ok(PlotHeader { k, entries })
}

/// Validate plot contents against its header
pub fn validate_file(
    header: &PlotHeader,
    file: &mut File,
    mode: ValidationMode,
) -> Result<(), PlotError> {
    let actual = file.metadata()?.len();
    let expected = header.expected_file_size();
    if actual != expected {
        return Err(PlotError::MalformedPlot(format!(
            "file size {actual} != expected {expected}"
        )));
    }

    if mode == ValidationMode::Quick {
        return Ok(());
    }

    for (i, entry) in header.entries.iter().enumerate() {
        let blob = read_private_key(file, entry.offset as u64)?;
        let keypair = Keypair::from_private_key_bytes(&blob).map_err(|_| {
            PlotError::PlotIntegrity {
                entry: i as u32,
                field: "private_key",
            }
        })?;
        let public_key = keypair.public_key();
        if public_key.identifier() != entry.identifier {
            return Err(PlotError::PlotIntegrity {
                entry: i as u32,
                field: "identifier",
            });
        }
        if public_key.address() != entry.address {
            return Err(PlotError::PlotIntegrity {
                entry: i as u32,
                field: "address",
            });
        }
    }

    Ok(())
}

/// Read the fixed-size private key blob at an offset
pub fn read_private_key(file: &mut File, offset: u64) -> Result<Vec<u8>, PlotError> {
    file.seek(SeekFrom::Start(offset))?;
    let mut blob = vec![0u8; PRIVATE_KEY_SIZE];
    file.read_exact(&mut blob)?;
    Ok(blob)
}

/// Write a fresh plot: generate 2^k key pairs, sort by identifier, emit
/// header + key region. This is the plotter's path; farmers only read.
pub fn write_plot<R: RngCore>(path: &Path, k: u32, rng: &mut R) -> Result<PlotHeader, PlotError> {
    if k == 0 || k > MAX_K {
        return Err(PlotError::MalformedPlot(format!("k {k} out of range")));
    }
    let entry_count = PlotHeader::entry_count_for_k(k);
    let header_size = PlotHeader::header_size(entry_count);

    // Offsets are u32 in the header; refuse layouts that cannot express
    // their last entry
    let last_offset = header_size + (entry_count as u64 - 1) * PRIVATE_KEY_SIZE as u64;
    if last_offset > u32::MAX as u64 {
        return Err(PlotError::MalformedPlot(format!(
            "k {k} overflows 32-bit entry offsets"
        )));
    }

    let mut keyed: Vec<(Identifier, Address, Vec<u8>)> = (0..entry_count)
        .map(|_| {
            let keypair = Keypair::generate(rng);
            let public_key = keypair.public_key();
            (
                public_key.identifier(),
                public_key.address(),
                keypair.to_private_key_bytes(),
            )
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    if keyed.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(PlotError::MalformedPlot("identifier collision".into()));
    }

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(&PLOT_MAGIC)?;
    writer.write_all(&k.to_le_bytes())?;
    writer.write_all(&entry_count.to_le_bytes())?;

    let mut entries = Vec::with_capacity(entry_count as usize);
    for (i, (identifier, address, _)) in keyed.iter().enumerate() {
        let offset = (header_size + i as u64 * PRIVATE_KEY_SIZE as u64) as u32;
        writer.write_all(address.as_bytes())?;
        writer.write_all(identifier.as_bytes())?;
        writer.write_all(&offset.to_le_bytes())?;
        entries.push(PlotEntry {
            address: *address,
            identifier: *identifier,
            offset,
        });
    }
    for (_, _, blob) in &keyed {
        writer.write_all(blob)?;
    }
    writer.flush()?;

    Ok(PlotHeader { k, entries })
}
