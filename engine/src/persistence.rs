//! On-disk formats for the mutation log (WAL segments, snapshots, manifest)
//!
//! - **WAL segment**: `WAL\0` magic, then frames `[len u32][bincode][crc32 u32]`
//! - **Snapshot**: `SNAP` magic, `[size u64][bincode][crc32 u32]`, written to a
//!   temp file, fsynced and renamed into place
//! - **Manifest**: JSON list of live snapshots and WAL segments, atomic rename
//!
//! Everything here is plain file I/O with `anyhow` context; replay policy
//! (which segment is final, when a torn tail is acceptable) lives in
//! `mutation_log`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

use crate::config::{DistanceMetric, FsyncPolicy};
use crate::hnsw_index::HnswIndex;
use crate::vector_store::Record;

/// WAL magic number (identifies valid WAL files)
pub const WAL_MAGIC: u32 = 0x57414C00; // "WAL\0"

/// Snapshot magic number
pub const SNAPSHOT_MAGIC: u32 = 0x534E4150; // "SNAP"

/// Current snapshot and manifest format version
pub const FORMAT_VERSION: u32 = 1;

/// Length prefix + checksum around every WAL payload
const FRAME_OVERHEAD: u64 = 8;

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `wal_<first seq>.wal`, zero padded so names sort in log order.
pub fn wal_segment_name(first_seq: u64) -> String {
    format!("wal_{:020}.wal", first_seq)
}

/// `snapshot_<last seq>.snap`
pub fn snapshot_name(seq: u64) -> String {
    format!("snapshot_{:020}.snap", seq)
}

/// Sequence number embedded in a segment or snapshot file name.
pub fn parse_seq(name: &str) -> Option<u64> {
    let stem = name
        .strip_prefix("wal_")
        .and_then(|s| s.strip_suffix(".wal"))
        .or_else(|| {
            name.strip_prefix("snapshot_")
                .and_then(|s| s.strip_suffix(".snap"))
        })?;
    stem.parse().ok()
}

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalOp {
    /// A new record; its internal id is fixed at log time.
    Insert { record: Record },
    /// Tombstone `superseded` and insert `record`, atomically.
    Update { superseded: Vec<u64>, record: Record },
    /// Tombstone the listed records of `external_id`.
    Tombstone {
        external_id: String,
        internal_ids: Vec<u64>,
    },
}

impl WalOp {
    pub fn external_id(&self) -> &str {
        match self {
            WalOp::Insert { record } | WalOp::Update { record, .. } => &record.external_id,
            WalOp::Tombstone { external_id, .. } => external_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WalOp::Insert { .. } => "insert",
            WalOp::Update { .. } => "update",
            WalOp::Tombstone { .. } => "tombstone",
        }
    }
}

/// WAL entry: single mutation logged to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub timestamp: u64,
    pub op: WalOp,
}

impl WalEntry {
    pub fn new(seq: u64, op: WalOp) -> Self {
        Self {
            seq,
            timestamp: now_secs(),
            op,
        }
    }
}

/// Append one `[len][payload][crc]` frame for `entry` to `buf`.
fn encode_frame(entry: &WalEntry, buf: &mut Vec<u8>) -> Result<()> {
    let entry_bytes = bincode::serialize(entry).context("Failed to serialize WAL entry")?;
    let entry_size = u32::try_from(entry_bytes.len())
        .context("WAL entry exceeds the 4 GiB frame limit")?;
    let checksum = crc32fast::hash(&entry_bytes);
    buf.extend_from_slice(&entry_size.to_le_bytes());
    buf.extend_from_slice(&entry_bytes);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(())
}

/// WAL writer: append-only segment with checksummed frames
pub struct WalWriter {
    file: File,
    path: PathBuf,
    fsync_policy: FsyncPolicy,
    entry_count: usize,
    bytes_written: u64,
}

impl WalWriter {
    /// Create a new, empty segment. Fails if the file already exists.
    #[instrument(level = "debug", skip(path), fields(wal_segment = %path.as_ref().display(), fsync_policy = ?fsync_policy))]
    pub fn create(path: impl AsRef<Path>, fsync_policy: FsyncPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Failed to create WAL file {}", path.display()))?;

        // Write magic header
        file.write_all(&WAL_MAGIC.to_le_bytes())?;
        sync_file(&file, fsync_policy)?;

        Ok(Self {
            file,
            path,
            fsync_policy,
            entry_count: 0,
            bytes_written: 4, // Magic header
        })
    }

    /// Reopen an existing segment for appending after its last byte.
    #[instrument(level = "debug", skip(path), fields(wal_segment = %path.as_ref().display()))]
    pub fn open_append(path: impl AsRef<Path>, fsync_policy: FsyncPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open WAL file {}", path.display()))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .context("Failed to read WAL magic header")?;
        let magic_val = u32::from_le_bytes(magic);
        if magic_val != WAL_MAGIC {
            bail!(
                "Invalid WAL magic: expected {:#x}, got {:#x}",
                WAL_MAGIC,
                magic_val
            );
        }
        let end = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file,
            path,
            fsync_policy,
            entry_count: 0,
            bytes_written: end,
        })
    }

    /// Append one entry and make it durable per the fsync policy.
    #[instrument(level = "trace", skip(self, entry), fields(seq = entry.seq, op = entry.op.kind()))]
    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        self.append_batch(std::slice::from_ref(entry))
    }

    /// Append several entries with a single flush and sync.
    #[instrument(level = "trace", skip(self, entries), fields(entries = entries.len()))]
    pub fn append_batch(&mut self, entries: &[WalEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for entry in entries {
            encode_frame(entry, &mut buf)?;
        }

        // One write per batch; a failure leaves at most a torn tail
        self.file
            .write_all(&buf)
            .context("Failed to write WAL frames")?;
        sync_file(&self.file, self.fsync_policy)?;

        self.entry_count += entries.len();
        self.bytes_written += buf.len() as u64;
        Ok(())
    }

    /// Force fsync regardless of policy
    #[instrument(level = "trace", skip(self))]
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data().context("Failed to fsync WAL")?;
        Ok(())
    }

    /// Drop everything after `len` bytes and continue appending there.
    pub fn rollback_to(&mut self, len: u64) -> Result<()> {
        self.file
            .set_len(len)
            .context("Failed to truncate WAL segment")?;
        self.file.seek(SeekFrom::Start(len))?;
        self.file.sync_all().context("Failed to fsync truncated WAL")?;
        self.bytes_written = len;
        Ok(())
    }

    /// Entries appended through this writer
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Segment length in bytes, header included
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn sync_file(file: &File, policy: FsyncPolicy) -> Result<()> {
    match policy {
        FsyncPolicy::None => {}
        FsyncPolicy::DataOnly => file.sync_data().context("Failed to fsync WAL data")?,
        FsyncPolicy::Full => file.sync_all().context("Failed to fsync WAL")?,
    }
    Ok(())
}

/// Result of scanning one segment.
#[derive(Debug, Default)]
pub struct WalReadOutcome {
    /// Entries up to the first bad frame
    pub entries: Vec<WalEntry>,
    /// Byte length of the valid prefix (header included)
    pub valid_len: u64,
    /// Why reading stopped early, if it did
    pub torn_tail: Option<String>,
}

/// WAL reader: scans frames until EOF or the first bad frame
pub struct WalReader {
    file: BufReader<File>,
    path: PathBuf,
    max_entry_bytes: u32,
}

impl WalReader {
    /// Open existing WAL file
    #[instrument(level = "debug", skip(path), fields(wal_segment = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, max_entry_bytes: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("Failed to open WAL file {}", path.display()))?;

        Ok(Self {
            file: BufReader::new(file),
            path,
            max_entry_bytes,
        })
    }

    /// Read every intact frame.
    ///
    /// A short read, oversized length, checksum mismatch or undecodable payload
    /// ends the scan and is reported in `torn_tail`; the caller decides whether
    /// that is a recoverable tail. A wrong magic number is always an error.
    #[instrument(level = "debug", skip(self), fields(wal_segment = %self.path.display()))]
    pub fn read_all(&mut self) -> Result<WalReadOutcome> {
        let mut outcome = WalReadOutcome::default();

        let mut magic = [0u8; 4];
        let n = read_full(&mut self.file, &mut magic)?;
        if n < magic.len() {
            outcome.torn_tail = Some(format!("missing header ({} of 4 bytes)", n));
            return Ok(outcome);
        }
        let magic_val = u32::from_le_bytes(magic);
        if magic_val != WAL_MAGIC {
            bail!(
                "Invalid WAL magic in {}: expected {:#x}, got {:#x}",
                self.path.display(),
                WAL_MAGIC,
                magic_val
            );
        }
        outcome.valid_len = 4;

        loop {
            // Read entry size
            let mut size_bytes = [0u8; 4];
            match read_full(&mut self.file, &mut size_bytes)? {
                0 => break,
                4 => {}
                n => {
                    outcome.torn_tail = Some(format!("truncated length prefix ({} bytes)", n));
                    break;
                }
            }

            let entry_size = u32::from_le_bytes(size_bytes);
            if entry_size > self.max_entry_bytes {
                outcome.torn_tail = Some(format!(
                    "frame length {} exceeds limit {}",
                    entry_size, self.max_entry_bytes
                ));
                break;
            }

            // Read entry data
            let mut entry_bytes = vec![0u8; entry_size as usize];
            let n = read_full(&mut self.file, &mut entry_bytes)?;
            if n < entry_bytes.len() {
                outcome.torn_tail = Some(format!(
                    "truncated payload ({} of {} bytes)",
                    n, entry_size
                ));
                break;
            }

            // Read checksum
            let mut checksum_bytes = [0u8; 4];
            if read_full(&mut self.file, &mut checksum_bytes)? < 4 {
                outcome.torn_tail = Some("truncated checksum".to_string());
                break;
            }

            let stored_checksum = u32::from_le_bytes(checksum_bytes);
            let computed_checksum = crc32fast::hash(&entry_bytes);
            if stored_checksum != computed_checksum {
                debug!(
                    stored_checksum = format!("{:#x}", stored_checksum),
                    computed_checksum = format!("{:#x}", computed_checksum),
                    "corrupted WAL entry; checksum mismatch"
                );
                outcome.torn_tail = Some("checksum mismatch".to_string());
                break;
            }

            // Deserialize entry
            let entry: WalEntry = match bincode::deserialize(&entry_bytes) {
                Ok(entry) => entry,
                Err(e) => {
                    outcome.torn_tail = Some(format!("undecodable entry: {}", e));
                    break;
                }
            };

            outcome.entries.push(entry);
            outcome.valid_len += FRAME_OVERHEAD + entry_size as u64;
        }

        Ok(outcome)
    }
}

/// Like `read_exact`, but reports how many bytes were available instead of
/// failing on EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Failed to read WAL"),
        }
    }
    Ok(filled)
}

/// Cut a segment back to its last good frame.
#[instrument(level = "debug", skip(path), fields(wal_segment = %path.as_ref().display()))]
pub fn truncate_segment(path: impl AsRef<Path>, valid_len: u64) -> Result<()> {
    let path = path.as_ref();
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for truncation", path.display()))?;
    file.set_len(valid_len)
        .context("Failed to truncate WAL segment")?;
    file.sync_all().context("Failed to fsync truncated WAL")?;
    Ok(())
}

/// Snapshot: full index state as of `seq`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// Last WAL sequence number included
    pub seq: u64,
    pub timestamp: u64,
    pub dimension: usize,
    pub metric: DistanceMetric,
    /// Every record, tombstoned ones included, in internal-id order
    pub records: Vec<Record>,
    pub graph: HnswIndex,
}

impl Snapshot {
    /// Create snapshot from current state
    pub fn new(seq: u64, records: Vec<Record>, graph: HnswIndex) -> Self {
        Self {
            version: FORMAT_VERSION,
            seq,
            timestamp: now_secs(),
            dimension: graph.dimension(),
            metric: graph.distance_metric(),
            records,
            graph,
        }
    }

    /// Save snapshot to file (atomic: write to temp, then rename)
    #[instrument(level = "debug", skip(self, path), fields(seq = self.seq, records = self.records.len(), dimension = self.dimension))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        // Write to temporary file first
        let temp_path = path.with_extension("tmp");

        let file = File::create(&temp_path).context("Failed to create snapshot temp file")?;
        let mut writer = BufWriter::new(file);

        // Write magic header
        writer.write_all(&SNAPSHOT_MAGIC.to_le_bytes())?;

        // Serialize snapshot
        let snapshot_bytes = bincode::serialize(self).context("Failed to serialize snapshot")?;

        // Write size + data + checksum
        let size = snapshot_bytes.len() as u64;
        writer.write_all(&size.to_le_bytes())?;
        writer.write_all(&snapshot_bytes)?;

        let checksum = crc32fast::hash(&snapshot_bytes);
        writer.write_all(&checksum.to_le_bytes())?;

        writer.flush()?;
        writer.get_ref().sync_all()?;

        // Atomic rename
        std::fs::rename(&temp_path, path).context("Failed to rename snapshot file")?;

        Ok(())
    }

    /// Load snapshot from file (validates checksum)
    #[instrument(level = "debug", skip(path), fields(snapshot = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path).context("Failed to open snapshot file")?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        // Validate magic
        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .context("Failed to read snapshot magic")?;

        let magic_val = u32::from_le_bytes(magic);
        if magic_val != SNAPSHOT_MAGIC {
            bail!(
                "Invalid snapshot magic: expected {:#x}, got {:#x}",
                SNAPSHOT_MAGIC,
                magic_val
            );
        }

        // Read size
        let mut size_bytes = [0u8; 8];
        reader.read_exact(&mut size_bytes)?;
        let size = u64::from_le_bytes(size_bytes);
        if size > file_len.saturating_sub(16) {
            bail!(
                "Snapshot size {} exceeds file length {}",
                size,
                file_len
            );
        }

        // Read data
        let mut snapshot_bytes = vec![0u8; size as usize];
        reader
            .read_exact(&mut snapshot_bytes)
            .context("Failed to read snapshot data")?;

        // Read checksum
        let mut checksum_bytes = [0u8; 4];
        reader
            .read_exact(&mut checksum_bytes)
            .context("Failed to read snapshot checksum")?;

        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&snapshot_bytes);

        if stored_checksum != computed_checksum {
            bail!(
                "Snapshot checksum mismatch: stored={:#x}, computed={:#x}",
                stored_checksum,
                computed_checksum
            );
        }

        // Deserialize
        let snapshot: Snapshot =
            bincode::deserialize(&snapshot_bytes).context("Failed to deserialize snapshot")?;

        if snapshot.version != FORMAT_VERSION {
            bail!(
                "Unsupported snapshot version {} (expected {})",
                snapshot.version,
                FORMAT_VERSION
            );
        }

        Ok(snapshot)
    }
}

/// Manifest: tracks live snapshots and WAL segments, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub snapshots: Vec<String>,
    pub wal_segments: Vec<String>,
    pub last_updated: u64,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            version: FORMAT_VERSION,
            snapshots: Vec::new(),
            wal_segments: Vec::new(),
            last_updated: now_secs(),
        }
    }

    pub fn latest_snapshot(&self) -> Option<&str> {
        self.snapshots.last().map(String::as_str)
    }

    /// Save manifest (atomic)
    #[instrument(level = "debug", skip(self, path), fields(wal_segments = self.wal_segments.len(), snapshots = self.snapshots.len()))]
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let temp_path = path.with_extension("tmp");

        self.last_updated = now_secs();
        let manifest_json =
            serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;

        let mut file =
            File::create(&temp_path).context("Failed to create manifest temp file")?;
        file.write_all(manifest_json.as_bytes())
            .context("Failed to write manifest temp file")?;
        file.sync_all().context("Failed to fsync manifest")?;

        std::fs::rename(&temp_path, path).context("Failed to rename manifest file")?;

        Ok(())
    }

    /// Load manifest
    #[instrument(level = "debug", skip(path))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path).context("Failed to read manifest file")?;

        let manifest: Manifest =
            serde_json::from_str(&contents).context("Failed to parse manifest JSON")?;

        Ok(manifest)
    }

    /// Load or create new manifest
    #[instrument(level = "debug", skip(path))]
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}
