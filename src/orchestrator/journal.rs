#![allow(unsafe_code)]
//! Memory-mapped, append-only history journal.
//!
//! The file starts with a 32-byte header (magic `HIST`, version, entry
//! count, max entries, next write offset) followed by fixed-size packed
//! entries. Growth doubles the mapped/file capacity, page-aligned, under a
//! writer mutex; a corrupt header or truncated file is never fatal — the
//! bad file is rotated aside and a fresh journal is started in its place.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::CoreError;
use crate::primitives::checksum::rotate_xor_checksum;

pub const HEADER_SIZE: usize = 32;
pub const ENTRY_SIZE: usize = 312;
pub const CLASS_FIELD_LEN: usize = 128;
pub const METHOD_FIELD_LEN: usize = 128;
pub const GRADE_FIELD_LEN: usize = 4;

const MAGIC: &[u8; 4] = b"HIST";
const VERSION: u32 = 1;
const INITIAL_CAPACITY_ENTRIES: u64 = 64;

fn page_size_bytes() -> u64 {
    #[cfg(unix)]
    {
        // SAFETY: `sysconf` with `_SC_PAGESIZE` has no preconditions.
        let value = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if value > 0 {
            return value as u64;
        }
    }
    4096
}

fn io_error(context: &str, err: std::io::Error) -> CoreError {
    CoreError::io_error().with_context(format!("{context}: {err}"))
}

struct Header {
    magic: [u8; 4],
    version: u32,
    entry_count: u64,
    max_entries: u64,
    next_offset: u64,
}

impl Header {
    fn fresh(capacity_entries: u64) -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION,
            entry_count: 0,
            max_entries: capacity_entries,
            next_offset: HEADER_SIZE as u64,
        }
    }

    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.max_entries.to_le_bytes());
        buf[24..32].copy_from_slice(&self.next_offset.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if &magic != MAGIC {
            return None;
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().ok()?);
        if version != VERSION {
            return None;
        }
        Some(Self {
            magic,
            version,
            entry_count: u64::from_le_bytes(buf[8..16].try_into().ok()?),
            max_entries: u64::from_le_bytes(buf[16..24].try_into().ok()?),
            next_offset: u64::from_le_bytes(buf[24..32].try_into().ok()?),
        })
    }
}

fn write_fixed_str(buf: &mut [u8], offset: usize, width: usize, s: &str) {
    let bytes = s.as_bytes();
    let mut end = bytes.len().min(width);
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    buf[offset..offset + end].copy_from_slice(&bytes[..end]);
    for b in &mut buf[offset + end..offset + width] {
        *b = 0;
    }
}

fn read_fixed_str(buf: &[u8], offset: usize, width: usize) -> String {
    let slice = &buf[offset..offset + width];
    let len = slice.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&slice[..len]).into_owned()
}

/// One finalized test result, as persisted to the journal.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub timestamp_ns: u64,
    pub class_name: String,
    pub method_name: String,
    pub elapsed_ms: f64,
    pub memory_mb: f64,
    pub query_count: u32,
    pub cache_ratio: f64,
    pub score: f64,
    pub grade: String,
    pub n_plus_one: bool,
    pub severity: u8,
}

impl HistoryEntry {
    fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        let mut offset = 0;

        buf[offset..offset + 8].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        offset += 8;
        write_fixed_str(&mut buf, offset, CLASS_FIELD_LEN, &self.class_name);
        offset += CLASS_FIELD_LEN;
        write_fixed_str(&mut buf, offset, METHOD_FIELD_LEN, &self.method_name);
        offset += METHOD_FIELD_LEN;
        buf[offset..offset + 8].copy_from_slice(&self.elapsed_ms.to_le_bytes());
        offset += 8;
        buf[offset..offset + 8].copy_from_slice(&self.memory_mb.to_le_bytes());
        offset += 8;
        buf[offset..offset + 4].copy_from_slice(&self.query_count.to_le_bytes());
        offset += 4;
        buf[offset..offset + 8].copy_from_slice(&self.cache_ratio.to_le_bytes());
        offset += 8;
        buf[offset..offset + 8].copy_from_slice(&self.score.to_le_bytes());
        offset += 8;
        write_fixed_str(&mut buf, offset, GRADE_FIELD_LEN, &self.grade);
        offset += GRADE_FIELD_LEN;
        buf[offset] = u8::from(self.n_plus_one);
        offset += 1;
        buf[offset] = self.severity;
        offset += 1;
        offset += 2; // padding, keeps the trailing checksum field 4-byte aligned

        let checksum = rotate_xor_checksum(&buf[..offset]);
        buf[offset..offset + 4].copy_from_slice(&checksum.to_le_bytes());
        offset += 4;
        debug_assert_eq!(offset, ENTRY_SIZE);
        buf
    }

    /// Parses and checksum-validates a packed entry. `None` on mismatch (a
    /// corrupt or partially-written record).
    fn from_bytes(buf: &[u8; ENTRY_SIZE]) -> Option<Self> {
        let payload_len = ENTRY_SIZE - 4;
        let stored_checksum = u32::from_le_bytes(buf[payload_len..ENTRY_SIZE].try_into().ok()?);
        if rotate_xor_checksum(&buf[..payload_len]) != stored_checksum {
            return None;
        }

        let mut offset = 0;
        let timestamp_ns = u64::from_le_bytes(buf[offset..offset + 8].try_into().ok()?);
        offset += 8;
        let class_name = read_fixed_str(buf, offset, CLASS_FIELD_LEN);
        offset += CLASS_FIELD_LEN;
        let method_name = read_fixed_str(buf, offset, METHOD_FIELD_LEN);
        offset += METHOD_FIELD_LEN;
        let elapsed_ms = f64::from_le_bytes(buf[offset..offset + 8].try_into().ok()?);
        offset += 8;
        let memory_mb = f64::from_le_bytes(buf[offset..offset + 8].try_into().ok()?);
        offset += 8;
        let query_count = u32::from_le_bytes(buf[offset..offset + 4].try_into().ok()?);
        offset += 4;
        let cache_ratio = f64::from_le_bytes(buf[offset..offset + 8].try_into().ok()?);
        offset += 8;
        let score = f64::from_le_bytes(buf[offset..offset + 8].try_into().ok()?);
        offset += 8;
        let grade = read_fixed_str(buf, offset, GRADE_FIELD_LEN);
        offset += GRADE_FIELD_LEN;
        let n_plus_one = buf[offset] != 0;
        offset += 1;
        let severity = buf[offset];

        Some(Self {
            timestamp_ns,
            class_name,
            method_name,
            elapsed_ms,
            memory_mb,
            query_count,
            cache_ratio,
            score,
            grade,
            n_plus_one,
            severity,
        })
    }
}

struct JournalState {
    file: File,
    mmap: MmapMut,
    header: Header,
}

/// A memory-mapped append-only journal of [`HistoryEntry`] records.
pub struct Journal {
    state: parking_lot::Mutex<JournalState>,
    path: PathBuf,
}

fn rotate_aside(path: &Path) -> std::io::Result<()> {
    let mut candidate = path.with_extension("corrupt");
    let mut suffix = 1;
    while candidate.exists() {
        candidate = path.with_extension(format!("corrupt.{suffix}"));
        suffix += 1;
    }
    std::fs::rename(path, candidate)
}

fn create_fresh(path: &Path) -> Result<JournalState, CoreError> {
    let capacity_entries = INITIAL_CAPACITY_ENTRIES;
    let size = HEADER_SIZE as u64 + capacity_entries * ENTRY_SIZE as u64;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| io_error("creating journal file", e))?;
    file.set_len(size).map_err(|e| io_error("sizing journal file", e))?;
    // SAFETY: `file` is freshly sized and owned exclusively by this state.
    let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| io_error("mapping journal file", e))?;
    let header = Header::fresh(capacity_entries);
    mmap[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    Ok(JournalState { file, mmap, header })
}

fn open_existing(path: &Path) -> Result<Option<JournalState>, CoreError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| io_error("opening journal file", e))?;
    let file_len = file
        .metadata()
        .map_err(|e| io_error("reading journal metadata", e))?
        .len();
    if file_len < HEADER_SIZE as u64 {
        return Ok(None);
    }
    // SAFETY: `file` is a regular file opened read/write above.
    let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| io_error("mapping journal file", e))?;
    let Some(header) = Header::from_bytes(&mmap[..HEADER_SIZE]) else {
        return Ok(None);
    };
    let required = HEADER_SIZE as u64 + header.entry_count * ENTRY_SIZE as u64;
    if required > file_len {
        return Ok(None);
    }
    // A torn or bit-flipped entry anywhere in the recorded range means the
    // file can no longer be trusted; treat it the same as header corruption
    // and let the caller rotate the whole file aside rather than silently
    // serving a gap in the history.
    for i in 0..header.entry_count {
        let offset = HEADER_SIZE + i as usize * ENTRY_SIZE;
        let mut raw = [0u8; ENTRY_SIZE];
        raw.copy_from_slice(&mmap[offset..offset + ENTRY_SIZE]);
        if HistoryEntry::from_bytes(&raw).is_none() {
            return Ok(None);
        }
    }
    Ok(Some(JournalState { file, mmap, header }))
}

impl Journal {
    /// Opens `path`, creating a fresh journal if it doesn't exist or
    /// validation fails (in which case the bad file is rotated aside
    /// first, never aborting).
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let state = if path.exists() {
            match open_existing(path) {
                Ok(Some(state)) => state,
                Ok(None) | Err(_) => {
                    let _ = rotate_aside(path);
                    create_fresh(path)?
                }
            }
        } else {
            create_fresh(path)?
        };
        Ok(Self {
            state: parking_lot::Mutex::new(state),
            path: path.to_path_buf(),
        })
    }

    /// Appends a finalized entry, growing the mapping (and backing file)
    /// if needed. Growth is page-aligned and doubles capacity.
    pub fn append(&self, entry: &HistoryEntry) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        let needed_end = state.header.next_offset + ENTRY_SIZE as u64;
        if needed_end > state.mmap.len() as u64 {
            grow(&mut state, needed_end)?;
        }
        let offset = state.header.next_offset as usize;
        let bytes = entry.to_bytes();
        state.mmap[offset..offset + ENTRY_SIZE].copy_from_slice(&bytes);
        state.header.entry_count += 1;
        state.header.next_offset += ENTRY_SIZE as u64;
        let header_bytes = state.header.to_bytes();
        state.mmap[..HEADER_SIZE].copy_from_slice(&header_bytes);
        let _ = state.mmap.flush_async();
        Ok(())
    }

    /// Number of entries currently recorded.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.state.lock().header.entry_count
    }

    /// Returns every recorded entry in append order. `open` already rejects
    /// (by rotating aside) any file containing an entry that fails its
    /// checksum, so every entry returned here is one this process itself
    /// wrote and validated.
    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        let state = self.state.lock();
        let mut out = Vec::with_capacity(state.header.entry_count as usize);
        for i in 0..state.header.entry_count {
            let offset = HEADER_SIZE + i as usize * ENTRY_SIZE;
            if offset + ENTRY_SIZE > state.mmap.len() {
                break;
            }
            let mut raw = [0u8; ENTRY_SIZE];
            raw.copy_from_slice(&state.mmap[offset..offset + ENTRY_SIZE]);
            if let Some(entry) = HistoryEntry::from_bytes(&raw) {
                out.push(entry);
            }
        }
        out
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn grow(state: &mut JournalState, needed_end: u64) -> Result<(), CoreError> {
    let page = page_size_bytes();
    let mut new_size = (state.mmap.len() as u64).max(HEADER_SIZE as u64 + ENTRY_SIZE as u64);
    while new_size < needed_end {
        new_size = new_size.saturating_mul(2).max(needed_end);
    }
    new_size = new_size.div_ceil(page) * page;

    state
        .file
        .set_len(new_size)
        .map_err(|e| io_error("growing journal file", e))?;
    // SAFETY: `file` was just resized; the old mapping is dropped here and
    // replaced before any other code observes `state.mmap`.
    let new_mmap =
        unsafe { MmapMut::map_mut(&state.file) }.map_err(|e| io_error("remapping journal file", e))?;
    state.mmap = new_mmap;
    state.header.max_entries = (new_size - HEADER_SIZE as u64) / ENTRY_SIZE as u64;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(seed: u64) -> HistoryEntry {
        HistoryEntry {
            timestamp_ns: seed,
            class_name: format!("ClassUnderTest{seed}"),
            method_name: "test_method".to_string(),
            elapsed_ms: 12.5,
            memory_mb: 3.0,
            query_count: 4,
            cache_ratio: 0.5,
            score: 91.0,
            grade: "A".to_string(),
            n_plus_one: seed % 2 == 0,
            severity: 1,
        }
    }

    #[test]
    fn entry_round_trips_through_bytes() {
        let entry = sample_entry(42);
        let bytes = entry.to_bytes();
        let parsed = HistoryEntry::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.timestamp_ns, 42);
        assert_eq!(parsed.class_name, "ClassUnderTest42");
        assert_eq!(parsed.method_name, "test_method");
        assert!((parsed.elapsed_ms - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn corrupted_checksum_is_rejected_on_parse() {
        let entry = sample_entry(1);
        let mut bytes = entry.to_bytes();
        bytes[0] ^= 0xFF;
        assert!(HistoryEntry::from_bytes(&bytes).is_none());
    }

    #[test]
    fn append_and_reopen_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.bin");
        {
            let journal = Journal::open(&path).unwrap();
            for i in 0..10u64 {
                journal.append(&sample_entry(i)).unwrap();
            }
            assert_eq!(journal.entry_count(), 10);
        }
        let reopened = Journal::open(&path).unwrap();
        assert_eq!(reopened.entry_count(), 10);
        assert_eq!(reopened.entries().len(), 10);
    }

    #[test]
    fn growth_beyond_initial_capacity_works() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.bin");
        let journal = Journal::open(&path).unwrap();
        for i in 0..(INITIAL_CAPACITY_ENTRIES * 2 + 5) {
            journal.append(&sample_entry(i)).unwrap();
        }
        assert_eq!(journal.entry_count(), INITIAL_CAPACITY_ENTRIES * 2 + 5);
        assert_eq!(journal.entries().len() as u64, INITIAL_CAPACITY_ENTRIES * 2 + 5);
    }

    #[test]
    fn header_corruption_causes_rotation_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.bin");
        {
            let journal = Journal::open(&path).unwrap();
            for i in 0..10u64 {
                journal.append(&sample_entry(i)).unwrap();
            }
        }
        // Flip a byte inside the header to force header-level corruption.
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(0)).unwrap();
            file.write_all(b"XXXX").unwrap();
        }
        let reloaded = Journal::open(&path).unwrap();
        assert_eq!(reloaded.entry_count(), 0);
        assert!(path.with_extension("corrupt").exists());
    }

    #[test]
    fn corrupted_last_entry_causes_rotation_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.bin");
        {
            let journal = Journal::open(&path).unwrap();
            for i in 0..10u64 {
                journal.append(&sample_entry(i)).unwrap();
            }
        }
        // Flip a byte inside the last entry's payload to break its checksum.
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            let last_offset = HEADER_SIZE as u64 + 9 * ENTRY_SIZE as u64;
            file.seek(SeekFrom::Start(last_offset)).unwrap();
            file.write_all(&[0xFFu8]).unwrap();
        }
        let reloaded = Journal::open(&path).unwrap();
        assert_eq!(reloaded.entry_count(), 0);
        assert_eq!(reloaded.entries().len(), 0);
        assert!(path.with_extension("corrupt").exists());
    }
}
