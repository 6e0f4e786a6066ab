//! Binary configuration blob (C5): a small magic/version/checksum header
//! around an opaque payload.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::CoreError;
use crate::primitives::checksum::rotate_xor_checksum;

const MAGIC: u32 = 0x4D45_5243; // "MERC", little-endian
const SUPPORTED_VERSION: u16 = 1;
const HEADER_SIZE: usize = 16;
/// Sanity ceiling on a loaded/saved payload.
pub const MAX_CONFIG_SIZE: usize = 64 * 1024;

/// The fixed-size table capacities used across the crate's other modules,
/// consolidated here so call sites (mainly tests) don't re-hardcode them.
/// Not configurable through the ABI; the tables themselves are sized at
/// compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeLimits {
    /// [`crate::session::N_SLOTS`]
    pub session_slots: usize,
    /// [`crate::analyzer::MAX_CLUSTERS`]
    pub cluster_table_size: usize,
    /// [`crate::orchestrator::context::N_CONTEXTS`]
    pub context_pool_size: usize,
    /// [`crate::analyzer::DUP_THRESHOLD`]
    pub dup_threshold: u64,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            session_slots: crate::session::N_SLOTS,
            cluster_table_size: crate::analyzer::MAX_CLUSTERS,
            context_pool_size: crate::orchestrator::context::N_CONTEXTS,
            dup_threshold: crate::analyzer::DUP_THRESHOLD,
        }
    }
}

fn validate_path(path: &Path) -> Result<(), CoreError> {
    if path.as_os_str().is_empty() {
        return Err(CoreError::invalid_argument().with_context("empty config path"));
    }
    Ok(())
}

fn io_error(context: &str, err: std::io::Error) -> CoreError {
    CoreError::io_error().with_context(format!("{context}: {err}"))
}

#[cfg(unix)]
fn is_symlink_rejection(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ELOOP)
}

#[cfg(not(unix))]
fn is_symlink_rejection(_err: &std::io::Error) -> bool {
    false
}

/// Translates an open() failure, giving the symlink case (rejected by
/// `O_NOFOLLOW` on unix) its own error kind instead of a generic I/O error.
fn open_error(context: &str, err: std::io::Error) -> CoreError {
    if is_symlink_rejection(&err) {
        CoreError::invalid_argument().with_context("refusing to follow symlink config path")
    } else {
        io_error(context, err)
    }
}

/// Opens `path` with `O_NOFOLLOW` on unix, so a symlink swapped in after
/// any earlier check but before this open is rejected by the kernel rather
/// than silently followed. `opts` carries the caller's read/write/create
/// flags; this only adds the no-follow behavior.
fn open_no_follow(path: &Path, opts: &mut OpenOptions) -> std::io::Result<File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.custom_flags(libc::O_NOFOLLOW);
    }
    opts.open(path)
}

/// Verifies the already-open file is a regular file, using metadata read
/// from the open handle itself (`fstat`, not a separate path-based stat)
/// so there's no window between the check and the file this code actually
/// reads or writes.
fn reject_non_regular(file: &File) -> Result<(), CoreError> {
    let meta = file.metadata().map_err(|e| io_error("reading config metadata", e))?;
    if !meta.file_type().is_file() {
        return Err(CoreError::invalid_argument().with_context("config path is not a regular file"));
    }
    Ok(())
}

/// Writes `payload` to `path` under the `MERC` header (magic, version 1,
/// flags, size, rotate-XOR checksum over the payload). `flags` is
/// recorded as-is; the core assigns no meaning to it.
pub fn save_binary_configuration(path: &Path, flags: u16, payload: &[u8]) -> Result<(), CoreError> {
    validate_path(path)?;
    if payload.len() > MAX_CONFIG_SIZE {
        return Err(CoreError::invalid_argument().with_context("config payload exceeds 64 KiB"));
    }

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    header[4..6].copy_from_slice(&SUPPORTED_VERSION.to_le_bytes());
    header[6..8].copy_from_slice(&flags.to_le_bytes());
    header[8..12].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    header[12..16].copy_from_slice(&rotate_xor_checksum(payload).to_le_bytes());

    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    let mut file = open_no_follow(path, &mut opts).map_err(|e| open_error("creating config file", e))?;
    reject_non_regular(&file)?;
    file.write_all(&header)
        .and_then(|()| file.write_all(payload))
        .map_err(|e| io_error("writing config file", e))?;
    Ok(())
}

/// Reads and validates a `MERC`-headed blob, returning its payload.
/// Unknown version, bad magic, oversized `config_size`, or checksum
/// mismatch all fail with [`crate::error::CoreErrorKind::CorruptData`].
pub fn load_binary_configuration(path: &Path) -> Result<Vec<u8>, CoreError> {
    validate_path(path)?;

    let mut opts = OpenOptions::new();
    opts.read(true);
    let mut file = open_no_follow(path, &mut opts).map_err(|e| open_error("opening config file", e))?;
    reject_non_regular(&file)?;
    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header)
        .map_err(|e| io_error("reading config header", e))?;

    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(CoreError::corrupt_data().with_context("bad config magic"));
    }
    let version = u16::from_le_bytes(header[4..6].try_into().unwrap());
    if version != SUPPORTED_VERSION {
        return Err(CoreError::corrupt_data().with_context("unsupported config version"));
    }
    let size = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
    if size > MAX_CONFIG_SIZE {
        return Err(CoreError::corrupt_data().with_context("config_size exceeds 64 KiB"));
    }
    let stored_checksum = u32::from_le_bytes(header[12..16].try_into().unwrap());

    let mut payload = vec![0u8; size];
    file.read_exact(&mut payload)
        .map_err(|e| io_error("reading config payload", e))?;

    if rotate_xor_checksum(&payload) != stored_checksum {
        return Err(CoreError::corrupt_data().with_context("config checksum mismatch"));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.bin");
        save_binary_configuration(&path, 0, b"hello configuration").unwrap();
        let loaded = load_binary_configuration(&path).unwrap();
        assert_eq!(loaded, b"hello configuration");
    }

    #[test]
    fn runtime_limits_match_literal_spec_defaults() {
        let limits = RuntimeLimits::default();
        assert_eq!(limits.session_slots, 2048);
        assert_eq!(limits.cluster_table_size, 1024);
        assert_eq!(limits.context_pool_size, 256);
        assert_eq!(limits.dup_threshold, 5);
    }

    #[test]
    fn header_bytes_match_merc_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.bin");
        save_binary_configuration(&path, 0, b"x").unwrap();
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[0..4], &[0x43, 0x52, 0x45, 0x4D]);
        assert_eq!(&raw[4..6], &[0x01, 0x00]);
    }

    #[test]
    fn empty_path_is_invalid_argument() {
        let err = save_binary_configuration(Path::new(""), 0, b"x").unwrap_err();
        assert_eq!(err.kind(), crate::error::CoreErrorKind::InvalidArgument);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.bin");
        save_binary_configuration(&path, 0, b"payload bytes").unwrap();

        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        std::fs::write(&path, raw).unwrap();

        let err = load_binary_configuration(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::CoreErrorKind::CorruptData);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.bin");
        save_binary_configuration(&path, 0, b"payload").unwrap();

        let mut raw = std::fs::read(&path).unwrap();
        raw[4] = 0x02;
        std::fs::write(&path, raw).unwrap();

        let err = load_binary_configuration(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::CoreErrorKind::CorruptData);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_path_is_rejected_on_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.bin");
        let link = dir.path().join("link.bin");
        save_binary_configuration(&target, 0, b"behind the link").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = save_binary_configuration(&link, 0, b"via symlink").unwrap_err();
        assert_eq!(err.kind(), crate::error::CoreErrorKind::InvalidArgument);

        let err = load_binary_configuration(&link).unwrap_err();
        assert_eq!(err.kind(), crate::error::CoreErrorKind::InvalidArgument);
    }

    #[test]
    fn oversized_payload_is_rejected_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.bin");
        let huge = vec![0u8; MAX_CONFIG_SIZE + 1];
        let err = save_binary_configuration(&path, 0, &huge).unwrap_err();
        assert_eq!(err.kind(), crate::error::CoreErrorKind::InvalidArgument);
    }
}
