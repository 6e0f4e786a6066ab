//! Integration coverage for the on-disk formats (spec.md §8, scenarios 4
//! and 5) that doesn't go through the ABI, since both the journal and the
//! config blob are plain-old Rust structs/functions underneath it.

use mercury_core::config::{load_binary_configuration, save_binary_configuration};
use mercury_core::orchestrator::journal::{HistoryEntry, Journal, ENTRY_SIZE, HEADER_SIZE};

fn sample_entry(timestamp_ns: u64) -> HistoryEntry {
    HistoryEntry {
        timestamp_ns,
        class_name: "JournalScenarioTest".to_string(),
        method_name: "run".to_string(),
        elapsed_ms: 12.5,
        memory_mb: 3.0,
        query_count: 7,
        cache_ratio: 0.5,
        score: 91.0,
        grade: "A".to_string(),
        n_plus_one: false,
        severity: 0,
    }
}

/// Scenario 4, literal form (spec.md §8): corrupting the last entry's CRC
/// by flipping a byte rotates the whole file aside on reload, leaving a
/// fresh, zero-entry journal in its place — the same outcome as header
/// corruption.
#[test]
fn corrupted_entry_payload_rotates_file_on_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.journal");

    {
        let journal = Journal::open(&path).unwrap();
        for i in 0..10 {
            journal.append(&sample_entry(i)).unwrap();
        }
        assert_eq!(journal.entry_count(), 10);
    }

    // Flip one byte inside the last entry's payload region so its stored
    // checksum no longer matches.
    let mut bytes = std::fs::read(&path).unwrap();
    let last_entry_start = HEADER_SIZE + 9 * ENTRY_SIZE;
    bytes[last_entry_start] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let reopened = Journal::open(&path).unwrap();
    assert_eq!(reopened.entry_count(), 0);
    assert_eq!(reopened.entries().len(), 0);

    let corrupt_sibling = dir.path().join("history.corrupt");
    assert!(corrupt_sibling.exists());
}

/// Scenario 4, literal form (spec.md §8): a corrupt *header* is rotated
/// aside on reload, leaving a fresh, usable, zero-entry journal.
#[test]
fn scenario_corrupted_header_rotates_file_on_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.journal");

    {
        let journal = Journal::open(&path).unwrap();
        for i in 0..10 {
            journal.append(&sample_entry(i)).unwrap();
        }
    }

    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0..4].copy_from_slice(b"XXXX"); // corrupt the magic
    std::fs::write(&path, &bytes).unwrap();

    let reopened = Journal::open(&path).unwrap();
    assert_eq!(reopened.entry_count(), 0);
    reopened.append(&sample_entry(0)).unwrap();
    assert_eq!(reopened.entry_count(), 1);

    let corrupt_sibling = dir.path().join("history.corrupt");
    assert!(corrupt_sibling.exists());
}

/// Scenario 5 (spec.md §8): the saved config file's first four bytes are
/// the little-endian 'MERC' magic and bytes 4-5 are version 1.
#[test]
fn scenario_saved_config_has_merc_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mercury.cfg");

    save_binary_configuration(&path, 0, b"scenario payload").unwrap();

    let raw = std::fs::read(&path).unwrap();
    assert_eq!(&raw[0..4], &[0x43, 0x52, 0x45, 0x4D]);
    assert_eq!(&raw[4..6], &[0x01, 0x00]);

    let loaded = load_binary_configuration(&path).unwrap();
    assert_eq!(loaded, b"scenario payload");
}

/// Round-trip/idempotence property (spec.md §8): save then load compares
/// byte-for-byte.
#[test]
fn config_save_load_round_trip_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roundtrip.cfg");
    let payload: Vec<u8> = (0u8..=255).collect();

    save_binary_configuration(&path, 0x1234, &payload).unwrap();
    let loaded = load_binary_configuration(&path).unwrap();
    assert_eq!(loaded, payload);
}
