//! Crash scenarios for the value log
//!
//! Simulates what a process crash leaves on disk and checks what a reopen
//! makes of it:
//! - a record cut short at the tail is dropped, everything before survives
//! - a damaged record in the middle of the log refuses to open
//! - a damaged length field refuses to open and leaves the file as it was
//! - a leftover rewrite file from an interrupted GC is ignored

use std::fs::{self, OpenOptions};
use std::io::Write;

use hearth_core::Error;
use hearth_storage::{vlog, LogRecord, Store, StoreOptions, StoredValue, VLOG_FILE};
use tempfile::TempDir;

fn open(dir: &TempDir) -> hearth_core::Result<Store> {
    Store::open(StoreOptions::persistent(dir.path()))
}

fn write_three(dir: &TempDir) {
    let store = open(dir).unwrap();
    store.put(b"a", b"1").unwrap();
    store.put(b"b", b"2").unwrap();
    store.put(b"c", b"3").unwrap();
    store.close().unwrap();
}

#[test]
fn test_torn_tail_is_truncated() {
    let dir = TempDir::new().unwrap();
    write_three(&dir);

    let path = dir.path().join(VLOG_FILE);
    let good_len = fs::metadata(&path).unwrap().len();
    let torn = vlog::encode_record(&LogRecord::new(
        b"d".to_vec(),
        StoredValue::new(b"4".to_vec(), 4, 0, 0),
    ))
    .unwrap();
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&torn[..torn.len() - 3]).unwrap();
    drop(file);

    let store = open(&dir).unwrap();
    assert_eq!(store.current_version(), 3);
    assert!(store.get(b"d").unwrap().is_none());
    assert_eq!(store.get(b"c").unwrap().unwrap().value, b"3".to_vec());
    assert_eq!(fs::metadata(&path).unwrap().len(), good_len);

    assert_eq!(store.put(b"d", b"again").unwrap(), 4);
    store.close().unwrap();
    drop(store);
    let store = open(&dir).unwrap();
    assert_eq!(store.get(b"d").unwrap().unwrap().value, b"again".to_vec());
}

#[test]
fn test_mid_log_corruption_refuses_to_open() {
    let dir = TempDir::new().unwrap();
    write_three(&dir);

    let path = dir.path().join(VLOG_FILE);
    let mut bytes = fs::read(&path).unwrap();
    // Flip a byte inside the first record's payload
    bytes[14] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    match open(&dir) {
        Err(Error::Corruption(msg)) => assert!(msg.contains("CRC mismatch")),
        other => panic!("expected corruption, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_damaged_length_refuses_to_open() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir).unwrap();
        for key in ["a", "b", "c", "d", "e"] {
            store.put(key.as_bytes(), b"v").unwrap();
        }
        store.close().unwrap();
    }

    let path = dir.path().join(VLOG_FILE);
    let record_len = fs::metadata(&path).unwrap().len() as usize / 5;
    let original = fs::read(&path).unwrap();

    // High byte of the first length: claims far more than the file holds
    let mut bytes = original.clone();
    bytes[3] = 0x7f;
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(open(&dir), Err(Error::Corruption(_))));
    assert_eq!(fs::read(&path).unwrap(), bytes);

    // Low byte of a middle record's length: stays within the file
    let mut bytes = original.clone();
    bytes[2 * record_len] ^= 0x10;
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(open(&dir), Err(Error::Corruption(_))));
    assert_eq!(fs::read(&path).unwrap(), bytes);

    fs::write(&path, &original).unwrap();
    let store = open(&dir).unwrap();
    assert_eq!(store.current_version(), 5);
    assert_eq!(store.get(b"e").unwrap().unwrap().value, b"v".to_vec());
}

#[test]
fn test_leftover_rewrite_file_is_ignored() {
    let dir = TempDir::new().unwrap();
    write_three(&dir);
    fs::write(dir.path().join("hearth.vlog.rewrite"), b"garbage").unwrap();

    let store = open(&dir).unwrap();
    assert_eq!(store.current_version(), 3);
    store.put(b"a", b"x").unwrap();
    store.put(b"a", b"y").unwrap();
    assert!(store.run_gc(0.3).unwrap());
    assert!(!dir.path().join("hearth.vlog.rewrite").exists());
}

#[test]
fn test_empty_log_file_opens_clean() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(VLOG_FILE), b"").unwrap();
    let store = open(&dir).unwrap();
    assert_eq!(store.current_version(), 0);
    assert_eq!(store.stats().log_records, 0);
}
