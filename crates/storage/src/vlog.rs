//! Append-only value log
//!
//! Every committed write is appended here before it becomes visible. On open
//! the log is replayed to rebuild the in-memory version chains.
//!
//! ## Record Format
//!
//! ```text
//! [length: u32][length_crc: u32][crc32: u32][payload: length bytes]
//!
//! payload:
//! [kind: u8][user_meta: u8][version: u64][expires_at: u64]
//! [key_len: u32][key][value_len: u32][value]
//! ```
//!
//! - All integers are little-endian
//! - **length_crc**: checksum over the four length bytes
//! - **crc32**: checksum over the payload
//! - **length** never exceeds [`MAX_RECORD_BYTES`]
//! - **kind**: 1 = put, 2 = tombstone
//!
//! A tombstone with an empty key is a version mark. Rewrites emit one when
//! the highest committed version would otherwise vanish from the log, so
//! replay never hands out a version twice.
//!
//! A record whose verified header declares more bytes than the file holds
//! is a torn write from a crash and is truncated away on open. A damaged
//! length, or a checksum mismatch anywhere else, is reported as corruption
//! and the file is left untouched.

use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use tracing::warn;

use hearth_core::{Error, Result};

use crate::stored_value::StoredValue;

const KIND_PUT: u8 = 1;
const KIND_TOMBSTONE: u8 = 2;

/// Frame header: length + length crc + payload crc
const HEADER_LEN: usize = 12;

/// Largest payload a single record may carry
pub const MAX_RECORD_BYTES: usize = 64 << 20;

/// Fixed payload prefix: kind + user_meta + version + expires_at + key_len
const PAYLOAD_FIXED_LEN: usize = 1 + 1 + 8 + 8 + 4;

/// One record in the value log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Key bytes
    pub key: Vec<u8>,
    /// The stored version
    pub value: StoredValue,
}

impl LogRecord {
    /// Create a record
    pub fn new(key: Vec<u8>, value: StoredValue) -> Self {
        LogRecord { key, value }
    }

    /// A record that only carries a version forward
    pub fn version_mark(version: u64) -> Self {
        LogRecord::new(Vec::new(), StoredValue::tombstone(version))
    }

    /// True for a version mark
    pub fn is_version_mark(&self) -> bool {
        self.key.is_empty()
    }
}

fn keyed(records: &[LogRecord]) -> u64 {
    records.iter().filter(|r| !r.is_version_mark()).count() as u64
}

/// Result of decoding at an offset
#[derive(Debug)]
pub enum Decoded {
    /// A full record and the number of bytes it occupied
    Record(LogRecord, usize),
    /// The buffer ends inside a record
    Incomplete,
}

/// Encode a record into a framed byte buffer
pub fn encode_record(record: &LogRecord) -> Result<Vec<u8>> {
    let sv = &record.value;
    let mut payload =
        Vec::with_capacity(PAYLOAD_FIXED_LEN + record.key.len() + 4 + sv.value().len());
    let kind = if sv.is_tombstone() {
        KIND_TOMBSTONE
    } else {
        KIND_PUT
    };
    payload.write_u8(kind)?;
    payload.write_u8(sv.user_meta())?;
    payload.write_u64::<LittleEndian>(sv.version())?;
    payload.write_u64::<LittleEndian>(sv.expires_at())?;
    payload.write_u32::<LittleEndian>(len_u32(record.key.len())?)?;
    payload.write_all(&record.key)?;
    payload.write_u32::<LittleEndian>(len_u32(sv.value().len())?)?;
    payload.write_all(sv.value())?;

    if payload.len() > MAX_RECORD_BYTES {
        return Err(Error::invalid_input(format!(
            "record of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_RECORD_BYTES
        )));
    }
    let len_bytes = len_u32(payload.len())?.to_le_bytes();

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.write_all(&len_bytes)?;
    buf.write_u32::<LittleEndian>(checksum(&len_bytes))?;
    buf.write_u32::<LittleEndian>(checksum(&payload))?;
    buf.write_all(&payload)?;
    Ok(buf)
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::invalid_input(format!("field of {} bytes is too large", len)))
}

/// Decode one record from the start of `buf`
///
/// `offset` is the file offset of `buf[0]`, used in error messages.
pub fn decode_record(buf: &[u8], offset: u64) -> Result<Decoded> {
    if buf.len() < HEADER_LEN {
        return Ok(Decoded::Incomplete);
    }
    let mut header = Cursor::new(&buf[..HEADER_LEN]);
    let len = header.read_u32::<LittleEndian>()? as usize;
    let len_crc = header.read_u32::<LittleEndian>()?;
    let crc = header.read_u32::<LittleEndian>()?;

    // The length decides what counts as a torn tail, so it is verified
    // before anything is measured against it
    if checksum(&buf[..4]) != len_crc {
        return Err(Error::Corruption(format!(
            "offset {}: record length checksum mismatch",
            offset
        )));
    }
    if len < PAYLOAD_FIXED_LEN + 4 || len > MAX_RECORD_BYTES {
        return Err(Error::Corruption(format!(
            "offset {}: invalid record length {}",
            offset, len
        )));
    }
    if buf.len() < HEADER_LEN + len {
        return Ok(Decoded::Incomplete);
    }

    let payload = &buf[HEADER_LEN..HEADER_LEN + len];
    let actual = checksum(payload);
    if actual != crc {
        return Err(Error::Corruption(format!(
            "offset {}: CRC mismatch (expected {:08x}, got {:08x})",
            offset, crc, actual
        )));
    }

    let corrupt = |what: &str| Error::Corruption(format!("offset {}: {}", offset, what));
    let mut cursor = Cursor::new(payload);
    let kind = cursor.read_u8()?;
    let user_meta = cursor.read_u8()?;
    let version = cursor.read_u64::<LittleEndian>()?;
    let expires_at = cursor.read_u64::<LittleEndian>()?;
    let key = read_field(&mut cursor).ok_or_else(|| corrupt("truncated key"))?;
    let value = read_field(&mut cursor).ok_or_else(|| corrupt("truncated value"))?;
    if cursor.position() as usize != len {
        return Err(corrupt("trailing bytes in record"));
    }

    let stored = match kind {
        KIND_PUT => StoredValue::new(value, version, expires_at, user_meta),
        KIND_TOMBSTONE => StoredValue::tombstone(version),
        other => return Err(corrupt(&format!("unknown record kind {}", other))),
    };
    Ok(Decoded::Record(LogRecord::new(key, stored), HEADER_LEN + len))
}

fn read_field(cursor: &mut Cursor<&[u8]>) -> Option<Vec<u8>> {
    let len = cursor.read_u32::<LittleEndian>().ok()? as usize;
    let mut field = vec![0u8; len];
    cursor.read_exact(&mut field).ok()?;
    Some(field)
}

/// Decode every record in `buf`
///
/// Returns the records and the length of the valid prefix of `buf`.
pub fn decode_all(buf: &[u8]) -> Result<(Vec<LogRecord>, u64)> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        match decode_record(&buf[pos..], pos as u64)? {
            Decoded::Record(record, used) => {
                records.push(record);
                pos += used;
            }
            Decoded::Incomplete => break,
        }
    }
    Ok((records, pos as u64))
}

/// The value log file
#[derive(Debug)]
pub struct ValueLog {
    path: PathBuf,
    file: File,
    len: u64,
    records: u64,
    sync_writes: bool,
}

impl ValueLog {
    /// Open (or create) the log at `path` and replay it
    ///
    /// A torn record at the tail is truncated. Any other damage fails with
    /// [`Error::Corruption`] before the file is modified.
    pub fn open(path: &Path, sync_writes: bool) -> Result<(Self, Vec<LogRecord>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let (records, valid_len) = decode_all(&buf)?;

        if valid_len < buf.len() as u64 {
            warn!(
                target: "hearth::storage",
                path = %path.display(),
                valid_len,
                file_len = buf.len(),
                "Truncating torn record at end of value log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        let log = ValueLog {
            path: path.to_path_buf(),
            file,
            len: valid_len,
            records: keyed(&records),
            sync_writes,
        };
        Ok((log, records))
    }

    /// Append one record
    ///
    /// On failure the file is cut back to its previous length, so a failed
    /// append leaves no partial record behind.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let buf = encode_record(record)?;
        let written = self
            .file
            .write_all(&buf)
            .and_then(|_| {
                if self.sync_writes {
                    self.file.sync_data()
                } else {
                    Ok(())
                }
            });
        if let Err(e) = written {
            let _ = self.file.set_len(self.len);
            let _ = self.file.seek(SeekFrom::Start(self.len));
            return Err(Error::store(format!("value log append failed: {}", e)));
        }
        self.len += buf.len() as u64;
        self.records += 1;
        Ok(())
    }

    /// Flush file contents to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Current length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if the log holds no records
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of keyed records in the log
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path used while rewriting
    pub fn rewrite_path(&self) -> PathBuf {
        self.path.with_extension("vlog.rewrite")
    }

    /// Read the raw bytes appended after `offset`
    pub fn tail_from(&self, offset: u64) -> Result<Vec<u8>> {
        let mut reader = File::open(&self.path)?;
        reader.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(self.len.saturating_sub(offset) as usize);
        reader.take(self.len.saturating_sub(offset)).read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Replace the log with a finished rewrite
    pub fn install(&mut self, rewrite: LogRewrite) -> Result<()> {
        let LogRewrite {
            path,
            file,
            len,
            records,
        } = rewrite;
        file.sync_all()?;
        drop(file);
        fs::rename(&path, &self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(len))?;
        self.file = file;
        self.len = len;
        self.records = records;
        Ok(())
    }
}

/// A value log being rebuilt next to the live one
#[derive(Debug)]
pub struct LogRewrite {
    path: PathBuf,
    file: File,
    len: u64,
    records: u64,
}

impl LogRewrite {
    /// Create an empty rewrite file at `path`
    pub fn create(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(LogRewrite {
            path,
            file,
            len: 0,
            records: 0,
        })
    }

    /// Append one record
    pub fn write(&mut self, record: &LogRecord) -> Result<()> {
        let buf = encode_record(record)?;
        self.file.write_all(&buf)?;
        self.len += buf.len() as u64;
        if !record.is_version_mark() {
            self.records += 1;
        }
        Ok(())
    }

    /// Append already-encoded records copied from the live log
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let (records, valid_len) = decode_all(bytes)?;
        if valid_len != bytes.len() as u64 {
            return Err(Error::Corruption(
                "value log tail ends inside a record".to_string(),
            ));
        }
        self.file.write_all(bytes)?;
        self.len += valid_len;
        self.records += keyed(&records);
        Ok(())
    }

    /// Number of keyed records written
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Abandon the rewrite and remove its file
    pub fn discard(self) {
        let path = self.path;
        drop(self.file);
        let _ = fs::remove_file(path);
    }
}
