//! Write-ahead log shared by the fields map journal and the document store.
//!
//! Each entry is framed as `len (u32 LE) | msgpack body | crc32 (u32 LE)` behind a
//! small magic + version header. A frame is only considered written once the whole
//! frame is on disk: a torn tail left by a crash fails its length or checksum test,
//! is discarded on the next open, and the file is truncated back to the last good
//! frame so later appends are readable.

use crate::error::{IndexError, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Cursor, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Current WAL format version.
const WAL_VERSION: u8 = 1;

/// Header size (magic + version).
const WAL_HEADER_SIZE: u64 = 5;

/// Upper bound on a single frame body.
const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// A single WAL entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalEntry<T> {
    /// Sequence number, increasing within one log generation.
    pub seq: u64,
    /// Seconds since the Unix epoch when the entry was written.
    pub timestamp: u64,
    /// The logged operation.
    pub body: T,
}

struct WalState {
    writer: BufWriter<File>,
    next_seq: u64,
    entries: usize,
    /// Length of the file up to the end of the last complete frame.
    len: u64,
    /// Set when a failed append could not be rolled back.
    poisoned: bool,
}

/// Append-only, checksummed log of `T` entries.
pub struct WriteAheadLog<T> {
    path: PathBuf,
    magic: [u8; 4],
    sync_on_append: bool,
    state: Mutex<WalState>,
    _entry: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> WriteAheadLog<T> {
    /// Create or open a log file.
    ///
    /// Returns the log together with every intact entry already in it, in order.
    pub fn open(
        path: impl AsRef<Path>,
        magic: &[u8; 4],
        sync_on_append: bool,
    ) -> Result<(Self, Vec<WalEntry<T>>)> {
        let path = path.as_ref().to_path_buf();

        let existing = if path.exists() {
            Some(fs::read(&path)?)
        } else {
            None
        };

        // An empty file is a log whose header never made it to disk
        let (recovered, len) = if let Some(bytes) = existing.filter(|b| !b.is_empty()) {
            let (entries, valid_len) = Self::decode_all(&bytes, magic)?;

            if valid_len < bytes.len() as u64 {
                tracing::warn!(
                    path = %path.display(),
                    discarded = bytes.len() as u64 - valid_len,
                    "discarding torn tail of write-ahead log"
                );
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }

            (entries, valid_len)
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.write_all(magic)?;
            file.write_all(&[WAL_VERSION])?;
            file.sync_all()?;
            (Vec::new(), WAL_HEADER_SIZE)
        };

        let next_seq = recovered.last().map(|e| e.seq + 1).unwrap_or(1);
        let writer = BufWriter::new(OpenOptions::new().append(true).open(&path)?);

        let wal = Self {
            path,
            magic: *magic,
            sync_on_append,
            state: Mutex::new(WalState {
                writer,
                next_seq,
                entries: recovered.len(),
                len,
                poisoned: false,
            }),
            _entry: PhantomData,
        };

        Ok((wal, recovered))
    }

    /// Append an entry (returns its sequence number).
    ///
    /// The entry is durable once this returns if the log syncs on append. A
    /// failed append leaves no partial frame behind.
    pub fn append(&self, body: &T) -> Result<u64> {
        let mut state = self.state.lock();
        if state.poisoned {
            return Err(IndexError::Corruption(format!(
                "WAL {} holds a partial frame",
                self.path.display()
            )));
        }
        let seq = state.next_seq;

        let entry = WalEntry {
            seq,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            body,
        };
        let frame = Self::encode_frame(&entry)?;

        if let Err(e) = Self::write_frame(&mut state.writer, &frame, self.sync_on_append) {
            self.roll_back(&mut state);
            return Err(e.into());
        }

        state.next_seq += 1;
        state.entries += 1;
        state.len += frame.len() as u64;
        Ok(seq)
    }

    fn write_frame(writer: &mut BufWriter<File>, frame: &[u8], sync: bool) -> std::io::Result<()> {
        writer.write_all(frame)?;
        writer.flush()?;
        if sync {
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Cut the file back to the last complete frame after a failed append.
    fn roll_back(&self, state: &mut WalState) {
        if let Err(e) = Self::truncate_to(&self.path, state) {
            tracing::error!(
                path = %self.path.display(),
                error = %e,
                "failed to roll back partial WAL append, refusing further appends"
            );
            state.poisoned = true;
        }
    }

    fn truncate_to(path: &Path, state: &mut WalState) -> std::io::Result<()> {
        let fresh = OpenOptions::new().append(true).open(path)?;
        // Discard the buffered remainder without flushing it
        let (_, _) = std::mem::replace(&mut state.writer, BufWriter::new(fresh)).into_parts();

        let file = state.writer.get_ref();
        file.set_len(state.len)?;
        file.sync_all()
    }

    /// Drop every entry (called after a successful checkpoint).
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.writer.flush()?;

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(&self.magic)?;
        file.write_all(&[WAL_VERSION])?;
        file.sync_all()?;

        state.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        state.next_seq = 1;
        state.entries = 0;
        state.len = WAL_HEADER_SIZE;
        state.poisoned = false;
        Ok(())
    }

    /// Number of entries in the log.
    pub fn len(&self) -> usize {
        self.state.lock().entries
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush and fsync.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.writer.flush()?;
        state.writer.get_ref().sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode_frame<B: Serialize>(entry: &WalEntry<B>) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec(entry)?;

        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
        Ok(frame)
    }

    /// Decode every intact frame. Returns the entries and the byte length of the
    /// valid prefix.
    fn decode_all(bytes: &[u8], magic: &[u8; 4]) -> Result<(Vec<WalEntry<T>>, u64)> {
        let mut cursor = Cursor::new(bytes);

        let mut file_magic = [0u8; 4];
        let mut version = [0u8; 1];
        if cursor.read_exact(&mut file_magic).is_err() || cursor.read_exact(&mut version).is_err()
        {
            return Err(IndexError::InvalidFormat("Truncated WAL header".into()));
        }
        if &file_magic != magic {
            return Err(IndexError::InvalidFormat("Invalid WAL magic".into()));
        }
        if version[0] != WAL_VERSION {
            return Err(IndexError::InvalidFormat(format!(
                "Unsupported WAL version: {}",
                version[0]
            )));
        }

        let mut entries = Vec::new();
        let mut valid_len = WAL_HEADER_SIZE;
        loop {
            match Self::read_frame(&mut cursor) {
                Ok(Some(entry)) => {
                    entries.push(entry);
                    valid_len = cursor.position();
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, offset = valid_len, "stopping WAL replay");
                    break;
                }
            }
        }

        Ok((entries, valid_len))
    }

    /// Read one frame. `Ok(None)` at a clean end of file.
    fn read_frame(cursor: &mut Cursor<&[u8]>) -> Result<Option<WalEntry<T>>> {
        if cursor.position() == cursor.get_ref().len() as u64 {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        cursor.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(IndexError::Corruption("WAL entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        cursor.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        cursor.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(&encoded);
        if expected != got {
            return Err(IndexError::ChecksumMismatch { expected, got });
        }

        Ok(Some(rmp_serde::from_slice(&encoded)?))
    }
}
