//! File-backed log storage
//!
//! ## Layout
//!
//! ```text
//! <dir>/commit.log     sequence of frames, one frame per append call
//! <dir>/start.record   u64 start record + u32 crc32, replaced atomically
//! ```
//!
//! ## Frame format
//!
//! ```text
//! | payload_len: u32 LE | crc32(payload): u32 LE | payload: bincode(Vec<CommitRecord>) |
//! ```
//!
//! A whole append batch is one frame followed by `sync_data`, so a batch is
//! either fully durable or detected as a torn tail and discarded on
//! `initialize`. Truncation and start-record updates use the temp file +
//! rename pattern.

use crate::record::CommitRecord;
use crate::storage::LogStorage;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use meridian_core::{Error, Lsn, Result, TransactionId};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LOG_FILE_NAME: &str = "commit.log";
const START_RECORD_FILE_NAME: &str = "start.record";
const FRAME_HEADER_SIZE: u64 = 8;

/// Directory-backed implementation of [`LogStorage`]
pub struct FileLogStorage {
    dir: PathBuf,
    log_file: Option<File>,
    /// Length of the log file up to the last complete frame
    valid_len: u64,
    next_lsn: Lsn,
    start_record: TransactionId,
    replay: Vec<CommitRecord>,
    cursor: usize,
}

struct Frame {
    records: Vec<CommitRecord>,
    encoded_len: u64,
}

impl FileLogStorage {
    /// Storage rooted at `dir`; nothing is touched until `initialize`
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            log_file: None,
            valid_len: 0,
            next_lsn: 1,
            start_record: 0,
            replay: Vec::new(),
            cursor: 0,
        }
    }

    /// Path of the commit log file
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }

    fn start_record_path(&self) -> PathBuf {
        self.dir.join(START_RECORD_FILE_NAME)
    }

    fn log_file(&mut self) -> Result<&mut File> {
        self.log_file
            .as_mut()
            .ok_or_else(|| Error::invalid_operation("file log storage is not initialized"))
    }

    fn read_start_record(path: &Path) -> Result<TransactionId> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() != 12 {
            return Err(Error::Corruption(format!(
                "start record has length {}, expected 12",
                bytes.len()
            )));
        }
        let mut reader = &bytes[..];
        let value = reader.read_u64::<LittleEndian>()?;
        let crc = reader.read_u32::<LittleEndian>()?;
        if crc32fast::hash(&bytes[..8]) != crc {
            return Err(Error::Corruption("start record checksum mismatch".to_string()));
        }
        Ok(value)
    }

    /// Read frames until EOF or the first torn/corrupt frame
    fn read_frames(path: &Path) -> Result<(Vec<Frame>, u64)> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e.into()),
        };
        let total_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut frames = Vec::new();
        let mut offset = 0u64;

        while offset + FRAME_HEADER_SIZE <= total_len {
            let len = reader.read_u32::<LittleEndian>()? as u64;
            let crc = reader.read_u32::<LittleEndian>()?;
            if offset + FRAME_HEADER_SIZE + len > total_len {
                break;
            }
            let mut payload = vec![0u8; len as usize];
            reader.read_exact(&mut payload)?;
            if crc32fast::hash(&payload) != crc {
                warn!(target: "meridian::log", offset, "Commit log frame checksum mismatch");
                break;
            }
            let records: Vec<CommitRecord> = bincode::deserialize(&payload)?;
            frames.push(Frame {
                records,
                encoded_len: FRAME_HEADER_SIZE + len,
            });
            offset += FRAME_HEADER_SIZE + len;
        }

        Ok((frames, offset))
    }

    fn encode_frame(records: &[CommitRecord]) -> Result<Vec<u8>> {
        let payload = bincode::serialize(records)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| Error::invalid_operation("commit batch exceeds frame size limit"))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE as usize + payload.len());
        frame.write_u32::<LittleEndian>(len)?;
        frame.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    fn open_for_append(path: &Path) -> Result<File> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }
}

impl LogStorage for FileLogStorage {
    fn initialize(&mut self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        self.start_record = Self::read_start_record(&self.start_record_path())?;

        let log_path = self.log_path();
        let (frames, valid_len) = Self::read_frames(&log_path)?;
        let file = Self::open_for_append(&log_path)?;
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            warn!(
                target: "meridian::log",
                file_len,
                valid_len,
                "Discarding torn commit log tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        self.replay = frames.into_iter().flat_map(|f| f.records).collect();
        self.next_lsn = self.replay.last().map(|r| r.lsn + 1).unwrap_or(1);
        self.valid_len = valid_len;
        self.log_file = Some(file);
        self.cursor = 0;

        info!(
            target: "meridian::log",
            dir = %self.dir.display(),
            records = self.replay.len(),
            start_record = self.start_record,
            "Opened file log storage"
        );
        Ok(())
    }

    fn first_commit_record(&mut self) -> Result<Option<CommitRecord>> {
        self.cursor = 0;
        self.next_commit_record()
    }

    fn next_commit_record(&mut self) -> Result<Option<CommitRecord>> {
        let record = self.replay.get(self.cursor).cloned();
        if record.is_some() {
            self.cursor += 1;
        }
        Ok(record)
    }

    fn start_record(&self) -> Result<TransactionId> {
        Ok(self.start_record)
    }

    fn update_start_record(&mut self, transaction_id: TransactionId) -> Result<()> {
        let path = self.start_record_path();
        let temp_path = path.with_extension("record.tmp");

        let mut bytes = Vec::with_capacity(12);
        bytes.write_u64::<LittleEndian>(transaction_id)?;
        let crc = crc32fast::hash(&bytes);
        bytes.write_u32::<LittleEndian>(crc)?;

        let mut temp_file = File::create(&temp_path)?;
        temp_file.write_all(&bytes)?;
        temp_file.sync_all()?;
        drop(temp_file);
        fs::rename(&temp_path, &path)?;

        self.start_record = transaction_id;
        debug!(target: "meridian::log", start_record = transaction_id, "Start record updated");
        Ok(())
    }

    fn append(&mut self, records: &mut [CommitRecord]) -> Result<()> {
        if !self.replay.is_empty() {
            self.replay = Vec::new();
        }

        let first_lsn = self.next_lsn;
        let mut stamped = records.to_vec();
        for (i, record) in stamped.iter_mut().enumerate() {
            record.lsn = first_lsn + i as u64;
        }
        let frame = Self::encode_frame(&stamped)?;

        let valid_len = self.valid_len;
        let file = self.log_file()?;
        let written = file.write_all(&frame).and_then(|_| file.sync_data());
        if let Err(e) = written {
            // Roll back a partial frame so later appends stay readable.
            if let Err(rollback) = file.set_len(valid_len) {
                warn!(target: "meridian::log", error = %rollback, "Failed to roll back partial frame");
            }
            return Err(e.into());
        }

        self.valid_len += frame.len() as u64;
        self.next_lsn = first_lsn + records.len() as u64;
        for (record, assigned) in records.iter_mut().zip(stamped) {
            record.lsn = assigned.lsn;
        }
        Ok(())
    }

    fn truncate_log(&mut self, lsn: Lsn) -> Result<()> {
        let log_path = self.log_path();
        let (frames, _) = Self::read_frames(&log_path)?;

        let original_len = self.valid_len;
        let keep_from = frames
            .iter()
            .position(|f| f.records.last().map(|r| r.lsn > lsn).unwrap_or(false));
        let removed: u64 = frames
            .iter()
            .take(keep_from.unwrap_or(frames.len()))
            .map(|f| f.encoded_len)
            .sum();
        if removed == 0 {
            debug!(target: "meridian::log", lsn, "Truncation skipped: nothing to remove");
            return Ok(());
        }

        // The old handle is only replaced once the rename succeeded, so a
        // failed truncation leaves the storage appendable.
        let temp_path = log_path.with_extension("log.tmp");
        match fs::remove_file(&temp_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&temp_path)?;
        let mut new_len = 0u64;
        for frame in frames.iter().skip(keep_from.unwrap_or(frames.len())) {
            let encoded = Self::encode_frame(&frame.records)?;
            temp_file.write_all(&encoded)?;
            new_len += encoded.len() as u64;
        }
        temp_file.sync_all()?;
        fs::rename(&temp_path, &log_path)?;

        self.log_file = Some(temp_file);
        self.valid_len = new_len;

        info!(
            target: "meridian::log",
            lsn,
            original_len,
            new_len = self.valid_len,
            "Commit log truncated"
        );
        Ok(())
    }
}
