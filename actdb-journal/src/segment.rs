//! Journal segment management.
//!
//! The journal is split into fixed-size segments:
//! - Rotation: new segment when the current one cannot fit a frame
//! - Recovery: segments can be scanned independently

use crate::entry::Frame;
use crate::error::JournalError;
use crate::FRAME_HEADER_SIZE;
use bytes::BytesMut;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Segment identifier (monotonically increasing).
pub type SegmentId = u64;

/// Segment file name format: NNNNNNNNNNNNNNNN.log (16 hex digits)
pub fn segment_filename(id: SegmentId) -> String {
    format!("{:016x}.log", id)
}

/// Parse a segment id from a filename.
pub fn parse_segment_filename(name: &str) -> Option<SegmentId> {
    let name = name.strip_suffix(".log")?;
    if name.len() != 16 {
        return None;
    }
    u64::from_str_radix(name, 16).ok()
}

/// Lists all segment ids in a directory, sorted ascending.
pub fn list_segments(dir: &Path) -> Result<Vec<SegmentId>, JournalError> {
    let mut segments = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(id) = parse_segment_filename(&name.to_string_lossy()) {
            segments.push(id);
        }
    }

    segments.sort_unstable();
    Ok(segments)
}

/// Outcome of walking a segment's frames from the start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentScan {
    /// Frames that decoded cleanly.
    pub frames: u64,
    /// Highest sequence number among them.
    pub max_sequence: u64,
    /// Byte length of the well-formed prefix.
    pub valid_len: u64,
    /// What stopped the walk, if anything did.
    pub damage: Option<String>,
}

/// A single journal segment file.
pub struct Segment {
    id: SegmentId,
    path: PathBuf,
    file: File,
    size: u64,
    max_size: u64,
    sync_pending: bool,
}

impl Segment {
    /// Creates a new segment file.
    pub fn create(dir: &Path, id: SegmentId, max_size: u64) -> Result<Self, JournalError> {
        let path = dir.join(segment_filename(id));
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;

        Ok(Self {
            id,
            path,
            file,
            size: 0,
            max_size,
            sync_pending: false,
        })
    }

    /// Opens an existing segment file for reading and appending.
    pub fn open(dir: &Path, id: SegmentId, max_size: u64) -> Result<Self, JournalError> {
        let path = dir.join(segment_filename(id));
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            id,
            path,
            file,
            size,
            max_size,
            sync_pending: false,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns whether the segment can fit a frame of the given size.
    pub fn can_fit(&self, frame_size: usize) -> bool {
        self.size + frame_size as u64 <= self.max_size
    }

    /// Appends a frame, returning its offset within the segment.
    pub fn append(&mut self, frame: &Frame) -> Result<u64, JournalError> {
        let encoded = frame.encode()?;
        let offset = self.size;

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&encoded)?;
        self.size += encoded.len() as u64;
        self.sync_pending = true;

        Ok(offset)
    }

    /// Syncs the segment to disk.
    pub fn sync(&mut self) -> Result<(), JournalError> {
        if self.sync_pending {
            self.file.sync_data()?;
            self.sync_pending = false;
        }
        Ok(())
    }

    /// Reads all frames from the segment in offset order.
    pub fn read_all(&mut self) -> Result<Vec<(u64, Frame)>, JournalError> {
        let mut frames = Vec::new();
        let mut offset = 0u64;

        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&self.file);
        let mut buf = BytesMut::new();

        loop {
            let mut chunk = [0u8; 8192];
            match reader.read(&mut chunk) {
                Ok(0) => break, // EOF
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => return Err(e.into()),
            }

            while buf.len() >= FRAME_HEADER_SIZE {
                match Frame::decode(&mut buf, offset)? {
                    Some(frame) => {
                        let frame_size = frame.disk_size() as u64;
                        frames.push((offset, frame));
                        offset += frame_size;
                    }
                    None => break, // need more data
                }
            }
        }

        Ok(frames)
    }

    /// Walks the segment from the start and reports how far it stays
    /// well-formed.
    ///
    /// Frames are not self-synchronizing, so the walk stops at the first
    /// damaged byte: everything before `valid_len` decoded cleanly,
    /// everything after it is unusable. A zero-filled tail counts as clean
    /// preallocation, not damage.
    pub fn scan(&mut self) -> Result<SegmentScan, JournalError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = BytesMut::with_capacity(self.size as usize);
        let mut reader = BufReader::new(&self.file);
        loop {
            let mut chunk = [0u8; 8192];
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => return Err(e.into()),
            }
        }

        let mut scan = SegmentScan {
            frames: 0,
            max_sequence: 0,
            valid_len: 0,
            damage: None,
        };

        loop {
            match Frame::decode(&mut buf, scan.valid_len) {
                Ok(Some(frame)) => {
                    scan.frames += 1;
                    scan.max_sequence = scan.max_sequence.max(frame.header.sequence);
                    scan.valid_len += frame.disk_size() as u64;
                }
                Ok(None) => {
                    if !buf.is_empty() && !buf.iter().all(|&b| b == 0) {
                        scan.damage =
                            Some(format!("torn frame at offset {}", scan.valid_len));
                    }
                    break;
                }
                Err(e @ JournalError::CorruptedFrame { .. })
                | Err(e @ JournalError::InvalidHeader { .. }) => {
                    scan.damage = Some(e.to_string());
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(scan)
    }

    /// Truncates the segment at the given offset (partial-write recovery).
    pub fn truncate_at(&mut self, offset: u64) -> Result<(), JournalError> {
        self.file.set_len(offset)?;
        self.size = offset;
        self.file.seek(SeekFrom::End(0))?;
        self.sync()?;
        Ok(())
    }
}
