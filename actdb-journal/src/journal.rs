//! Main journal implementation.

use crate::entry::{Frame, JournalEntry};
use crate::error::JournalError;
use crate::segment::{list_segments, Segment, SegmentId};
use crate::DEFAULT_SEGMENT_SIZE;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Sync policy for journal appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Fsync after every append (safest, slowest).
    #[default]
    EveryAppend,
    /// Fsync after N appends.
    EveryN(u32),
    /// Never fsync automatically (caller must call sync).
    Manual,
}

/// Journal configuration.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory to store journal segments.
    pub dir: PathBuf,
    /// Maximum segment size before rotation.
    pub segment_size: u64,
    /// Sync policy.
    pub sync_policy: SyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            sync_policy: SyncPolicy::default(),
        }
    }

    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }
}

/// Global journal offset: (segment_id, offset_within_segment)
/// encoded as a single u64: segment_id << 40 | offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JournalOffset(u64);

impl JournalOffset {
    const OFFSET_BITS: u64 = 40;
    const OFFSET_MASK: u64 = (1 << Self::OFFSET_BITS) - 1;

    pub fn new(segment_id: SegmentId, offset: u64) -> Self {
        assert!(offset <= Self::OFFSET_MASK, "offset too large");
        Self((segment_id << Self::OFFSET_BITS) | offset)
    }

    pub fn segment_id(&self) -> SegmentId {
        self.0 >> Self::OFFSET_BITS
    }

    pub fn offset(&self) -> u64 {
        self.0 & Self::OFFSET_MASK
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }
}

/// Append-only journal.
pub struct Journal {
    config: JournalConfig,
    /// Current segment for writing.
    current_segment: Mutex<Option<Segment>>,
    /// All open segments for reading.
    segments: RwLock<BTreeMap<SegmentId, Arc<Mutex<Segment>>>>,
    /// Next sequence number.
    next_sequence: AtomicU64,
    /// Appends since last fsync (for EveryN policy).
    appends_since_sync: AtomicU64,
    /// Is the journal closed?
    closed: AtomicBool,
}

impl Journal {
    /// Opens or creates a journal at the configured directory.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        std::fs::create_dir_all(&config.dir)?;

        let journal = Self {
            config,
            current_segment: Mutex::new(None),
            segments: RwLock::new(BTreeMap::new()),
            next_sequence: AtomicU64::new(1),
            appends_since_sync: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };

        journal.recover()?;

        Ok(journal)
    }

    /// Recovers the journal from existing segments.
    fn recover(&self) -> Result<(), JournalError> {
        let segment_ids = list_segments(&self.config.dir)?;

        if segment_ids.is_empty() {
            self.rotate_segment()?;
            return Ok(());
        }

        let mut max_sequence = 0u64;

        for &seg_id in &segment_ids {
            let mut segment = Segment::open(&self.config.dir, seg_id, self.config.segment_size)?;

            for (_, frame) in segment.read_all()? {
                max_sequence = max_sequence.max(frame.header.sequence);
            }

            self.segments
                .write()
                .insert(seg_id, Arc::new(Mutex::new(segment)));
        }

        self.next_sequence.store(max_sequence + 1, Ordering::SeqCst);

        // Keep writing into the latest segment.
        let latest_id = *segment_ids.last().unwrap();
        let segment = Segment::open(&self.config.dir, latest_id, self.config.segment_size)?;
        *self.current_segment.lock() = Some(segment);

        tracing::info!(
            "journal recovered: {} segments, next_sequence={}",
            segment_ids.len(),
            max_sequence + 1
        );

        Ok(())
    }

    /// Rotates to a new segment.
    fn rotate_segment(&self) -> Result<(), JournalError> {
        let next_id = {
            let segments = self.segments.read();
            segments.keys().next_back().map(|&id| id + 1).unwrap_or(1)
        };

        let segment = Segment::create(&self.config.dir, next_id, self.config.segment_size)?;

        self.segments.write().insert(
            next_id,
            Arc::new(Mutex::new(Segment::open(
                &self.config.dir,
                next_id,
                self.config.segment_size,
            )?)),
        );

        *self.current_segment.lock() = Some(segment);

        tracing::debug!("rotated to segment {}", next_id);
        Ok(())
    }

    /// Appends an entry, returning its sequence number and offset.
    pub fn append(&self, entry: &JournalEntry) -> Result<(u64, JournalOffset), JournalError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(JournalError::Closed);
        }

        let payload = serde_json::to_vec(entry)?;
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::new(entry.kind(), sequence, Bytes::from(payload));
        let frame_size = frame.disk_size();

        let mut current = self.current_segment.lock();

        if current.is_none() || !current.as_ref().unwrap().can_fit(frame_size) {
            drop(current);
            self.rotate_segment()?;
            current = self.current_segment.lock();
        }

        let segment = current.as_mut().unwrap();
        let segment_id = segment.id();
        let offset = segment.append(&frame)?;

        let appends = self.appends_since_sync.fetch_add(1, Ordering::Relaxed) + 1;
        match self.config.sync_policy {
            SyncPolicy::EveryAppend => {
                segment.sync()?;
                self.appends_since_sync.store(0, Ordering::Relaxed);
            }
            SyncPolicy::EveryN(n) if appends >= n as u64 => {
                segment.sync()?;
                self.appends_since_sync.store(0, Ordering::Relaxed);
            }
            _ => {}
        }

        Ok((sequence, JournalOffset::new(segment_id, offset)))
    }

    /// Forces a sync to disk.
    pub fn sync(&self) -> Result<(), JournalError> {
        let mut current = self.current_segment.lock();
        if let Some(segment) = current.as_mut() {
            segment.sync()?;
        }
        self.appends_since_sync.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Returns the next sequence number that will be assigned.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst)
    }

    /// Reads entries from the given offset, in sequence order.
    pub fn read_from(
        &self,
        from: JournalOffset,
        limit: Option<usize>,
    ) -> Result<Vec<(u64, JournalOffset, JournalEntry)>, JournalError> {
        let segments = self.segments.read();
        let mut results = Vec::new();
        let mut remaining = limit.unwrap_or(usize::MAX);

        for (&seg_id, segment) in segments.range(from.segment_id()..) {
            if remaining == 0 {
                break;
            }

            let mut seg = segment.lock();
            for (offset, frame) in seg.read_all()? {
                let journal_offset = JournalOffset::new(seg_id, offset);
                if journal_offset < from {
                    continue;
                }

                let entry: JournalEntry = serde_json::from_slice(&frame.payload)?;
                results.push((frame.header.sequence, journal_offset, entry));

                remaining -= 1;
                if remaining == 0 {
                    break;
                }
            }
        }

        Ok(results)
    }

    /// Reads every entry from the beginning of the journal.
    pub fn read_all(&self) -> Result<Vec<(u64, JournalOffset, JournalEntry)>, JournalError> {
        let earliest = self
            .earliest_offset()
            .unwrap_or_else(|| JournalOffset::from_u64(0));
        self.read_from(earliest, None)
    }

    /// Closes the journal.
    pub fn close(&self) -> Result<(), JournalError> {
        self.closed.store(true, Ordering::Release);
        self.sync()?;
        Ok(())
    }

    /// Returns the earliest available offset.
    pub fn earliest_offset(&self) -> Option<JournalOffset> {
        let segments = self.segments.read();
        segments.keys().next().map(|&id| JournalOffset::new(id, 0))
    }

    /// Returns the latest offset.
    pub fn latest_offset(&self) -> Option<JournalOffset> {
        let current = self.current_segment.lock();
        current
            .as_ref()
            .map(|seg| JournalOffset::new(seg.id(), seg.size()))
    }

    /// Returns the list of segment ids.
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.read().keys().copied().collect()
    }

    /// Returns the total size of all segments in bytes.
    pub fn total_size(&self) -> u64 {
        let segments = self.segments.read();
        let mut total: u64 = segments.values().map(|s| s.lock().size()).sum();

        let current = self.current_segment.lock();
        if let Some(seg) = current.as_ref() {
            if !segments.contains_key(&seg.id()) {
                total += seg.size();
            }
        }

        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_config(dir: &Path) -> JournalConfig {
        JournalConfig::new(dir)
            .with_segment_size(4096) // small segments for testing
            .with_sync_policy(SyncPolicy::EveryAppend)
    }

    fn action_entry(action_id: u64) -> JournalEntry {
        JournalEntry::AppendAction {
            action_id,
            predecessor_id: action_id.saturating_sub(1),
            event_id: 1,
            context_id: 1,
            timestamp: 1700000000000,
        }
    }

    #[test]
    fn test_journal_append_and_read() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(test_config(dir.path())).unwrap();

        let (seq, _offset) = journal.append(&action_entry(1)).unwrap();
        assert_eq!(seq, 1);

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, 1);
    }

    #[test]
    fn test_journal_recovery() {
        let dir = TempDir::new().unwrap();

        {
            let journal = Journal::open(test_config(dir.path())).unwrap();
            for i in 1..=10 {
                journal.append(&action_entry(i)).unwrap();
            }
            journal.close().unwrap();
        }

        {
            let journal = Journal::open(test_config(dir.path())).unwrap();
            assert_eq!(journal.next_sequence(), 11);

            let entries = journal.read_all().unwrap();
            assert_eq!(entries.len(), 10);
        }
    }

    #[test]
    fn test_journal_segment_rotation() {
        let dir = TempDir::new().unwrap();
        let config = JournalConfig::new(dir.path())
            .with_segment_size(256) // very small to force rotation
            .with_sync_policy(SyncPolicy::EveryAppend);

        let journal = Journal::open(config).unwrap();

        for i in 1..=20 {
            journal.append(&action_entry(i)).unwrap();
        }

        assert!(
            journal.segment_ids().len() > 1,
            "expected multiple segments, got {}",
            journal.segment_ids().len()
        );

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 20);
    }

    #[test]
    fn test_append_after_close() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(test_config(dir.path())).unwrap();
        journal.close().unwrap();

        let result = journal.append(&action_entry(1));
        assert!(matches!(result, Err(JournalError::Closed)));
    }

    #[test]
    fn test_read_from_offset() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(test_config(dir.path())).unwrap();

        let mut offsets = Vec::new();
        for i in 1..=5 {
            let (_, offset) = journal.append(&action_entry(i)).unwrap();
            offsets.push(offset);
        }

        let entries = journal.read_from(offsets[2], None).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].1, offsets[2]);
    }

    #[test]
    fn test_manual_sync_policy() {
        let dir = TempDir::new().unwrap();
        let config = JournalConfig::new(dir.path()).with_sync_policy(SyncPolicy::Manual);
        let journal = Journal::open(config).unwrap();

        journal.append(&action_entry(1)).unwrap();
        journal.sync().unwrap();

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 1);
    }
}
