//! # actdb-journal
//!
//! Append-only journal for actdb.
//!
//! Every mutation the engine performs is framed, checksummed, and appended
//! here before it touches in-memory state; replaying the journal from the
//! beginning rebuilds the engine exactly. The crate provides:
//! - Per-frame crc32c checksums for corruption detection
//! - Segment-based file management with rotation
//! - Configurable sync policies
//! - Verification and repair of torn or damaged segments

pub mod entry;
pub mod error;
pub mod journal;
pub mod recovery;
pub mod segment;

pub use entry::{Frame, FrameKind, JournalEntry, StateRecord, TransitionRecord};
pub use error::JournalError;
pub use journal::{Journal, JournalConfig, JournalOffset, SyncPolicy};
pub use recovery::{repair_journal, verify_journal, RecoveryReport, SegmentStatus};
pub use segment::{Segment, SegmentId, SegmentScan};

/// Default segment size (64 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 24;
