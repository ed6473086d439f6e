//! Journal entry types.
//!
//! Each frame has the following on-disk format:
//!
//! ```text
//! +----------+----------+----------+----------+----------+----------+
//! | magic    | kind     | flags    | reserved | crc32c   | length   |
//! | 4 bytes  | 1 byte   | 1 byte   | 2 bytes  | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+----------+----------+----------+
//! | sequence_number     | payload                                   |
//! | 8 bytes             | length bytes                              |
//! +---------------------+-------------------------------------------+
//! ```

use crate::error::JournalError;
use crate::FRAME_HEADER_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Magic bytes for journal frames: "ACTJ"
pub const JOURNAL_MAGIC: [u8; 4] = *b"ACTJ";

/// Maximum frame payload size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Kind of journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameKind {
    /// Event name registered in the catalog.
    RegisterEvent = 1,
    /// Context name registered in the catalog.
    RegisterContext = 2,
    /// Action appended to a context's causal chain.
    AppendAction = 3,
    /// Machine defined (states, initial state, transitions).
    DefineMachine = 4,
    /// Instance created and bound to a context.
    CreateInstance = 5,
    /// Instance consumed an action and changed state.
    AdvanceInstance = 6,
    /// Instance retired (soft).
    RetireInstance = 7,
    /// Checkpoint marker (for recovery).
    Checkpoint = 8,
}

impl TryFrom<u8> for FrameKind {
    type Error = JournalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FrameKind::RegisterEvent),
            2 => Ok(FrameKind::RegisterContext),
            3 => Ok(FrameKind::AppendAction),
            4 => Ok(FrameKind::DefineMachine),
            5 => Ok(FrameKind::CreateInstance),
            6 => Ok(FrameKind::AdvanceInstance),
            7 => Ok(FrameKind::RetireInstance),
            8 => Ok(FrameKind::Checkpoint),
            _ => Err(JournalError::InvalidHeader {
                offset: 0,
                reason: format!("unknown frame kind: {}", value),
            }),
        }
    }
}

/// A parsed frame header.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub flags: u8,
    pub crc32c: u32,
    pub payload_len: u32,
    pub sequence: u64,
}

/// A complete frame (header + payload).
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(kind: FrameKind, sequence: u64, payload: Bytes) -> Self {
        let crc = crc32c::crc32c(&payload);
        Self {
            header: FrameHeader {
                kind,
                flags: 0,
                crc32c: crc,
                payload_len: payload.len() as u32,
                sequence,
            },
            payload,
        }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, JournalError> {
        if self.payload.len() > MAX_FRAME_SIZE {
            return Err(JournalError::FrameTooLarge {
                size: self.payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_slice(&JOURNAL_MAGIC);
        buf.put_u8(self.header.kind as u8);
        buf.put_u8(self.header.flags);
        buf.put_u16(0); // reserved
        buf.put_u32(self.header.crc32c);
        buf.put_u32(self.header.payload_len);
        buf.put_u64(self.header.sequence);
        buf.put_slice(&self.payload);

        Ok(buf)
    }

    /// Decodes a frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` if the buffer holds less than one complete frame
    /// (or zero padding at EOF).
    pub fn decode(buf: &mut BytesMut, offset: u64) -> Result<Option<Self>, JournalError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let magic: [u8; 4] = buf[0..4].try_into().unwrap();
        if magic != JOURNAL_MAGIC {
            // Zero bytes indicate EOF padding; anything else is corruption.
            if magic == [0, 0, 0, 0] {
                return Ok(None);
            }
            return Err(JournalError::InvalidHeader {
                offset,
                reason: format!("invalid magic: {:?}", magic),
            });
        }

        let kind = FrameKind::try_from(buf[4]).map_err(|_| JournalError::InvalidHeader {
            offset,
            reason: format!("unknown frame kind: {}", buf[4]),
        })?;

        let flags = buf[5];
        // reserved: buf[6..8]
        let crc_expected = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let payload_len = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]) as usize;
        let sequence = u64::from_be_bytes([
            buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
        ]);

        if payload_len > MAX_FRAME_SIZE {
            return Err(JournalError::FrameTooLarge {
                size: payload_len,
                max: MAX_FRAME_SIZE,
            });
        }

        if buf.len() < FRAME_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        let crc_actual = crc32c::crc32c(&payload);
        if crc_actual != crc_expected {
            return Err(JournalError::CorruptedFrame {
                offset,
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        Ok(Some(Self {
            header: FrameHeader {
                kind,
                flags,
                crc32c: crc_expected,
                payload_len: payload_len as u32,
                sequence,
            },
            payload,
        }))
    }

    /// Returns the total size of this frame on disk.
    pub fn disk_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}

/// A state row allocated by a machine definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    pub state_id: u64,
    pub name: String,
}

/// A transition row allocated by a machine definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub transition_id: u64,
    pub event_id: u64,
    pub from_state_id: u64,
    pub next_state_id: u64,
}

/// Typed journal entry with deserialized payload.
///
/// Entries carry fully resolved ids so replay is deterministic and never
/// re-runs name resolution. The sentinel rows (event 0, context 0, action 0)
/// are materialized at store construction and never journaled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEntry {
    RegisterEvent {
        event_id: u64,
        name: String,
    },
    RegisterContext {
        context_id: u64,
        name: String,
    },
    AppendAction {
        action_id: u64,
        predecessor_id: u64,
        event_id: u64,
        context_id: u64,
        timestamp: i64,
    },
    DefineMachine {
        machine_id: u64,
        name: String,
        initial_state_id: u64,
        /// State rows created by this definition. States already present in
        /// the shared namespace are not repeated here.
        #[serde(default)]
        new_states: Vec<StateRecord>,
        #[serde(default)]
        transitions: Vec<TransitionRecord>,
    },
    CreateInstance {
        instance_id: u64,
        name: String,
        machine_id: u64,
        context_id: u64,
        state_id: u64,
        last_action_id: u64,
        created_at: i64,
    },
    AdvanceInstance {
        instance_id: u64,
        action_id: u64,
        from_state_id: u64,
        to_state_id: u64,
        at: i64,
    },
    RetireInstance {
        instance_id: u64,
        at: i64,
    },
    Checkpoint {
        timestamp: i64,
    },
}

impl JournalEntry {
    /// Returns the frame kind for this entry.
    pub fn kind(&self) -> FrameKind {
        match self {
            JournalEntry::RegisterEvent { .. } => FrameKind::RegisterEvent,
            JournalEntry::RegisterContext { .. } => FrameKind::RegisterContext,
            JournalEntry::AppendAction { .. } => FrameKind::AppendAction,
            JournalEntry::DefineMachine { .. } => FrameKind::DefineMachine,
            JournalEntry::CreateInstance { .. } => FrameKind::CreateInstance,
            JournalEntry::AdvanceInstance { .. } => FrameKind::AdvanceInstance,
            JournalEntry::RetireInstance { .. } => FrameKind::RetireInstance,
            JournalEntry::Checkpoint { .. } => FrameKind::Checkpoint,
        }
    }

    /// Returns the instance id if this entry is instance-related.
    pub fn instance_id(&self) -> Option<u64> {
        match self {
            JournalEntry::CreateInstance { instance_id, .. }
            | JournalEntry::AdvanceInstance { instance_id, .. }
            | JournalEntry::RetireInstance { instance_id, .. } => Some(*instance_id),
            _ => None,
        }
    }

    /// Returns the context id if this entry touches a context's chain.
    pub fn context_id(&self) -> Option<u64> {
        match self {
            JournalEntry::RegisterContext { context_id, .. }
            | JournalEntry::AppendAction { context_id, .. }
            | JournalEntry::CreateInstance { context_id, .. } => Some(*context_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let payload = Bytes::from(r#"{"action_id":7}"#);
        let frame = Frame::new(FrameKind::AppendAction, 42, payload.clone());

        let mut buf = frame.encode().unwrap();
        let decoded = Frame::decode(&mut buf, 0).unwrap().unwrap();

        assert_eq!(decoded.header.kind, FrameKind::AppendAction);
        assert_eq!(decoded.header.sequence, 42);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_corrupted_frame_detection() {
        let frame = Frame::new(FrameKind::AppendAction, 1, Bytes::from(r#"{"x":1}"#));
        let mut encoded = frame.encode().unwrap();

        let len = encoded.len();
        encoded[len - 1] ^= 0xFF;

        let result = Frame::decode(&mut encoded, 0);
        assert!(matches!(result, Err(JournalError::CorruptedFrame { .. })));
    }

    #[test]
    fn test_entry_serialization() {
        let entry = JournalEntry::AppendAction {
            action_id: 3,
            predecessor_id: 2,
            event_id: 1,
            context_id: 1,
            timestamp: 1700000000000,
        };

        let json = serde_json::to_string(&entry).unwrap();
        let parsed: JournalEntry = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.kind(), FrameKind::AppendAction);
        assert_eq!(parsed.context_id(), Some(1));
        assert!(parsed.instance_id().is_none());
    }

    #[test]
    fn test_frame_kind_conversion() {
        assert_eq!(FrameKind::try_from(1u8).unwrap(), FrameKind::RegisterEvent);
        assert_eq!(FrameKind::try_from(3u8).unwrap(), FrameKind::AppendAction);
        assert_eq!(FrameKind::try_from(6u8).unwrap(), FrameKind::AdvanceInstance);
        assert!(FrameKind::try_from(100u8).is_err());
        assert!(FrameKind::try_from(255u8).is_err());
    }

    #[test]
    fn test_frame_too_large() {
        let huge = Bytes::from(vec![0u8; MAX_FRAME_SIZE + 1]);
        let frame = Frame::new(FrameKind::AppendAction, 1, huge);
        assert!(matches!(
            frame.encode(),
            Err(JournalError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_incomplete_frame() {
        let mut buf = BytesMut::from(&b"ACTJ"[..]);
        assert!(Frame::decode(&mut buf, 0).unwrap().is_none());
    }

    #[test]
    fn test_eof_padding() {
        let mut buf = BytesMut::from(&[0u8; 24][..]);
        assert!(Frame::decode(&mut buf, 0).unwrap().is_none());
    }

    #[test]
    fn test_invalid_magic() {
        let mut raw = vec![0u8; 24];
        raw[0..4].copy_from_slice(b"XXXX");
        let mut buf = BytesMut::from(&raw[..]);
        let result = Frame::decode(&mut buf, 0);
        assert!(matches!(result, Err(JournalError::InvalidHeader { .. })));
    }

    #[test]
    fn test_all_entry_kinds() {
        let define = JournalEntry::DefineMachine {
            machine_id: 1,
            name: "turnstile".to_string(),
            initial_state_id: 1,
            new_states: vec![
                StateRecord {
                    state_id: 1,
                    name: "locked".to_string(),
                },
                StateRecord {
                    state_id: 2,
                    name: "unlocked".to_string(),
                },
            ],
            transitions: vec![TransitionRecord {
                transition_id: 1,
                event_id: 2,
                from_state_id: 1,
                next_state_id: 2,
            }],
        };
        assert_eq!(define.kind(), FrameKind::DefineMachine);
        assert!(define.instance_id().is_none());

        let create = JournalEntry::CreateInstance {
            instance_id: 1,
            name: "turnstileA".to_string(),
            machine_id: 1,
            context_id: 1,
            state_id: 1,
            last_action_id: 0,
            created_at: 0,
        };
        assert_eq!(create.kind(), FrameKind::CreateInstance);
        assert_eq!(create.instance_id(), Some(1));
        assert_eq!(create.context_id(), Some(1));

        let advance = JournalEntry::AdvanceInstance {
            instance_id: 1,
            action_id: 2,
            from_state_id: 1,
            to_state_id: 2,
            at: 0,
        };
        assert_eq!(advance.kind(), FrameKind::AdvanceInstance);
        assert_eq!(advance.instance_id(), Some(1));

        let retire = JournalEntry::RetireInstance {
            instance_id: 1,
            at: 0,
        };
        assert_eq!(retire.kind(), FrameKind::RetireInstance);

        let checkpoint = JournalEntry::Checkpoint { timestamp: 12345 };
        assert_eq!(checkpoint.kind(), FrameKind::Checkpoint);
        assert!(checkpoint.instance_id().is_none());
    }
}
