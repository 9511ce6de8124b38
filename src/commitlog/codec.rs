use crate::types::{
    LogEntryPayload, LogIndex, LogMetaPayload, LogPayload, LogTerm, ParticipantFlags, ParticipantId,
    ParticipantsConfig, PersistingLogEntry, TermIndexPair,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::sync::Arc;

/// Byte representation of a persisted entry:
///
/// ```text
/// |                                         1                   2                   |
/// | 0 | 1 | ... | 8 | 9 | ... |16 |17 |18 |19 |  ...                                |
/// +---+---+-...-+---+---+-...-+---+---+-----------------------------------------...-+
/// |Vrs| Term (8 bytes)| Index (8 bytes)   |Knd|   Body (variable size)          ... |
/// +---+---------------+-------------------+---+-----------------------------------...-+
/// ```
///
/// * `Vrs` - version of the serialized entry
/// * `Term`, `Index` - little endian
/// * `Knd` - 0 for a user payload, 1 for first-entry-of-term, 2 for a config update
/// * `Body` - the raw user payload, or for meta entries: the leader id (kind 1 only) followed
///   by the participants config
///
/// A participants config is written as generation (u64), write concern (u64), wait-for-sync
/// (u8), participant count (u32), then per participant a u32 length prefixed id and a flags
/// byte.
///
/// Checksums and entry lengths are left to the underlying store.
const LOG_ENTRY_FORMAT_VERSION: u8 = 1;

const KIND_PAYLOAD: u8 = 0;
const KIND_FIRST_ENTRY_OF_TERM: u8 = 1;
const KIND_UPDATE_PARTICIPANTS_CONFIG: u8 = 2;

const FLAG_ALLOWED_IN_QUORUM: u8 = 0b01;
const FLAG_FORCED: u8 = 0b10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unsupported entry format version {0}")]
    UnsupportedVersion(u8),
    #[error("Unknown entry kind {0}")]
    UnknownKind(u8),
    #[error("Entry is truncated, needed {needed} more bytes")]
    Truncated { needed: usize },
    #[error("Participant id is not valid utf-8")]
    InvalidParticipantId,
}

impl From<&PersistingLogEntry> for Bytes {
    fn from(entry: &PersistingLogEntry) -> Self {
        let mut buf = BytesMut::with_capacity(1 + 8 + 8 + 1 + 32);
        buf.put_u8(LOG_ENTRY_FORMAT_VERSION);
        buf.put_u64_le(entry.log_term().as_u64());
        buf.put_u64_le(entry.log_index().as_u64());

        match entry.payload() {
            LogEntryPayload::Payload(payload) => {
                buf.put_u8(KIND_PAYLOAD);
                buf.put_slice(payload.as_bytes());
            }
            LogEntryPayload::Meta(LogMetaPayload::FirstEntryOfTerm { leader, participants }) => {
                buf.put_u8(KIND_FIRST_ENTRY_OF_TERM);
                put_participant_id(&mut buf, leader);
                put_config(&mut buf, participants);
            }
            LogEntryPayload::Meta(LogMetaPayload::UpdateParticipantsConfig { participants }) => {
                buf.put_u8(KIND_UPDATE_PARTICIPANTS_CONFIG);
                put_config(&mut buf, participants);
            }
        }

        buf.freeze()
    }
}

impl TryFrom<&[u8]> for PersistingLogEntry {
    type Error = CodecError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let mut reader = Reader(bytes);

        let version = reader.u8()?;
        if version != LOG_ENTRY_FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let term = LogTerm::new(reader.u64()?);
        let index = LogIndex::new(reader.u64()?);
        let kind = reader.u8()?;

        let payload = match kind {
            KIND_PAYLOAD => LogEntryPayload::Payload(LogPayload::create_from_slice(reader.0)),
            KIND_FIRST_ENTRY_OF_TERM => {
                let leader = reader.participant_id()?;
                let participants = Arc::new(reader.config()?);
                LogEntryPayload::Meta(LogMetaPayload::FirstEntryOfTerm { leader, participants })
            }
            KIND_UPDATE_PARTICIPANTS_CONFIG => {
                let participants = Arc::new(reader.config()?);
                LogEntryPayload::Meta(LogMetaPayload::UpdateParticipantsConfig { participants })
            }
            other => return Err(CodecError::UnknownKind(other)),
        };

        Ok(PersistingLogEntry::new(TermIndexPair::new(term, index), payload))
    }
}

fn put_participant_id(buf: &mut BytesMut, id: &ParticipantId) {
    buf.put_u32_le(id.as_str().len() as u32);
    buf.put_slice(id.as_str().as_bytes());
}

fn put_config(buf: &mut BytesMut, config: &ParticipantsConfig) {
    buf.put_u64_le(config.generation);
    buf.put_u64_le(config.effective_write_concern as u64);
    buf.put_u8(config.wait_for_sync as u8);
    buf.put_u32_le(config.participants.len() as u32);
    for (id, flags) in config.participants.iter() {
        put_participant_id(buf, id);
        let mut bits = 0;
        if flags.allowed_in_quorum {
            bits |= FLAG_ALLOWED_IN_QUORUM;
        }
        if flags.forced {
            bits |= FLAG_FORCED;
        }
        buf.put_u8(bits);
    }
}

struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn ensure(&self, n: usize) -> Result<(), CodecError> {
        if self.0.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n - self.0.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.0.get_u8())
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        self.ensure(4)?;
        Ok(self.0.get_u32_le())
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        self.ensure(8)?;
        Ok(self.0.get_u64_le())
    }

    fn participant_id(&mut self) -> Result<ParticipantId, CodecError> {
        let len = self.u32()? as usize;
        self.ensure(len)?;
        let (raw, rest) = self.0.split_at(len);
        self.0 = rest;
        let id = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidParticipantId)?;
        Ok(ParticipantId::new(id))
    }

    fn config(&mut self) -> Result<ParticipantsConfig, CodecError> {
        let generation = self.u64()?;
        let effective_write_concern = self.u64()? as usize;
        let wait_for_sync = self.u8()? != 0;
        let count = self.u32()?;

        let mut participants = BTreeMap::new();
        for _ in 0..count {
            let id = self.participant_id()?;
            let bits = self.u8()?;
            participants.insert(
                id,
                ParticipantFlags {
                    allowed_in_quorum: bits & FLAG_ALLOWED_IN_QUORUM != 0,
                    forced: bits & FLAG_FORCED != 0,
                },
            );
        }

        Ok(ParticipantsConfig {
            generation,
            participants,
            effective_write_concern,
            wait_for_sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ParticipantsConfig {
        ParticipantsConfig::new(7, vec!["leader".into(), "f1".into(), "f2".into()], 2)
            .with_flags(&"f1".into(), ParticipantFlags::forced())
            .with_flags(&"f2".into(), ParticipantFlags::excluded())
    }

    #[test]
    fn meta_entry_survives_encoding() {
        let entry = PersistingLogEntry::with_meta(
            LogTerm::new(4),
            LogIndex::new(12),
            LogMetaPayload::FirstEntryOfTerm {
                leader: "leader".into(),
                participants: Arc::new(config()),
            },
        );

        let bytes = Bytes::from(&entry);
        assert_eq!(bytes[0], LOG_ENTRY_FORMAT_VERSION);
        assert_eq!(bytes[17], KIND_FIRST_ENTRY_OF_TERM);

        let decoded = PersistingLogEntry::try_from(&bytes[..]).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn user_payload_is_stored_raw() {
        let entry = PersistingLogEntry::with_payload(
            LogTerm::new(1),
            LogIndex::new(2),
            LogPayload::create_from_string("hello"),
        );
        let bytes = Bytes::from(&entry);
        assert_eq!(&bytes[18..], b"hello");
        assert_eq!(PersistingLogEntry::try_from(&bytes[..]).unwrap(), entry);
    }

    #[test]
    fn decoding_errors() {
        assert_eq!(
            PersistingLogEntry::try_from(&[][..]),
            Err(CodecError::Truncated { needed: 1 })
        );
        assert_eq!(
            PersistingLogEntry::try_from(&[9u8][..]),
            Err(CodecError::UnsupportedVersion(9))
        );
        assert_eq!(
            PersistingLogEntry::try_from(&[LOG_ENTRY_FORMAT_VERSION, 1, 0, 0][..]),
            Err(CodecError::Truncated { needed: 5 })
        );

        let mut unknown = vec![LOG_ENTRY_FORMAT_VERSION];
        unknown.extend_from_slice(&[0; 16]);
        unknown.push(42);
        assert_eq!(
            PersistingLogEntry::try_from(&unknown[..]),
            Err(CodecError::UnknownKind(42))
        );

        let entry = PersistingLogEntry::with_meta(
            LogTerm::new(1),
            LogIndex::new(1),
            LogMetaPayload::UpdateParticipantsConfig {
                participants: Arc::new(config()),
            },
        );
        let bytes = Bytes::from(&entry);
        assert!(matches!(
            PersistingLogEntry::try_from(&bytes[..bytes.len() - 1]),
            Err(CodecError::Truncated { .. })
        ));
    }
}
