//! Animation-state sync.
//!
//! The sender emits a fixed 20-byte packet only when an entity's animation
//! changes. The receiver holds a few packets per entity, sorted by
//! timestamp, before releasing them so jitter and reordering are absorbed.
//!
//! ```text
//! ┌──────────────┬──────────┬───────────────┬───────────────┬──────────┐
//! │ entity: u64  │ kind: u8 │ frame: u16    │ time: i64     │ loop: u8 │
//! └──────────────┴──────────┴───────────────┴───────────────┴──────────┘
//! ```

use std::collections::{HashMap, VecDeque};

use crate::error::{CodecError, CodecResult};
use crate::protocol::{WireReader, WireWriter};

/// Highest frame index a packet may carry.
pub const MAX_FRAME_INDEX: u16 = 1023;

/// Encoded size of one [`AnimationPacket`].
pub const ANIMATION_PACKET_LEN: usize = 20;

/// Encoded size of an [`AnimationBatch`] header.
pub const ANIMATION_BATCH_HEADER_LEN: usize = 10;

/// Animation being played.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AnimationKind {
    /// Standing still.
    #[default]
    Idle = 0,
    /// Walking.
    Walk = 1,
    /// Running.
    Run = 2,
    /// Airborne.
    Jump = 3,
    /// Attacking.
    Attack = 4,
    /// Taking damage.
    Hurt = 5,
    /// Dying.
    Death = 6,
    /// Casting.
    Cast = 7,
}

impl TryFrom<u8> for AnimationKind {
    type Error = CodecError;

    fn try_from(value: u8) -> CodecResult<Self> {
        Ok(match value {
            0 => Self::Idle,
            1 => Self::Walk,
            2 => Self::Run,
            3 => Self::Jump,
            4 => Self::Attack,
            5 => Self::Hurt,
            6 => Self::Death,
            7 => Self::Cast,
            other => {
                return Err(CodecError::InvalidValue {
                    field: "animation kind",
                    value: u64::from(other),
                })
            }
        })
    }
}

/// One animation transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnimationPacket {
    /// Animated entity.
    pub entity_id: u64,
    /// New animation.
    pub kind: AnimationKind,
    /// Frame to start from.
    pub frame_index: u16,
    /// Sender time (ns).
    pub timestamp_ns: i64,
    /// Animation loops.
    pub looping: bool,
}

impl AnimationPacket {
    fn check_frame(frame_index: u16) -> CodecResult<()> {
        if frame_index > MAX_FRAME_INDEX {
            return Err(CodecError::InvalidValue {
                field: "frame index",
                value: u64::from(frame_index),
            });
        }
        Ok(())
    }

    fn write(&self, writer: &mut WireWriter) -> CodecResult<()> {
        Self::check_frame(self.frame_index)?;
        writer.write_u64(self.entity_id);
        writer.write_u8(self.kind as u8);
        writer.write_u16(self.frame_index);
        writer.write_i64(self.timestamp_ns);
        writer.write_u8(u8::from(self.looping));
        Ok(())
    }

    fn read(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        reader.require(ANIMATION_PACKET_LEN)?;
        let entity_id = reader.read_u64()?;
        let kind = AnimationKind::try_from(reader.read_u8()?)?;
        let frame_index = reader.read_u16()?;
        Self::check_frame(frame_index)?;
        let timestamp_ns = reader.read_i64()?;
        let looping = reader.read_u8()? != 0;
        Ok(Self {
            entity_id,
            kind,
            frame_index,
            timestamp_ns,
            looping,
        })
    }

    /// Encodes the packet.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidValue`] if the frame index exceeds
    /// [`MAX_FRAME_INDEX`].
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut writer = WireWriter::with_capacity(ANIMATION_PACKET_LEN);
        self.write(&mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Decodes a packet, rejecting unknown kinds and out-of-range frames.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] or [`CodecError::InvalidValue`].
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Self::read(&mut WireReader::new(bytes))
    }
}

/// Several transitions sent together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnimationBatch {
    /// Batch time (ns).
    pub timestamp_ns: i64,
    /// Transitions.
    pub packets: Vec<AnimationPacket>,
}

impl AnimationBatch {
    /// Encodes `count:u16, timestamp:i64` followed by the packets.
    ///
    /// # Errors
    ///
    /// [`CodecError::FieldTooLong`] past `u16::MAX` packets, or any packet
    /// encode error.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let count = u16::try_from(self.packets.len()).map_err(|_| CodecError::FieldTooLong {
            field: "animation batch",
            len: self.packets.len(),
            max: usize::from(u16::MAX),
        })?;
        let mut writer = WireWriter::with_capacity(
            ANIMATION_BATCH_HEADER_LEN + self.packets.len() * ANIMATION_PACKET_LEN,
        );
        writer.write_u16(count);
        writer.write_i64(self.timestamp_ns);
        for packet in &self.packets {
            packet.write(&mut writer)?;
        }
        Ok(writer.into_bytes())
    }

    /// Decodes a batch.
    ///
    /// # Errors
    ///
    /// As [`AnimationPacket::decode`], for the header and every packet.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = WireReader::new(bytes);
        reader.require(ANIMATION_BATCH_HEADER_LEN)?;
        let count = reader.read_u16()?;
        let timestamp_ns = reader.read_i64()?;
        reader.require(usize::from(count) * ANIMATION_PACKET_LEN)?;
        let packets = (0..count)
            .map(|_| AnimationPacket::read(&mut reader))
            .collect::<CodecResult<_>>()?;
        Ok(Self {
            timestamp_ns,
            packets,
        })
    }
}

/// Sender side: suppresses repeats of the current animation.
#[derive(Debug, Default)]
pub struct AnimationSender {
    current: HashMap<u64, (AnimationKind, bool)>,
    suppressed: u64,
}

impl AnimationSender {
    /// Creates a sender with no known states.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports an entity's animation. Returns a packet only if the kind or
    /// looping flag differs from the last one sent.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidValue`] if `frame_index` exceeds
    /// [`MAX_FRAME_INDEX`]; the entity's known state is left unchanged.
    pub fn update(
        &mut self,
        entity_id: u64,
        kind: AnimationKind,
        frame_index: u16,
        looping: bool,
        timestamp_ns: i64,
    ) -> CodecResult<Option<AnimationPacket>> {
        AnimationPacket::check_frame(frame_index)?;
        if self.current.get(&entity_id) == Some(&(kind, looping)) {
            self.suppressed += 1;
            return Ok(None);
        }
        self.current.insert(entity_id, (kind, looping));
        Ok(Some(AnimationPacket {
            entity_id,
            kind,
            frame_index,
            timestamp_ns,
            looping,
        }))
    }

    /// Forgets an entity so its next state is always sent.
    pub fn forget(&mut self, entity_id: u64) {
        self.current.remove(&entity_id);
    }

    /// Repeats suppressed so far.
    #[must_use]
    pub const fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

#[derive(Debug, Default)]
struct EntityBuffer {
    pending: VecDeque<AnimationPacket>,
    applied: Option<AnimationPacket>,
}

/// Receiver side: buffers `depth` packets per entity before applying.
#[derive(Debug)]
pub struct AnimationReceiver {
    depth: usize,
    entities: HashMap<u64, EntityBuffer>,
    late: u64,
}

impl AnimationReceiver {
    /// Creates a receiver holding `depth` packets (minimum 1) per entity.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            entities: HashMap::new(),
            late: 0,
        }
    }

    /// Buffers a packet in timestamp order.
    ///
    /// Returns `false` and drops it if it is not newer than the animation
    /// already applied for that entity.
    pub fn push(&mut self, packet: AnimationPacket) -> bool {
        let buffer = self.entities.entry(packet.entity_id).or_default();
        if buffer
            .applied
            .is_some_and(|applied| packet.timestamp_ns <= applied.timestamp_ns)
        {
            self.late += 1;
            return false;
        }
        let at = buffer
            .pending
            .partition_point(|queued| queued.timestamp_ns <= packet.timestamp_ns);
        buffer.pending.insert(at, packet);
        true
    }

    /// Releases every packet whose entity has at least `depth` buffered,
    /// oldest first, marking each as applied.
    pub fn drain_ready(&mut self) -> Vec<AnimationPacket> {
        let mut ready = Vec::new();
        for buffer in self.entities.values_mut() {
            while buffer.pending.len() >= self.depth {
                let Some(packet) = buffer.pending.pop_front() else {
                    break;
                };
                buffer.applied = Some(packet);
                ready.push(packet);
            }
        }
        ready.sort_by_key(|packet| (packet.timestamp_ns, packet.entity_id));
        ready
    }

    /// Last applied animation for `entity_id`.
    #[must_use]
    pub fn current(&self, entity_id: u64) -> Option<AnimationPacket> {
        self.entities.get(&entity_id)?.applied
    }

    /// Packets waiting for `entity_id`.
    #[must_use]
    pub fn buffered(&self, entity_id: u64) -> usize {
        self.entities.get(&entity_id).map_or(0, |b| b.pending.len())
    }

    /// Drops all state for an entity.
    pub fn remove(&mut self, entity_id: u64) {
        self.entities.remove(&entity_id);
    }

    /// Packets dropped for arriving after a newer one was applied.
    #[must_use]
    pub const fn late(&self) -> u64 {
        self.late
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(entity_id: u64, kind: AnimationKind, timestamp_ns: i64) -> AnimationPacket {
        AnimationPacket {
            entity_id,
            kind,
            frame_index: 3,
            timestamp_ns,
            looping: true,
        }
    }

    #[test]
    fn test_packet_layout() {
        let bytes = AnimationPacket {
            entity_id: 0x0102,
            kind: AnimationKind::Run,
            frame_index: 0x0404,
            timestamp_ns: -1,
            looping: true,
        }
        .encode();
        // 0x0404 is above MAX_FRAME_INDEX.
        assert!(matches!(bytes, Err(CodecError::InvalidValue { field: "frame index", .. })));

        let bytes = packet(0x0102, AnimationKind::Run, -1).encode().unwrap();
        assert_eq!(bytes.len(), ANIMATION_PACKET_LEN);
        assert_eq!(&bytes[..8], &[0x02, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(bytes[8], 2);
        assert_eq!(&bytes[9..11], &[3, 0]);
        assert_eq!(&bytes[11..19], &[0xFF; 8]);
        assert_eq!(bytes[19], 1);
        assert_eq!(AnimationPacket::decode(&bytes).unwrap(), packet(0x0102, AnimationKind::Run, -1));
    }

    #[test]
    fn test_decode_validates() {
        let mut bytes = packet(1, AnimationKind::Idle, 0).encode().unwrap();
        bytes[8] = 42;
        assert_eq!(
            AnimationPacket::decode(&bytes),
            Err(CodecError::InvalidValue {
                field: "animation kind",
                value: 42
            })
        );

        let mut bytes = packet(1, AnimationKind::Idle, 0).encode().unwrap();
        bytes[9..11].copy_from_slice(&2000u16.to_le_bytes());
        assert!(AnimationPacket::decode(&bytes).is_err());

        assert!(matches!(
            AnimationPacket::decode(&bytes[..19]),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_batch_roundtrip() {
        let batch = AnimationBatch {
            timestamp_ns: 77,
            packets: vec![
                packet(1, AnimationKind::Walk, 10),
                packet(2, AnimationKind::Death, 11),
            ],
        };
        let bytes = batch.encode().unwrap();
        assert_eq!(bytes.len(), ANIMATION_BATCH_HEADER_LEN + 2 * ANIMATION_PACKET_LEN);
        assert_eq!(AnimationBatch::decode(&bytes).unwrap(), batch);
        assert!(AnimationBatch::decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_sender_suppresses_repeats() {
        let mut sender = AnimationSender::new();
        assert!(sender.update(1, AnimationKind::Walk, 0, true, 0).unwrap().is_some());
        assert!(sender.update(1, AnimationKind::Walk, 5, true, 1).unwrap().is_none());
        assert!(sender.update(1, AnimationKind::Walk, 5, false, 2).unwrap().is_some());
        assert!(sender.update(2, AnimationKind::Walk, 0, false, 2).unwrap().is_some());
        assert_eq!(sender.suppressed(), 1);

        sender.forget(1);
        assert!(sender.update(1, AnimationKind::Walk, 0, false, 3).unwrap().is_some());
    }

    #[test]
    fn test_sender_rejects_out_of_range_frame() {
        let mut sender = AnimationSender::new();
        assert_eq!(
            sender.update(1, AnimationKind::Attack, MAX_FRAME_INDEX + 1, false, 0),
            Err(CodecError::InvalidValue {
                field: "frame index",
                value: u64::from(MAX_FRAME_INDEX + 1),
            })
        );
        // The rejected call did not record a state, so the next one is sent.
        let packet = sender
            .update(1, AnimationKind::Attack, MAX_FRAME_INDEX, false, 1)
            .unwrap()
            .unwrap();
        assert_eq!(packet.frame_index, MAX_FRAME_INDEX);
        assert_eq!(sender.suppressed(), 0);
    }

    #[test]
    fn test_receiver_reorders_and_buffers() {
        let mut receiver = AnimationReceiver::new(2);
        assert!(receiver.push(packet(1, AnimationKind::Run, 20)));
        assert!(receiver.drain_ready().is_empty());

        // Arrives out of order; sorted on insert.
        assert!(receiver.push(packet(1, AnimationKind::Walk, 10)));
        let ready = receiver.drain_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].kind, AnimationKind::Walk);
        assert_eq!(receiver.buffered(1), 1);
        assert_eq!(receiver.current(1).unwrap().timestamp_ns, 10);

        // Older than what was applied.
        assert!(!receiver.push(packet(1, AnimationKind::Jump, 5)));
        assert_eq!(receiver.late(), 1);
    }
}
