//! # Messages
//!
//! ```text
//! StateUpdate (server -> client)
//! ┌───────────┬──────────┬──────────┬─────────┬───────────┬───────────────────────────────┐
//! │ timestamp │ entityID │ priority │ seq     │ compCount │ {typeLen:u16 type dataLen:u32 │
//! │ u64       │ u64      │ u8       │ u32     │ u16       │  data} x compCount            │
//! └───────────┴──────────┴──────────┴─────────┴───────────┴───────────────────────────────┘
//!
//! InputCommand (client -> server)
//! ┌──────────┬───────────┬─────────┬─────────┬──────┬─────────┬──────┐
//! │ playerID │ timestamp │ seq     │ typeLen │ type │ dataLen │ data │
//! │ u64      │ u64       │ u32     │ u16     │      │ u32     │      │
//! └──────────┴───────────┴─────────┴─────────┴──────┴─────────┴──────┘
//! ```
//!
//! Decoding checks structure only. Semantic ranges are the caller's problem.
//! Bytes after the last field are ignored.

use tether_core::{AnyComponent, Component, ComponentError};

use super::wire::{WireReader, WireWriter};
use crate::error::{CodecError, CodecResult};

/// Fixed header size of an encoded [`StateUpdate`].
pub const STATE_UPDATE_HEADER_LEN: usize = 8 + 8 + 1 + 4 + 2;

/// Offset of the sequence field inside an encoded [`StateUpdate`].
const STATE_UPDATE_SEQUENCE_OFFSET: usize = 8 + 8 + 1;

/// Minimum size of an encoded [`InputCommand`].
pub const INPUT_COMMAND_MIN_LEN: usize = 8 + 8 + 4 + 2 + 4;

/// Opaque component payload tagged with its wire type string.
///
/// The transport never interprets `data`; typed access goes through
/// [`ComponentData::decode`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ComponentData {
    /// Wire type string (e.g. `"position"`).
    pub type_name: String,
    /// Encoded component bytes.
    pub data: Vec<u8>,
}

impl ComponentData {
    /// Creates a blob from raw parts.
    #[must_use]
    pub fn new(type_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            type_name: type_name.into(),
            data: data.into(),
        }
    }

    /// Encodes a typed component.
    #[must_use]
    pub fn encode<C: Component>(component: &C) -> Self {
        Self::new(C::KIND.type_name(), component.encode())
    }

    /// Decodes the blob as `C`.
    ///
    /// # Errors
    ///
    /// [`ComponentError::KindMismatch`] if the blob is tagged with another
    /// type, [`ComponentError::LengthMismatch`] on a wrong-sized payload.
    pub fn decode<C: Component>(&self) -> CodecResult<C> {
        let expected = C::KIND.type_name();
        if self.type_name != expected {
            return Err(ComponentError::KindMismatch {
                expected,
                actual: self.type_name.clone(),
            }
            .into());
        }
        Ok(C::decode(&self.data)?)
    }

    /// Decodes the blob as whichever registered component it names.
    ///
    /// # Errors
    ///
    /// [`ComponentError::UnknownComponent`] or
    /// [`ComponentError::LengthMismatch`].
    pub fn decode_any(&self) -> CodecResult<AnyComponent> {
        Ok(AnyComponent::decode(&self.type_name, &self.data)?)
    }

    fn encoded_len(&self) -> usize {
        2 + self.type_name.len() + 4 + self.data.len()
    }
}

impl From<AnyComponent> for ComponentData {
    fn from(component: AnyComponent) -> Self {
        Self::new(component.kind().type_name(), component.encode())
    }
}

/// Authoritative entity state pushed by the server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateUpdate {
    /// Server time in nanoseconds.
    pub timestamp_ns: u64,
    /// Entity this update describes.
    pub entity_id: u64,
    /// Heterogeneous, self-describing component payloads (order preserved).
    pub components: Vec<ComponentData>,
    /// Informational priority (0-255).
    pub priority: u8,
    /// Server-assigned; overwritten on broadcast.
    pub sequence: u32,
}

impl StateUpdate {
    /// Creates an update with no components.
    #[must_use]
    pub const fn new(entity_id: u64, timestamp_ns: u64) -> Self {
        Self {
            timestamp_ns,
            entity_id,
            components: Vec::new(),
            priority: 0,
            sequence: 0,
        }
    }

    /// Appends a typed component.
    #[must_use]
    pub fn with_component<C: Component>(mut self, component: &C) -> Self {
        self.components.push(ComponentData::encode(component));
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// First component carrying `type_name`.
    #[must_use]
    pub fn component(&self, type_name: &str) -> Option<&ComponentData> {
        self.components.iter().find(|c| c.type_name == type_name)
    }

    /// First component of type `C`, decoded.
    ///
    /// Returns `None` if absent; a present but corrupt blob is an error.
    ///
    /// # Errors
    ///
    /// As [`ComponentData::decode`].
    pub fn get<C: Component>(&self) -> CodecResult<Option<C>> {
        self.component(C::KIND.type_name())
            .map(ComponentData::decode::<C>)
            .transpose()
    }

    /// Exact encoded size.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        STATE_UPDATE_HEADER_LEN + self.components.iter().map(ComponentData::encoded_len).sum::<usize>()
    }

    /// Encodes the update.
    ///
    /// # Errors
    ///
    /// [`CodecError::FieldTooLong`] if there are more than 65535 components
    /// or a type string or payload overflows its prefix.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let count = u16::try_from(self.components.len()).map_err(|_| CodecError::FieldTooLong {
            field: "components",
            len: self.components.len(),
            max: usize::from(u16::MAX),
        })?;

        let mut writer = WireWriter::with_capacity(self.encoded_len());
        writer.write_u64(self.timestamp_ns);
        writer.write_u64(self.entity_id);
        writer.write_u8(self.priority);
        writer.write_u32(self.sequence);
        writer.write_u16(count);
        for component in &self.components {
            writer.write_str("component type", &component.type_name)?;
            writer.write_blob("component data", &component.data)?;
        }
        Ok(writer.into_bytes())
    }

    /// Overwrites the sequence field of an already encoded update.
    ///
    /// Buffers shorter than the header are left untouched.
    pub(crate) fn restamp_sequence(bytes: &mut [u8], sequence: u32) {
        if let Some(field) = bytes.get_mut(STATE_UPDATE_SEQUENCE_OFFSET..STATE_UPDATE_SEQUENCE_OFFSET + 4) {
            field.copy_from_slice(&sequence.to_le_bytes());
        }
    }

    /// Decodes an update.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] if the buffer is shorter than the fixed
    /// header or a component runs past the end; [`CodecError::InvalidUtf8`]
    /// on a bad type string.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = WireReader::new(bytes);
        reader.require(STATE_UPDATE_HEADER_LEN)?;

        let timestamp_ns = reader.read_u64()?;
        let entity_id = reader.read_u64()?;
        let priority = reader.read_u8()?;
        let sequence = reader.read_u32()?;
        let count = usize::from(reader.read_u16()?);

        // Each component needs at least its two prefixes; don't trust the
        // count for preallocation beyond what the buffer could hold.
        let mut components = Vec::with_capacity(count.min(reader.remaining() / 6));
        for _ in 0..count {
            let type_name = reader.read_str("component type")?;
            let data = reader.read_blob()?;
            components.push(ComponentData { type_name, data });
        }

        Ok(Self {
            timestamp_ns,
            entity_id,
            components,
            priority,
            sequence,
        })
    }
}

/// Player input sent to the server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputCommand {
    /// Issuing player.
    pub player_id: u64,
    /// Client time in nanoseconds.
    pub timestamp_ns: u64,
    /// Strictly increasing per client.
    pub sequence: u32,
    /// Discriminator (e.g. `"input"`, `"fire"`).
    pub input_type: String,
    /// Opaque payload.
    pub data: Vec<u8>,
}

impl InputCommand {
    /// Creates a command.
    #[must_use]
    pub fn new(
        player_id: u64,
        timestamp_ns: u64,
        sequence: u32,
        input_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            player_id,
            timestamp_ns,
            sequence,
            input_type: input_type.into(),
            data: data.into(),
        }
    }

    /// Decodes the payload as component `C` (typed inputs such as
    /// [`tether_core::Input`]).
    ///
    /// # Errors
    ///
    /// [`ComponentError::LengthMismatch`] on a wrong-sized payload.
    pub fn payload<C: Component>(&self) -> CodecResult<C> {
        Ok(C::decode(&self.data)?)
    }

    /// Encodes the command.
    ///
    /// # Errors
    ///
    /// [`CodecError::FieldTooLong`] if the type string or payload overflows
    /// its prefix.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut writer =
            WireWriter::with_capacity(INPUT_COMMAND_MIN_LEN + self.input_type.len() + self.data.len());
        writer.write_u64(self.player_id);
        writer.write_u64(self.timestamp_ns);
        writer.write_u32(self.sequence);
        writer.write_str("input type", &self.input_type)?;
        writer.write_blob("input data", &self.data)?;
        Ok(writer.into_bytes())
    }

    /// Decodes a command.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] if the buffer is shorter than the minimum or
    /// a length prefix overruns; [`CodecError::InvalidUtf8`] on a bad type.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = WireReader::new(bytes);
        reader.require(INPUT_COMMAND_MIN_LEN)?;

        let player_id = reader.read_u64()?;
        let timestamp_ns = reader.read_u64()?;
        let sequence = reader.read_u32()?;
        let input_type = reader.read_str("input type")?;
        let data = reader.read_blob()?;

        Ok(Self {
            player_id,
            timestamp_ns,
            sequence,
            input_type,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tether_core::{Health, Input, Position, Velocity};

    fn sample_update() -> StateUpdate {
        StateUpdate {
            sequence: 42,
            ..StateUpdate::new(7, 1_700_000_000_000_000_000)
                .with_priority(200)
                .with_component(&Position::new(1.5, -3.0))
                .with_component(&Velocity::new(0.0, 2.0))
                .with_component(&Health::new(80.0, 100.0))
        }
    }

    #[test]
    fn test_state_update_layout() {
        let update = sample_update();
        let bytes = update.encode().unwrap();
        assert_eq!(bytes.len(), update.encoded_len());

        assert_eq!(&bytes[0..8], &1_700_000_000_000_000_000u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &7u64.to_le_bytes());
        assert_eq!(bytes[16], 200);
        assert_eq!(&bytes[17..21], &42u32.to_le_bytes());
        assert_eq!(&bytes[21..23], &3u16.to_le_bytes());
        // First component: typeLen=8 "position", dataLen=16.
        assert_eq!(&bytes[23..25], &8u16.to_le_bytes());
        assert_eq!(&bytes[25..33], b"position");
        assert_eq!(&bytes[33..37], &16u32.to_le_bytes());
    }

    #[test]
    fn test_state_update_roundtrip_preserves_order() {
        let update = sample_update();
        let decoded = StateUpdate::decode(&update.encode().unwrap()).unwrap();
        assert_eq!(decoded, update);

        let names: Vec<_> = decoded.components.iter().map(|c| c.type_name.as_str()).collect();
        assert_eq!(names, ["position", "velocity", "health"]);
        assert_eq!(decoded.get::<Position>().unwrap(), Some(Position::new(1.5, -3.0)));
        assert_eq!(decoded.get::<Input>().unwrap(), None);
    }

    #[test]
    fn test_empty_payloads_roundtrip() {
        let update = StateUpdate {
            components: vec![ComponentData::new("", Vec::new())],
            ..StateUpdate::default()
        };
        let decoded = StateUpdate::decode(&update.encode().unwrap()).unwrap();
        assert_eq!(decoded, update);

        let command = InputCommand::new(1, 2, 3, "", Vec::new());
        let bytes = command.encode().unwrap();
        assert_eq!(bytes.len(), INPUT_COMMAND_MIN_LEN);
        assert_eq!(InputCommand::decode(&bytes).unwrap(), command);
    }

    #[test]
    fn test_short_buffers_rejected() {
        assert_eq!(
            StateUpdate::decode(&[0; STATE_UPDATE_HEADER_LEN - 1]),
            Err(CodecError::Truncated {
                needed: STATE_UPDATE_HEADER_LEN,
                available: STATE_UPDATE_HEADER_LEN - 1,
            })
        );
        assert!(InputCommand::decode(&[]).is_err());

        // Header promises one component that never arrives.
        let mut bytes = StateUpdate::new(1, 1).encode().unwrap();
        bytes[21] = 1;
        assert!(matches!(
            StateUpdate::decode(&bytes),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_truncated_input_payload() {
        let command = InputCommand::new(9, 10, 11, "fire", vec![1, 2, 3, 4]);
        let bytes = command.encode().unwrap();
        let err = InputCommand::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err, CodecError::Truncated { needed: 4, available: 3 });
    }

    #[test]
    fn test_typed_payload_mismatch() {
        let blob = ComponentData::encode(&Health::new(1.0, 2.0));
        let err = blob.decode::<Position>().unwrap_err();
        assert!(matches!(
            err,
            CodecError::Component(ComponentError::KindMismatch { expected: "position", .. })
        ));

        let command = InputCommand::new(1, 0, 1, "input", Input::new(1, -1).encode());
        assert_eq!(command.payload::<Input>().unwrap(), Input::new(1, -1));
        assert!(command.payload::<Position>().is_err());
    }

    #[test]
    fn test_restamp_sequence_in_place() {
        let mut bytes = sample_update().encode().unwrap();
        StateUpdate::restamp_sequence(&mut bytes, 0xDEAD_BEEF);
        let decoded = StateUpdate::decode(&bytes).unwrap();
        assert_eq!(decoded.sequence, 0xDEAD_BEEF);
        assert_eq!(decoded.components, sample_update().components);

        let mut short = vec![0u8; 4];
        StateUpdate::restamp_sequence(&mut short, 9);
        assert_eq!(short, [0; 4]);
    }

    fn random_component(rng: &mut StdRng) -> ComponentData {
        match rng.gen_range(0..10) {
            0 => ComponentData::encode(&Position::new(rng.gen_range(-1e6..1e6), rng.gen_range(-1e6..1e6))),
            1 => ComponentData::encode(&Velocity::new(rng.gen_range(-500.0..500.0), rng.gen_range(-500.0..500.0))),
            2 => ComponentData::encode(&Health::new(rng.gen_range(0.0..100.0), 100.0)),
            3 => ComponentData::encode(&Input::new(rng.gen_range(-1..=1), rng.gen_range(-1..=1))),
            _ => {
                let name_len = rng.gen_range(0..12);
                let type_name: String = (0..name_len)
                    .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
                    .collect();
                let data: Vec<u8> = (0..rng.gen_range(0..48)).map(|_| rng.gen()).collect();
                ComponentData::new(type_name, data)
            }
        }
    }

    #[test]
    fn test_random_updates_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..64 {
            let entity_count = rng.gen_range(1..8);
            for _ in 0..entity_count {
                let mut update = StateUpdate::new(rng.gen(), rng.gen()).with_priority(rng.gen());
                update.sequence = rng.gen();
                for _ in 0..rng.gen_range(0..6) {
                    update.components.push(random_component(&mut rng));
                }

                let bytes = update.encode().unwrap();
                assert_eq!(bytes.len(), update.encoded_len());
                let decoded = StateUpdate::decode(&bytes).unwrap();
                assert_eq!(decoded, update);
            }
        }
    }

    #[test]
    fn test_random_commands_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0x7e7e);
        for _ in 0..64 {
            let type_len = rng.gen_range(0..24);
            let input_type: String = (0..type_len)
                .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
                .collect();
            let data: Vec<u8> = (0..rng.gen_range(0..64)).map(|_| rng.gen()).collect();
            let command = InputCommand::new(rng.gen(), rng.gen(), rng.gen(), input_type, data);

            let decoded = InputCommand::decode(&command.encode().unwrap()).unwrap();
            assert_eq!(decoded, command);
        }
    }
}
