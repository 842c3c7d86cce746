//! Wire encoding for the three handshake messages a `PackageSynchronizer`
//! exchanges with its peer. Stage 0 carries a full per-level table of
//! candidate algorithms rather than a single flattened choice, so an
//! acceptor can pick the highest level it also supports; every message
//! serializes to a flat, length-prefixed byte buffer validated against the
//! size limits in `algorithms.rs`.

use crate::error::{Error, Result};

use super::algorithms::{
    ConfidentialityLevel, MAXIMUM_EXPECTED_PUBLIC_KEY_SIZE, MAXIMUM_EXPECTED_SALT_SIZE,
    MAXIMUM_SUPPORTED_ALGORITHM_ELEMENTS, MAXIMUM_SUPPORTED_ALGORITHM_NAME_SIZE,
};

/// One confidentiality level's candidate algorithm names, in preference
/// order, as offered by an initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelOffer {
    pub level: ConfidentialityLevel,
    pub key_agreement: Vec<String>,
    pub cipher: Vec<String>,
    pub hash_function: Vec<String>,
}

/// Initiator -> acceptor. Offers every confidentiality level the initiator
/// supports, each with its own candidate algorithm lists, plus ephemeral
/// public material for every distinct key-agreement algorithm named across
/// all levels, so an acceptor choosing any of them can respond in one round
/// trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageZeroMessage {
    pub levels: Vec<LevelOffer>,
    pub public_material: Vec<(String, Vec<u8>)>,
}

/// Acceptor -> initiator. Confirms the level and algorithm triple it is
/// proceeding with, plus its own public material. `accepted` is `false` if
/// no level in the offer has a triple the acceptor also supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOneMessage {
    pub accepted: bool,
    pub selected_level: ConfidentialityLevel,
    pub selected_key_agreement: String,
    pub selected_cipher: String,
    pub selected_hash_function: String,
    pub public_material: Vec<u8>,
    pub salt: Vec<u8>,
}

/// Initiator -> acceptor. Proves the initiator derived the same shared
/// secret by signing a transcript digest with a key derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTwoMessage {
    pub transcript_signature: Vec<u8>,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8> {
        let byte = *self.buf.get(self.pos).ok_or_else(|| truncated("u8"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_exact(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_exact(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(|| truncated("length overflow"))?;
        let slice = self.buf.get(self.pos..end).ok_or_else(|| truncated("declared size exceeds available bytes"))?;
        self.pos = end;
        Ok(slice)
    }

    /// Reads a `u16`-length-prefixed name, validating the declared length
    /// against `MAXIMUM_SUPPORTED_ALGORITHM_NAME_SIZE` and against what is
    /// actually left in the buffer. An empty name is permitted here (a
    /// rejection reply carries one); `read_name_list` rejects empty entries.
    fn read_name(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        if len > MAXIMUM_SUPPORTED_ALGORITHM_NAME_SIZE {
            return Err(Error::InvalidArgument(format!(
                "algorithm name length {len} exceeds maximum {MAXIMUM_SUPPORTED_ALGORITHM_NAME_SIZE}"
            )));
        }
        let bytes = self.read_exact(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::InvalidArgument("algorithm name is not utf-8".into()))
    }

    /// Reads a `u8`-prefixed list of names, validating the group count
    /// against `MAXIMUM_SUPPORTED_ALGORITHM_ELEMENTS`.
    fn read_name_list(&mut self) -> Result<Vec<String>> {
        let count = self.read_u8()? as usize;
        if count == 0 || count > MAXIMUM_SUPPORTED_ALGORITHM_ELEMENTS {
            return Err(Error::InvalidArgument(format!(
                "algorithm group count {count} outside [1, {MAXIMUM_SUPPORTED_ALGORITHM_ELEMENTS}]"
            )));
        }
        (0..count)
            .map(|_| {
                let name = self.read_name()?;
                if name.is_empty() {
                    return Err(Error::InvalidArgument("algorithm name in a candidate list must not be empty".into()));
                }
                Ok(name)
            })
            .collect()
    }

    /// Reads a `u32`-length-prefixed byte buffer, validating the declared
    /// length against `max` and against what is actually left in the buffer.
    fn read_sized(&mut self, max: usize, what: &str) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        if len > max {
            return Err(Error::InvalidArgument(format!("{what} length {len} exceeds maximum {max}")));
        }
        Ok(self.read_exact(len)?.to_vec())
    }
}

fn truncated(what: &str) -> Error {
    Error::InvalidArgument(format!("wire message truncated reading {what}"))
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
    out.extend_from_slice(name.as_bytes());
}

fn write_name_list(out: &mut Vec<u8>, names: &[String]) {
    out.push(names.len() as u8);
    for name in names {
        write_name(out, name);
    }
}

fn write_sized(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

impl StageZeroMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.levels.len() as u8);
        for offer in &self.levels {
            out.push(offer.level.as_u8());
            write_name_list(&mut out, &offer.key_agreement);
            write_name_list(&mut out, &offer.cipher);
            write_name_list(&mut out, &offer.hash_function);
        }
        out.push(self.public_material.len() as u8);
        for (name, material) in &self.public_material {
            write_name(&mut out, name);
            write_sized(&mut out, material);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let level_count = reader.read_u8()? as usize;
        if level_count == 0 || level_count > MAXIMUM_SUPPORTED_ALGORITHM_ELEMENTS {
            return Err(Error::InvalidArgument(format!(
                "level count {level_count} outside [1, {MAXIMUM_SUPPORTED_ALGORITHM_ELEMENTS}]"
            )));
        }
        let mut levels = Vec::with_capacity(level_count);
        for _ in 0..level_count {
            let level = ConfidentialityLevel::from_u8(reader.read_u8()?)?;
            let key_agreement = reader.read_name_list()?;
            let cipher = reader.read_name_list()?;
            let hash_function = reader.read_name_list()?;
            levels.push(LevelOffer { level, key_agreement, cipher, hash_function });
        }

        let material_count = reader.read_u8()? as usize;
        if material_count == 0 || material_count > MAXIMUM_SUPPORTED_ALGORITHM_ELEMENTS {
            return Err(Error::InvalidArgument(format!(
                "public material group count {material_count} outside [1, {MAXIMUM_SUPPORTED_ALGORITHM_ELEMENTS}]"
            )));
        }
        let mut public_material = Vec::with_capacity(material_count);
        for _ in 0..material_count {
            let name = reader.read_name()?;
            let material = reader.read_sized(MAXIMUM_EXPECTED_PUBLIC_KEY_SIZE, "public key material")?;
            public_material.push((name, material));
        }
        Ok(Self { levels, public_material })
    }
}

impl StageOneMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.accepted as u8);
        out.push(self.selected_level.as_u8());
        write_name(&mut out, &self.selected_key_agreement);
        write_name(&mut out, &self.selected_cipher);
        write_name(&mut out, &self.selected_hash_function);
        write_sized(&mut out, &self.public_material);
        write_sized(&mut out, &self.salt);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let accepted = reader.read_u8()? != 0;
        let selected_level = ConfidentialityLevel::from_u8(reader.read_u8()?)?;
        let selected_key_agreement = reader.read_name()?;
        let selected_cipher = reader.read_name()?;
        let selected_hash_function = reader.read_name()?;
        let public_material = reader.read_sized(MAXIMUM_EXPECTED_PUBLIC_KEY_SIZE, "public key material")?;
        let salt = reader.read_sized(MAXIMUM_EXPECTED_SALT_SIZE, "salt")?;
        Ok(Self {
            accepted,
            selected_level,
            selected_key_agreement,
            selected_cipher,
            selected_hash_function,
            public_material,
            salt,
        })
    }
}

impl StageTwoMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_sized(&mut out, &self.transcript_signature);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let transcript_signature = reader.read_sized(MAXIMUM_EXPECTED_SALT_SIZE, "transcript signature")?;
        Ok(Self { transcript_signature })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_offer(level: ConfidentialityLevel) -> LevelOffer {
        LevelOffer {
            level,
            key_agreement: vec!["x25519".into(), "kem-kyber768".into()],
            cipher: vec!["aes-256-ctr".into()],
            hash_function: vec!["sha256".into()],
        }
    }

    #[test]
    fn stage_zero_round_trips_through_its_wire_encoding() {
        let message = StageZeroMessage {
            levels: vec![sample_offer(ConfidentialityLevel::High), sample_offer(ConfidentialityLevel::Low)],
            public_material: vec![("x25519".into(), vec![1, 2, 3]), ("kem-kyber768".into(), vec![4, 5, 6, 7])],
        };
        let decoded = StageZeroMessage::decode(&message.encode()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn stage_one_round_trips_through_its_wire_encoding() {
        let message = StageOneMessage {
            accepted: true,
            selected_level: ConfidentialityLevel::Medium,
            selected_key_agreement: "x25519".into(),
            selected_cipher: "aes-256-ctr".into(),
            selected_hash_function: "sha256".into(),
            public_material: vec![9; 32],
            salt: vec![1; 32],
        };
        let decoded = StageOneMessage::decode(&message.encode()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn stage_two_round_trips_through_its_wire_encoding() {
        let message = StageTwoMessage { transcript_signature: vec![0xab; 32] };
        let decoded = StageTwoMessage::decode(&message.encode()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn decode_rejects_a_declared_size_exceeding_the_buffer() {
        let mut bytes = StageOneMessage {
            accepted: true,
            selected_level: ConfidentialityLevel::Low,
            selected_key_agreement: "x25519".into(),
            selected_cipher: "aes-256-ctr".into(),
            selected_hash_function: "sha256".into(),
            public_material: vec![1, 2, 3, 4],
            salt: vec![5, 6],
        }
        .encode();
        let len = bytes.len();
        bytes.truncate(len - 1);
        assert!(StageOneMessage::decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_a_group_count_above_the_maximum() {
        let mut bytes = vec![(MAXIMUM_SUPPORTED_ALGORITHM_ELEMENTS + 1) as u8];
        bytes.extend_from_slice(&[0u8; 64]);
        assert!(StageZeroMessage::decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_a_name_length_above_the_maximum() {
        let mut bytes = Vec::new();
        bytes.push(1u8); // accepted
        bytes.push(ConfidentialityLevel::Low.as_u8());
        bytes.extend_from_slice(&((MAXIMUM_SUPPORTED_ALGORITHM_NAME_SIZE + 1) as u16).to_be_bytes());
        assert!(StageOneMessage::decode(&bytes).is_err());
    }
}
