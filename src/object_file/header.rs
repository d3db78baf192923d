use bitflags::bitflags;

use crate::serializable::{read_u32, read_u64, Serializable, SerializationError};

pub const COIL_MAGIC: [u8; 4] = *b"COIL";

/// Wire size of the header record.
pub const HEADER_SIZE: usize = 80;

pub const fn make_version(major: u8, minor: u8, patch: u8) -> u32 {
    ((major as u32) << 16) | ((minor as u32) << 8) | (patch as u32)
}

pub const fn version_major(version: u32) -> u32 {
    version >> 16
}

pub const CURRENT_VERSION: u32 = make_version(1, 0, 0);

pub const ENDIAN_LITTLE: u8 = 0;
pub const ENDIAN_BIG: u8 = 1;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u32 {
        const EXECUTABLE = 0x01;
        const SHARED_OBJECT = 0x02;
        const POSITION_INDEPENDENT = 0x04;
        const HAS_DEBUG_INFO = 0x08;
        const RELOCATABLE = 0x10;
        const PU_SPECIFIC = 0x20;
    }
}

/// Fixed-layout container header. The three `target_*` fields carry the
/// processing-unit kind, architecture and mode as raw integers; the container
/// records themselves are always encoded little-endian, `endianness` only
/// describes the target's data layout.
#[derive(Debug, Clone)]
pub struct ObjectHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub flags: HeaderFlags,
    pub target_pu: u32,
    pub target_arch: u32,
    pub target_mode: u32,
    pub entry_point: u64,
    pub section_count: u32,
    pub symbol_count: u32,
    pub reloc_count: u32,
    pub section_offset: u64,
    pub symbol_offset: u64,
    pub string_offset: u64,
    pub reloc_offset: u64,
    pub endianness: u8,
}

impl Default for ObjectHeader {
    fn default() -> Self {
        ObjectHeader {
            magic: COIL_MAGIC,
            version: CURRENT_VERSION,
            flags: HeaderFlags::RELOCATABLE,
            target_pu: 0,
            target_arch: 0,
            target_mode: 0,
            entry_point: 0,
            section_count: 0,
            symbol_count: 0,
            reloc_count: 0,
            section_offset: 0,
            symbol_offset: 0,
            string_offset: 0,
            reloc_offset: 0,
            endianness: ENDIAN_LITTLE,
        }
    }
}

impl ObjectHeader {
    /// Rejects headers this reader cannot safely interpret: bad magic, a
    /// different major version, a table with entries but no offset, or an
    /// endianness outside {0, 1}.
    pub fn validate(&self) -> Result<(), SerializationError> {
        if self.magic != COIL_MAGIC {
            return Err(SerializationError::InvalidMagic(self.magic));
        }
        if version_major(self.version) != version_major(CURRENT_VERSION) {
            return Err(SerializationError::UnsupportedVersion(self.version));
        }
        if self.section_count > 0 && self.section_offset == 0 {
            return Err(SerializationError::MissingTableOffset("section"));
        }
        if self.symbol_count > 0 && self.symbol_offset == 0 {
            return Err(SerializationError::MissingTableOffset("symbol"));
        }
        if self.reloc_count > 0 && self.reloc_offset == 0 {
            return Err(SerializationError::MissingTableOffset("relocation"));
        }
        if self.string_offset == 0 {
            return Err(SerializationError::MissingTableOffset("string"));
        }
        if self.endianness != ENDIAN_LITTLE && self.endianness != ENDIAN_BIG {
            return Err(SerializationError::InvalidEndianness(self.endianness));
        }
        Ok(())
    }
}

impl Serializable for ObjectHeader {
    fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_SIZE);
        data.extend(self.magic);
        data.extend(self.version.to_le_bytes());
        data.extend(self.flags.bits().to_le_bytes());
        data.extend(self.target_pu.to_le_bytes());
        data.extend(self.target_arch.to_le_bytes());
        data.extend(self.target_mode.to_le_bytes());
        data.extend(self.entry_point.to_le_bytes());
        data.extend(self.section_count.to_le_bytes());
        data.extend(self.symbol_count.to_le_bytes());
        data.extend(self.reloc_count.to_le_bytes());
        data.extend(self.section_offset.to_le_bytes());
        data.extend(self.symbol_offset.to_le_bytes());
        data.extend(self.string_offset.to_le_bytes());
        data.extend(self.reloc_offset.to_le_bytes());
        data.push(self.endianness);
        data.extend([0u8; 3]);
        data
    }

    fn deserialize(data: &[u8]) -> Result<(usize, Self), SerializationError> {
        if data.len() < HEADER_SIZE {
            return Err(SerializationError::DataTooShort);
        }
        let magic = [data[0], data[1], data[2], data[3]];
        Ok((
            HEADER_SIZE,
            ObjectHeader {
                magic,
                version: read_u32(data, 4)?,
                flags: HeaderFlags::from_bits_retain(read_u32(data, 8)?),
                target_pu: read_u32(data, 12)?,
                target_arch: read_u32(data, 16)?,
                target_mode: read_u32(data, 20)?,
                entry_point: read_u64(data, 24)?,
                section_count: read_u32(data, 32)?,
                symbol_count: read_u32(data, 36)?,
                reloc_count: read_u32(data, 40)?,
                section_offset: read_u64(data, 44)?,
                symbol_offset: read_u64(data, 52)?,
                string_offset: read_u64(data, 60)?,
                reloc_offset: read_u64(data, 68)?,
                endianness: data[76],
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_header() -> ObjectHeader {
        ObjectHeader {
            string_offset: HEADER_SIZE as u64,
            ..ObjectHeader::default()
        }
    }

    #[test]
    fn round_trip() {
        let mut header = valid_header();
        header.flags = HeaderFlags::EXECUTABLE | HeaderFlags::HAS_DEBUG_INFO;
        header.target_pu = 1;
        header.target_arch = 2;
        header.target_mode = 3;
        header.entry_point = 0x1234;
        header.section_count = 5;
        header.section_offset = 80;
        let bytes = header.serialize();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let (consumed, decoded) = ObjectHeader::deserialize(&bytes).unwrap();
        assert_eq!(consumed, HEADER_SIZE);
        assert_eq!(decoded.flags, header.flags);
        assert_eq!(decoded.version, CURRENT_VERSION);
        assert_eq!(decoded.entry_point, 0x1234);
        assert_eq!(decoded.section_count, 5);
        assert_eq!(decoded.string_offset, 80);
        assert!(decoded.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_magic() {
        let mut header = valid_header();
        header.magic = *b"ELF\0";
        assert!(matches!(
            header.validate(),
            Err(SerializationError::InvalidMagic(_))
        ));
    }

    #[test]
    fn validate_rejects_major_version_mismatch() {
        let mut header = valid_header();
        header.version = make_version(2, 0, 0);
        assert!(matches!(
            header.validate(),
            Err(SerializationError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn validate_rejects_count_without_offset() {
        let mut header = valid_header();
        header.symbol_count = 3;
        header.symbol_offset = 0;
        assert!(matches!(
            header.validate(),
            Err(SerializationError::MissingTableOffset("symbol"))
        ));
    }

    #[test]
    fn validate_rejects_bad_endianness() {
        let mut header = valid_header();
        header.endianness = 2;
        assert!(matches!(
            header.validate(),
            Err(SerializationError::InvalidEndianness(2))
        ));
    }
}
