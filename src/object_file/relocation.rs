use crate::serializable::{read_i64, read_u32, read_u64, Serializable, SerializationError};

/// Wire size of a relocation table entry.
pub const RELOCATION_ENTRY_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RelocationType {
    Abs32 = 0,
    Abs64 = 1,
    Pcrel32 = 2,
    Pcrel64 = 3,
    Gotrel = 4,
    Pltrel = 5,
}

impl TryFrom<u32> for RelocationType {
    type Error = SerializationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RelocationType::Abs32),
            1 => Ok(RelocationType::Abs64),
            2 => Ok(RelocationType::Pcrel32),
            3 => Ok(RelocationType::Pcrel64),
            4 => Ok(RelocationType::Gotrel),
            5 => Ok(RelocationType::Pltrel),
            v => Err(SerializationError::InvalidRelocationType(v)),
        }
    }
}

/// A patch instruction against a location in a section. The location is
/// packed into a single u64 as `(section index << 32) | byte offset`, which
/// caps any one section at 4 GiB and section indices at u32::MAX. Section
/// indices are 1-based, matching `Symbol::section_idx`.
#[derive(Debug, Clone)]
pub struct Relocation {
    pub offset: u64,
    pub symbol_idx: u32,
    pub reloc_type: RelocationType,
    pub addend: i64,
}

impl Relocation {
    pub fn new(section_idx: u32, section_offset: u32, symbol_idx: u32, reloc_type: RelocationType, addend: i64) -> Self {
        Relocation {
            offset: Self::pack_offset(section_idx, section_offset),
            symbol_idx,
            reloc_type,
            addend,
        }
    }

    pub fn pack_offset(section_idx: u32, section_offset: u32) -> u64 {
        ((section_idx as u64) << 32) | (section_offset as u64)
    }

    /// 1-based index of the section the patch site lives in.
    pub fn section_index(&self) -> u32 {
        (self.offset >> 32) as u32
    }

    /// Byte offset of the patch site within its section.
    pub fn section_offset(&self) -> u32 {
        self.offset as u32
    }
}

impl Serializable for Relocation {
    fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(RELOCATION_ENTRY_SIZE);
        data.extend(self.offset.to_le_bytes());
        data.extend(self.symbol_idx.to_le_bytes());
        data.extend((self.reloc_type as u32).to_le_bytes());
        data.extend(self.addend.to_le_bytes());
        data
    }

    fn deserialize(data: &[u8]) -> Result<(usize, Self), SerializationError> {
        if data.len() < RELOCATION_ENTRY_SIZE {
            return Err(SerializationError::DataTooShort);
        }
        Ok((
            RELOCATION_ENTRY_SIZE,
            Relocation {
                offset: read_u64(data, 0)?,
                symbol_idx: read_u32(data, 8)?,
                reloc_type: RelocationType::try_from(read_u32(data, 12)?)?,
                addend: read_i64(data, 16)?,
            },
        ))
    }
}
