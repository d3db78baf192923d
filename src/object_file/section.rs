use bitflags::bitflags;

use crate::serializable::{read_u32, read_u64, Serializable, SerializationError};

/// Wire size of a section table entry. The section's payload bytes are not
/// part of the entry; they live at `offset` in the container.
pub const SECTION_ENTRY_SIZE: usize = 52;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SectionType {
    Code = 0,
    Data = 1,
    Rodata = 2,
    Bss = 3,
    Symtab = 4,
    Strtab = 5,
    Reloc = 6,
    Debug = 7,
    Comment = 8,
    Note = 9,
    Special = 10,
}

impl TryFrom<u32> for SectionType {
    type Error = SerializationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SectionType::Code),
            1 => Ok(SectionType::Data),
            2 => Ok(SectionType::Rodata),
            3 => Ok(SectionType::Bss),
            4 => Ok(SectionType::Symtab),
            5 => Ok(SectionType::Strtab),
            6 => Ok(SectionType::Reloc),
            7 => Ok(SectionType::Debug),
            8 => Ok(SectionType::Comment),
            9 => Ok(SectionType::Note),
            10 => Ok(SectionType::Special),
            v => Err(SerializationError::InvalidSectionType(v)),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SectionFlags: u32 {
        const WRITABLE = 0x001;
        const EXECUTABLE = 0x002;
        const INITIALIZED = 0x004;
        const ALLOC = 0x008;
        const MERGEABLE = 0x010;
        const STRINGS = 0x020;
        const SYMTAB = 0x040;
        const TLS = 0x080;
        const GROUP = 0x100;
    }
}

/// A named, typed byte region. `data` is empty for BSS sections, which carry
/// a size but no payload bytes on disk. For merging purposes a section's
/// identity is its name, not its index.
#[derive(Debug, Clone)]
pub struct Section {
    pub section_type: SectionType,
    pub flags: SectionFlags,
    pub offset: u64,
    pub size: u64,
    pub addr: u64,
    pub align: u64,
    pub name_idx: u32,
    pub link: u32,
    pub info: u32,
    pub data: Vec<u8>,
}

impl Section {
    pub fn new(section_type: SectionType, flags: SectionFlags, align: u64, name_idx: u32) -> Self {
        Section {
            section_type,
            flags,
            offset: 0,
            size: 0,
            addr: 0,
            align,
            name_idx,
            link: 0,
            info: 0,
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.size = data.len() as u64;
        self.data = data;
        self
    }

    pub fn is_bss(&self) -> bool {
        self.section_type == SectionType::Bss
    }
}

impl Serializable for Section {
    fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(SECTION_ENTRY_SIZE);
        data.extend((self.section_type as u32).to_le_bytes());
        data.extend(self.flags.bits().to_le_bytes());
        data.extend(self.offset.to_le_bytes());
        data.extend(self.size.to_le_bytes());
        data.extend(self.addr.to_le_bytes());
        data.extend(self.align.to_le_bytes());
        data.extend(self.name_idx.to_le_bytes());
        data.extend(self.link.to_le_bytes());
        data.extend(self.info.to_le_bytes());
        data
    }

    fn deserialize(data: &[u8]) -> Result<(usize, Self), SerializationError> {
        if data.len() < SECTION_ENTRY_SIZE {
            return Err(SerializationError::DataTooShort);
        }
        Ok((
            SECTION_ENTRY_SIZE,
            Section {
                section_type: SectionType::try_from(read_u32(data, 0)?)?,
                flags: SectionFlags::from_bits_retain(read_u32(data, 4)?),
                offset: read_u64(data, 8)?,
                size: read_u64(data, 16)?,
                addr: read_u64(data, 24)?,
                align: read_u64(data, 32)?,
                name_idx: read_u32(data, 40)?,
                link: read_u32(data, 44)?,
                info: read_u32(data, 48)?,
                data: Vec::new(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trip() {
        let mut section = Section::new(
            SectionType::Code,
            SectionFlags::EXECUTABLE | SectionFlags::INITIALIZED | SectionFlags::ALLOC,
            16,
            7,
        );
        section.offset = 0x100;
        section.size = 32;
        section.addr = 0x4000;
        section.link = 2;
        let bytes = section.serialize();
        assert_eq!(bytes.len(), SECTION_ENTRY_SIZE);
        let (consumed, decoded) = Section::deserialize(&bytes).unwrap();
        assert_eq!(consumed, SECTION_ENTRY_SIZE);
        assert_eq!(decoded.section_type, SectionType::Code);
        assert_eq!(decoded.flags, section.flags);
        assert_eq!(decoded.offset, 0x100);
        assert_eq!(decoded.size, 32);
        assert_eq!(decoded.addr, 0x4000);
        assert_eq!(decoded.align, 16);
        assert_eq!(decoded.name_idx, 7);
        assert_eq!(decoded.link, 2);
    }

    #[test]
    fn invalid_type_is_rejected() {
        let mut bytes = Section::new(SectionType::Data, SectionFlags::WRITABLE, 8, 0).serialize();
        bytes[0] = 0xff;
        assert!(matches!(
            Section::deserialize(&bytes),
            Err(SerializationError::InvalidSectionType(0xff))
        ));
    }
}
