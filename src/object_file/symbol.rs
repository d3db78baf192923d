use crate::serializable::{read_u16, read_u32, read_u64, Serializable, SerializationError};

/// Wire size of a symbol table entry.
pub const SYMBOL_ENTRY_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SymbolType {
    NoType = 0,
    Function = 1,
    Data = 2,
    Section = 3,
    File = 4,
    Common = 5,
    Tls = 6,
}

impl TryFrom<u16> for SymbolType {
    type Error = SerializationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SymbolType::NoType),
            1 => Ok(SymbolType::Function),
            2 => Ok(SymbolType::Data),
            3 => Ok(SymbolType::Section),
            4 => Ok(SymbolType::File),
            5 => Ok(SymbolType::Common),
            6 => Ok(SymbolType::Tls),
            v => Err(SerializationError::InvalidSymbolType(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SymbolBinding {
    Local = 0,
    Global = 1,
    Weak = 2,
    Unique = 3,
}

impl TryFrom<u16> for SymbolBinding {
    type Error = SerializationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SymbolBinding::Local),
            1 => Ok(SymbolBinding::Global),
            2 => Ok(SymbolBinding::Weak),
            3 => Ok(SymbolBinding::Unique),
            v => Err(SerializationError::InvalidSymbolBinding(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SymbolVisibility {
    Default = 0,
    Internal = 1,
    Hidden = 2,
    Protected = 3,
}

impl TryFrom<u16> for SymbolVisibility {
    type Error = SerializationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SymbolVisibility::Default),
            1 => Ok(SymbolVisibility::Internal),
            2 => Ok(SymbolVisibility::Hidden),
            3 => Ok(SymbolVisibility::Protected),
            v => Err(SerializationError::InvalidSymbolVisibility(v)),
        }
    }
}

/// A named reference into a section. `section_idx` is 1-based; 0 means the
/// symbol is undefined. LOCAL symbols are file-private and never take part in
/// cross-file resolution.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name_idx: u32,
    pub section_idx: u32,
    pub value: u64,
    pub size: u64,
    pub symbol_type: SymbolType,
    pub binding: SymbolBinding,
    pub visibility: SymbolVisibility,
}

impl Symbol {
    pub fn new(name_idx: u32, section_idx: u32, value: u64) -> Self {
        Symbol {
            name_idx,
            section_idx,
            value,
            size: 0,
            symbol_type: SymbolType::NoType,
            binding: SymbolBinding::Local,
            visibility: SymbolVisibility::Default,
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.section_idx == 0
    }
}

impl Serializable for Symbol {
    fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(SYMBOL_ENTRY_SIZE);
        data.extend(self.name_idx.to_le_bytes());
        data.extend(self.section_idx.to_le_bytes());
        data.extend(self.value.to_le_bytes());
        data.extend(self.size.to_le_bytes());
        data.extend((self.symbol_type as u16).to_le_bytes());
        data.extend((self.binding as u16).to_le_bytes());
        data.extend((self.visibility as u16).to_le_bytes());
        data.extend(0u16.to_le_bytes());
        data
    }

    fn deserialize(data: &[u8]) -> Result<(usize, Self), SerializationError> {
        if data.len() < SYMBOL_ENTRY_SIZE {
            return Err(SerializationError::DataTooShort);
        }
        Ok((
            SYMBOL_ENTRY_SIZE,
            Symbol {
                name_idx: read_u32(data, 0)?,
                section_idx: read_u32(data, 4)?,
                value: read_u64(data, 8)?,
                size: read_u64(data, 16)?,
                symbol_type: SymbolType::try_from(read_u16(data, 24)?)?,
                binding: SymbolBinding::try_from(read_u16(data, 26)?)?,
                visibility: SymbolVisibility::try_from(read_u16(data, 28)?)?,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trip() {
        let mut symbol = Symbol::new(12, 1, 0x40);
        symbol.size = 24;
        symbol.symbol_type = SymbolType::Function;
        symbol.binding = SymbolBinding::Global;
        symbol.visibility = SymbolVisibility::Hidden;
        let bytes = symbol.serialize();
        assert_eq!(bytes.len(), SYMBOL_ENTRY_SIZE);
        let (consumed, decoded) = Symbol::deserialize(&bytes).unwrap();
        assert_eq!(consumed, SYMBOL_ENTRY_SIZE);
        assert_eq!(decoded.name_idx, 12);
        assert_eq!(decoded.section_idx, 1);
        assert_eq!(decoded.value, 0x40);
        assert_eq!(decoded.size, 24);
        assert_eq!(decoded.symbol_type, SymbolType::Function);
        assert_eq!(decoded.binding, SymbolBinding::Global);
        assert_eq!(decoded.visibility, SymbolVisibility::Hidden);
    }

    #[test]
    fn invalid_binding_is_rejected() {
        let mut bytes = Symbol::new(0, 0, 0).serialize();
        bytes[26] = 9;
        assert!(matches!(
            Symbol::deserialize(&bytes),
            Err(SerializationError::InvalidSymbolBinding(9))
        ));
    }
}
