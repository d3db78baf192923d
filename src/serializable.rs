use std::fmt;

/// Errors produced while encoding or decoding a COIL container.
#[derive(Debug)]
pub enum SerializationError {
    InvalidMagic([u8; 4]),
    UnsupportedVersion(u32),
    InvalidSectionType(u32),
    InvalidSymbolType(u16),
    InvalidSymbolBinding(u16),
    InvalidSymbolVisibility(u16),
    InvalidRelocationType(u32),
    InvalidEndianness(u8),
    MissingTableOffset(&'static str),
    OffsetOutOfRange { offset: u64, len: usize },
    DataTooShort,
    Io(std::io::Error),
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::InvalidMagic(magic) => {
                write!(f, "invalid magic {:?}, expected \"COIL\"", magic)
            }
            SerializationError::UnsupportedVersion(v) => {
                write!(f, "unsupported format version {:#x}", v)
            }
            SerializationError::InvalidSectionType(v) => write!(f, "invalid section type {}", v),
            SerializationError::InvalidSymbolType(v) => write!(f, "invalid symbol type {}", v),
            SerializationError::InvalidSymbolBinding(v) => {
                write!(f, "invalid symbol binding {}", v)
            }
            SerializationError::InvalidSymbolVisibility(v) => {
                write!(f, "invalid symbol visibility {}", v)
            }
            SerializationError::InvalidRelocationType(v) => {
                write!(f, "invalid relocation type {}", v)
            }
            SerializationError::InvalidEndianness(v) => write!(f, "invalid endianness {}", v),
            SerializationError::MissingTableOffset(table) => {
                write!(f, "{} table has entries but no offset", table)
            }
            SerializationError::OffsetOutOfRange { offset, len } => {
                write!(f, "offset {} out of range for buffer of {} bytes", offset, len)
            }
            SerializationError::DataTooShort => write!(f, "data too short"),
            SerializationError::Io(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for SerializationError {}

impl From<std::io::Error> for SerializationError {
    fn from(e: std::io::Error) -> Self {
        SerializationError::Io(e)
    }
}

/// Encoding and decoding of a fixed-layout record. All multi-byte fields are
/// little-endian regardless of the host; `deserialize` returns the number of
/// bytes consumed alongside the decoded value.
pub trait Serializable: Sized {
    fn serialize(&self) -> Vec<u8>;
    fn deserialize(data: &[u8]) -> Result<(usize, Self), SerializationError>;
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> Result<u16, SerializationError> {
    if data.len() < offset + 2 {
        return Err(SerializationError::DataTooShort);
    }
    Ok(u16::from_le_bytes([data[offset], data[offset + 1]]))
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32, SerializationError> {
    if data.len() < offset + 4 {
        return Err(SerializationError::DataTooShort);
    }
    Ok(u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ]))
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> Result<u64, SerializationError> {
    if data.len() < offset + 8 {
        return Err(SerializationError::DataTooShort);
    }
    Ok(u64::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
        data[offset + 4],
        data[offset + 5],
        data[offset + 6],
        data[offset + 7],
    ]))
}

pub(crate) fn read_i64(data: &[u8], offset: usize) -> Result<i64, SerializationError> {
    Ok(read_u64(data, offset)? as i64)
}
