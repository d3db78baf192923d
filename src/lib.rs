pub mod linker;
pub mod object_file;
pub mod serializable;

pub use linker::options::{ConflictResolution, LinkScript, LinkerOptions, RawLinkScript};
pub use linker::{LinkError, LinkResult, Linker};
pub use object_file::header::{HeaderFlags, ObjectHeader};
pub use object_file::relocation::{Relocation, RelocationType};
pub use object_file::section::{Section, SectionFlags, SectionType};
pub use object_file::string_table::StringTable;
pub use object_file::symbol::{Symbol, SymbolBinding, SymbolType, SymbolVisibility};
pub use object_file::ObjectFile;
pub use serializable::{Serializable, SerializationError};
