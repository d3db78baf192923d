use std::collections::HashMap;

/// Interning pool of null-terminated strings. Offset 0 is always the empty
/// string, and every offset handed out by `add` stays valid for the lifetime
/// of the table.
#[derive(Debug, Clone)]
pub struct StringTable {
    bytes: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl StringTable {
    pub fn new() -> Self {
        let mut offsets = HashMap::new();
        offsets.insert(String::new(), 0);
        StringTable {
            bytes: vec![0],
            offsets,
        }
    }

    /// Returns the existing offset if `s` was already interned, otherwise
    /// appends `s` plus a null terminator and returns the fresh offset.
    pub fn add(&mut self, s: &str) -> u32 {
        if let Some(&offset) = self.offsets.get(s) {
            return offset;
        }
        let offset = self.bytes.len() as u32;
        self.bytes.extend(s.as_bytes());
        self.bytes.push(0);
        self.offsets.insert(s.to_string(), offset);
        offset
    }

    /// Reads the string starting at `offset`. Out-of-range offsets yield the
    /// empty string rather than an error.
    pub fn get(&self, offset: u32) -> String {
        let start = offset as usize;
        if start >= self.bytes.len() {
            return String::new();
        }
        let end = self.bytes[start..]
            .iter()
            .position(|&b| b == 0)
            .map_or(self.bytes.len(), |pos| start + pos);
        String::from_utf8_lossy(&self.bytes[start..end]).into_owned()
    }

    pub fn offset_of(&self, s: &str) -> Option<u32> {
        self.offsets.get(s).copied()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Rebuilds a table from a raw byte span by scanning null-delimited runs.
    /// Position 0 always counts as a run start. When the same name occurs at
    /// several offsets the first occurrence wins, so genuine table entries are
    /// never shadowed by stray bytes later in the span.
    pub fn from_bytes(span: &[u8]) -> Self {
        let mut offsets = HashMap::new();
        let mut start = 0usize;
        for (pos, &byte) in span.iter().enumerate() {
            if byte == 0 {
                let name = String::from_utf8_lossy(&span[start..pos]).into_owned();
                offsets.entry(name).or_insert(start as u32);
                start = pos + 1;
            }
        }
        // A trailing run without a terminator is not a valid name.
        let mut bytes = span.to_vec();
        if bytes.is_empty() {
            bytes.push(0);
            offsets.insert(String::new(), 0);
        }
        StringTable { bytes, offsets }
    }
}

impl Default for StringTable {
    fn default() -> Self {
        StringTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_offset_zero() {
        let mut table = StringTable::new();
        assert_eq!(table.add(""), 0);
        assert_eq!(table.get(0), "");
    }

    #[test]
    fn add_is_idempotent() {
        let mut table = StringTable::new();
        let first = table.add("main");
        let second = table.add("main");
        assert_eq!(first, second);
        assert_eq!(table.get(first), "main");
    }

    #[test]
    fn get_out_of_range_is_empty() {
        let table = StringTable::new();
        assert_eq!(table.get(1000), "");
    }

    #[test]
    fn from_bytes_first_occurrence_wins() {
        // "main" appears again later in the span, as it would if section
        // payload bytes followed the real table.
        let mut span = Vec::new();
        span.push(0);
        span.extend(b"main\0helper\0");
        let real = 1u32;
        span.extend(b"main\0");
        let table = StringTable::from_bytes(&span);
        assert_eq!(table.offset_of("main"), Some(real));
        assert_eq!(table.get(real), "main");
        assert_eq!(table.offset_of("helper"), Some(6));
    }

    #[test]
    fn from_bytes_round_trips_add() {
        let mut table = StringTable::new();
        let text = table.add(".text");
        let data = table.add(".data");
        let rebuilt = StringTable::from_bytes(table.bytes());
        assert_eq!(rebuilt.offset_of(".text"), Some(text));
        assert_eq!(rebuilt.offset_of(".data"), Some(data));
        assert_eq!(rebuilt.get(data), ".data");
    }
}
