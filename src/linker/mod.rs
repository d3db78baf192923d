pub mod options;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::object_file::header::HeaderFlags;
use crate::object_file::relocation::{Relocation, RelocationType};
use crate::object_file::section::{Section, SectionFlags, SectionType};
use crate::object_file::symbol::{Symbol, SymbolBinding, SymbolType, SymbolVisibility};
use crate::object_file::ObjectFile;
use crate::serializable::SerializationError;
use self::options::{ConflictResolution, LinkScript, LinkerOptions};

#[derive(Debug)]
pub enum LinkError {
    NoInputFiles,
    ArchitectureMismatch { index: usize },
    MultipleDefinitions(String),
    UndefinedSymbol(String),
    SectionTypeMismatch(String),
    SectionFlagsMismatch(String),
    SymbolNotFound(String),
    InvalidSectionIndex { input: usize, section: u32 },
    RelocationOutOfRange(String),
    EntryPointNotFound(String),
    Serialization(SerializationError),
    Io(std::io::Error),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::NoInputFiles => write!(f, "no input files"),
            LinkError::ArchitectureMismatch { index } => {
                write!(f, "input {} has a mismatched target architecture", index)
            }
            LinkError::MultipleDefinitions(name) => {
                write!(f, "multiple strong definitions of symbol '{}'", name)
            }
            LinkError::UndefinedSymbol(name) => write!(f, "undefined symbol '{}'", name),
            LinkError::SectionTypeMismatch(name) => {
                write!(f, "section '{}' has mismatched types across inputs", name)
            }
            LinkError::SectionFlagsMismatch(name) => write!(
                f,
                "section '{}' mixes writable/executable flags across inputs",
                name
            ),
            LinkError::SymbolNotFound(name) => write!(f, "symbol not found: '{}'", name),
            LinkError::InvalidSectionIndex { input, section } => {
                write!(f, "input {} references invalid section index {}", input, section)
            }
            LinkError::RelocationOutOfRange(name) => {
                write!(f, "relocation against '{}' is out of range", name)
            }
            LinkError::EntryPointNotFound(name) => {
                write!(f, "entry point symbol '{}' not found or undefined", name)
            }
            LinkError::Serialization(e) => write!(f, "{}", e),
            LinkError::Io(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<SerializationError> for LinkError {
    fn from(e: SerializationError) -> Self {
        LinkError::Serialization(e)
    }
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        LinkError::Io(e)
    }
}

pub type LinkResult = Result<ObjectFile, LinkError>;

/// One link input: a borrowed caller-owned object plus the remap tables built
/// for it during a `link` call. Strings and sections are remapped by index;
/// symbols are resolved by name instead.
struct InputFile<'a> {
    object: &'a ObjectFile,
    string_map: HashMap<u32, u32>,
    /// local 1-based section index -> (merged section, contributor position)
    section_map: HashMap<u32, (usize, usize)>,
}

impl<'a> InputFile<'a> {
    fn new(object: &'a ObjectFile) -> Self {
        InputFile {
            object,
            string_map: HashMap::new(),
            section_map: HashMap::new(),
        }
    }
}

struct Contributor {
    input: usize,
    section: u32,
    size: u64,
    align: u64,
    /// Placement offset inside the merged section, filled once all
    /// contributors are known.
    offset: u64,
}

struct MergedSection {
    name: String,
    section_type: SectionType,
    flags: SectionFlags,
    align: u64,
    load_address: Option<u64>,
    contributors: Vec<Contributor>,
    total_size: u64,
}

struct ResolvedSymbol {
    symbol: Symbol,
    input: usize,
}

struct PendingRelocation {
    merged_idx: usize,
    offset: u64,
    symbol_name: String,
    reloc_type: RelocationType,
    addend: i64,
    eligible: bool,
    retained: bool,
}

/// Merges several object files into one output object. A `Linker` holds only
/// configuration; each `link` call borrows its inputs read-only and builds
/// all per-call state afresh, so one instance can be reused sequentially
/// (`reset` restores the default configuration). It is not safe to share one
/// instance across overlapping calls.
pub struct Linker {
    options: LinkerOptions,
    entry_point_symbol: Option<String>,
    search_dirs: Vec<PathBuf>,
    load_addresses: HashMap<String, u64>,
    binding_overrides: HashMap<String, SymbolBinding>,
    visibility_overrides: HashMap<String, SymbolVisibility>,
}

impl Linker {
    pub fn new() -> Self {
        Linker::with_options(LinkerOptions::default())
    }

    pub fn with_options(options: LinkerOptions) -> Self {
        Linker {
            options,
            entry_point_symbol: None,
            search_dirs: Vec::new(),
            load_addresses: HashMap::new(),
            binding_overrides: HashMap::new(),
            visibility_overrides: HashMap::new(),
        }
    }

    pub fn set_options(&mut self, options: LinkerOptions) {
        self.options = options;
    }

    pub fn options(&self) -> &LinkerOptions {
        &self.options
    }

    pub fn set_entry_point_symbol(&mut self, name: &str) {
        self.entry_point_symbol = Some(name.to_string());
    }

    pub fn set_section_load_address(&mut self, section: &str, address: u64) {
        self.load_addresses.insert(section.to_string(), address);
    }

    pub fn override_symbol_binding(&mut self, symbol: &str, binding: SymbolBinding) {
        self.binding_overrides.insert(symbol.to_string(), binding);
    }

    pub fn override_symbol_visibility(&mut self, symbol: &str, visibility: SymbolVisibility) {
        self.visibility_overrides
            .insert(symbol.to_string(), visibility);
    }

    pub fn add_search_dir<P: AsRef<Path>>(&mut self, dir: P) {
        self.search_dirs.push(dir.as_ref().to_path_buf());
    }

    pub fn apply_link_script(&mut self, script: LinkScript) {
        self.options = script.options;
        self.entry_point_symbol = script.entry_point;
        self.search_dirs.extend(script.search_dirs);
        self.load_addresses.extend(script.load_addresses);
        self.binding_overrides.extend(script.bindings);
        self.visibility_overrides.extend(script.visibilities);
    }

    /// Drops all configuration, restoring the defaults.
    pub fn reset(&mut self) {
        *self = Linker::new();
    }

    /// Runs the merge pipeline over the given inputs and produces the output
    /// object. The first failing stage aborts the whole link; no partial
    /// output ever escapes.
    pub fn link(&self, inputs: &[&ObjectFile]) -> LinkResult {
        self.validate_inputs(inputs)?;
        let mut output = ObjectFile::new();
        let mut ins: Vec<InputFile> = inputs.iter().map(|object| InputFile::new(object)).collect();
        self.merge_string_tables(&mut ins, &mut output);
        let resolved = self.resolve_symbols(&ins, &mut output)?;
        let merged = self.merge_sections(&mut ins)?;
        let pending = self.process_relocations(&ins, &merged, &resolved)?;
        self.generate_output(&ins, &merged, &resolved, &pending, output)
    }

    fn validate_inputs(&self, inputs: &[&ObjectFile]) -> Result<(), LinkError> {
        if inputs.is_empty() {
            return Err(LinkError::NoInputFiles);
        }
        let first = inputs[0].header();
        for (index, input) in inputs.iter().enumerate().skip(1) {
            let header = input.header();
            let matches = header.target_pu == first.target_pu
                && header.target_arch == first.target_arch
                && header.target_mode == first.target_mode;
            if !matches {
                if self.options.allow_mismatched_arch {
                    tracing::warn!(input = index, "linking objects with mismatched targets");
                } else {
                    return Err(LinkError::ArchitectureMismatch { index });
                }
            }
        }
        tracing::debug!(inputs = inputs.len(), "validated link inputs");
        Ok(())
    }

    fn merge_string_tables(&self, ins: &mut [InputFile], output: &mut ObjectFile) {
        for input in ins.iter_mut() {
            for symbol in input.object.symbols() {
                let name = input.object.symbol_name(symbol);
                let new_offset = output.add_string(&name);
                input.string_map.insert(symbol.name_idx, new_offset);
            }
            for section in input.object.sections() {
                let name = input.object.section_name(section);
                let new_offset = output.add_string(&name);
                input.string_map.insert(section.name_idx, new_offset);
            }
        }
        tracing::debug!(bytes = output.strings().len(), "merged string tables");
    }

    fn resolve_symbols(
        &self,
        ins: &[InputFile],
        output: &mut ObjectFile,
    ) -> Result<BTreeMap<String, ResolvedSymbol>, LinkError> {
        let mut by_name: BTreeMap<String, Vec<(usize, Symbol)>> = BTreeMap::new();
        for (index, input) in ins.iter().enumerate() {
            for symbol in input.object.symbols() {
                if symbol.binding == SymbolBinding::Local {
                    continue;
                }
                let name = input.object.symbol_name(symbol);
                if name.is_empty() {
                    continue;
                }
                by_name.entry(name).or_default().push((index, symbol.clone()));
            }
        }

        let mut resolved = BTreeMap::new();
        for (name, mut candidates) in by_name {
            if let Some(&binding) = self.binding_overrides.get(&name) {
                for (_, symbol) in candidates.iter_mut() {
                    symbol.binding = binding;
                }
            }
            if let Some(&visibility) = self.visibility_overrides.get(&name) {
                for (_, symbol) in candidates.iter_mut() {
                    symbol.visibility = visibility;
                }
            }

            let mut strong = Vec::new();
            let mut weak = Vec::new();
            let mut common = Vec::new();
            let mut undefined = Vec::new();
            for (index, symbol) in candidates {
                if symbol.symbol_type == SymbolType::Common {
                    common.push((index, symbol));
                } else if symbol.is_undefined() {
                    undefined.push((index, symbol));
                } else if matches!(symbol.binding, SymbolBinding::Global | SymbolBinding::Unique) {
                    strong.push((index, symbol));
                } else if symbol.binding == SymbolBinding::Weak {
                    weak.push((index, symbol));
                }
            }

            let (input, mut symbol) = if !strong.is_empty() {
                if strong.len() > 1
                    && self.options.conflict_resolution == ConflictResolution::Error
                {
                    return Err(LinkError::MultipleDefinitions(name));
                }
                // TakeFirst and TakeStrongest agree once the strongest class
                // is known: the first strong definition wins.
                strong.swap_remove(0)
            } else if !weak.is_empty() {
                weak.swap_remove(0)
            } else if !common.is_empty() {
                // Tentative definitions merge by the largest declared size.
                let mut best = 0;
                for (i, candidate) in common.iter().enumerate() {
                    if candidate.1.size > common[best].1.size {
                        best = i;
                    }
                }
                common.swap_remove(best)
            } else {
                if self.options.resolve_all_symbols && self.options.create_executable {
                    return Err(LinkError::UndefinedSymbol(name));
                }
                // Keep a single placeholder for later resolution, e.g.
                // against a shared library.
                let (index, mut symbol) = undefined.swap_remove(0);
                symbol.section_idx = 0;
                symbol.value = 0;
                symbol.size = 0;
                (index, symbol)
            };

            symbol.name_idx = match ins[input].string_map.get(&symbol.name_idx) {
                Some(&offset) => offset,
                None => output.add_string(&name),
            };
            resolved.insert(name, ResolvedSymbol { symbol, input });
        }
        tracing::debug!(symbols = resolved.len(), "resolved symbols");
        Ok(resolved)
    }

    fn merge_sections(&self, ins: &mut [InputFile]) -> Result<Vec<MergedSection>, LinkError> {
        let mut merged: Vec<MergedSection> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();

        for (index, input) in ins.iter_mut().enumerate() {
            for (pos, section) in input.object.sections().iter().enumerate() {
                let local_idx = pos as u32 + 1;
                let name = input.object.section_name(section);
                if self.options.strip_debug
                    && (name.starts_with(".debug") || name.starts_with(".comment"))
                {
                    continue;
                }
                let size = if section.is_bss() {
                    section.size
                } else {
                    section.data.len() as u64
                };
                let align = section.align.max(1);

                let merged_idx = match by_name.get(&name) {
                    Some(&merged_idx) => {
                        let entry = &mut merged[merged_idx];
                        if entry.section_type != section.section_type {
                            return Err(LinkError::SectionTypeMismatch(name));
                        }
                        let access = SectionFlags::WRITABLE | SectionFlags::EXECUTABLE;
                        if entry.flags.intersection(access) != section.flags.intersection(access) {
                            return Err(LinkError::SectionFlagsMismatch(name));
                        }
                        entry.flags |= section.flags;
                        entry.align = entry.align.max(align);
                        merged_idx
                    }
                    None => {
                        merged.push(MergedSection {
                            load_address: self.load_addresses.get(&name).copied(),
                            name: name.clone(),
                            section_type: section.section_type,
                            flags: section.flags,
                            align,
                            contributors: Vec::new(),
                            total_size: 0,
                        });
                        by_name.insert(name, merged.len() - 1);
                        merged.len() - 1
                    }
                };

                let contributor_pos = merged[merged_idx].contributors.len();
                merged[merged_idx].contributors.push(Contributor {
                    input: index,
                    section: local_idx,
                    size,
                    align,
                    offset: 0,
                });
                input.section_map.insert(local_idx, (merged_idx, contributor_pos));
            }
        }

        // Contributors are packed in input order, each one's slot rounded up
        // to its own alignment.
        for entry in &mut merged {
            let mut run = 0u64;
            for contributor in &mut entry.contributors {
                run = run.next_multiple_of(contributor.align);
                contributor.offset = run;
                run += contributor.size;
            }
            entry.total_size = run;
        }
        tracing::debug!(sections = merged.len(), "merged sections");
        Ok(merged)
    }

    fn process_relocations(
        &self,
        ins: &[InputFile],
        merged: &[MergedSection],
        resolved: &BTreeMap<String, ResolvedSymbol>,
    ) -> Result<Vec<PendingRelocation>, LinkError> {
        let mut pending = Vec::new();
        for (index, input) in ins.iter().enumerate() {
            for reloc in input.object.relocations() {
                let symbol_name = match input.object.symbol(reloc.symbol_idx) {
                    Some(symbol) => input.object.symbol_name(symbol),
                    None => {
                        return Err(LinkError::SymbolNotFound(format!(
                            "#{}",
                            reloc.symbol_idx
                        )))
                    }
                };
                let target = resolved
                    .get(&symbol_name)
                    .ok_or_else(|| LinkError::SymbolNotFound(symbol_name.clone()))?;

                let local_idx = reloc.section_index();
                let &(merged_idx, contributor_pos) =
                    input.section_map.get(&local_idx).ok_or(
                        LinkError::InvalidSectionIndex {
                            input: index,
                            section: local_idx,
                        },
                    )?;
                let slot = merged[merged_idx].contributors[contributor_pos].offset;
                let offset = slot + reloc.section_offset() as u64;

                // GOT/PLT-relative relocations are never applied directly;
                // this linker synthesizes no GOT or PLT.
                let eligible = self.options.create_executable
                    && !target.symbol.is_undefined()
                    && !matches!(
                        reloc.reloc_type,
                        RelocationType::Gotrel | RelocationType::Pltrel
                    );
                let retained = !eligible || self.options.keep_relocations;
                pending.push(PendingRelocation {
                    merged_idx,
                    offset,
                    symbol_name,
                    reloc_type: reloc.reloc_type,
                    addend: reloc.addend,
                    eligible,
                    retained,
                });
            }
        }
        let eligible = pending.iter().filter(|p| p.eligible).count();
        tracing::debug!(relocations = pending.len(), eligible, "processed relocations");
        Ok(pending)
    }

    fn generate_output(
        &self,
        ins: &[InputFile],
        merged: &[MergedSection],
        resolved: &BTreeMap<String, ResolvedSymbol>,
        pending: &[PendingRelocation],
        mut output: ObjectFile,
    ) -> LinkResult {
        {
            let first = ins[0].object.header();
            let (target_pu, target_arch, target_mode) =
                (first.target_pu, first.target_arch, first.target_mode);
            let endianness = first.endianness;
            let header = output.header_mut();
            header.target_pu = target_pu;
            header.target_arch = target_arch;
            header.target_mode = target_mode;
            header.endianness = endianness;
            if self.options.create_executable {
                header.flags.remove(HeaderFlags::RELOCATABLE);
                header.flags.insert(HeaderFlags::EXECUTABLE);
            } else if self.options.create_shared {
                header.flags.remove(HeaderFlags::RELOCATABLE);
                header.flags.insert(HeaderFlags::SHARED_OBJECT);
            }
        }

        // Merged sections, in first-seen order.
        let mut output_section_idx = Vec::with_capacity(merged.len());
        for entry in merged {
            let name_idx = output.add_string(&entry.name);
            let mut section =
                Section::new(entry.section_type, entry.flags, entry.align, name_idx);
            section.size = entry.total_size;
            section.addr = entry.load_address.unwrap_or(0);
            if entry.section_type != SectionType::Bss {
                let mut buffer = vec![0u8; entry.total_size as usize];
                for contributor in &entry.contributors {
                    let source =
                        &ins[contributor.input].object.sections()[contributor.section as usize - 1];
                    let start = contributor.offset as usize;
                    buffer[start..start + source.data.len()].copy_from_slice(&source.data);
                }
                section.data = buffer;
            }
            output_section_idx.push(output.add_section(section));
        }
        let merged_of_output: HashMap<u32, usize> = output_section_idx
            .iter()
            .enumerate()
            .map(|(merged_idx, &out_idx)| (out_idx, merged_idx))
            .collect();

        // Resolved symbols: remap the section index to the output section and
        // rebase the value by the defining contributor's slot.
        let mut symbol_index: HashMap<String, u32> = HashMap::new();
        for (name, entry) in resolved {
            let mut symbol = entry.symbol.clone();
            if symbol.section_idx != 0 {
                let input = &ins[entry.input];
                match input.section_map.get(&symbol.section_idx) {
                    Some(&(merged_idx, contributor_pos)) => {
                        symbol.value += merged[merged_idx].contributors[contributor_pos].offset;
                        symbol.section_idx = output_section_idx[merged_idx];
                    }
                    None => {
                        if (symbol.section_idx as usize) <= input.object.sections().len() {
                            // Defined inside a stripped section; goes away
                            // with it.
                            continue;
                        }
                        return Err(LinkError::InvalidSectionIndex {
                            input: entry.input,
                            section: symbol.section_idx,
                        });
                    }
                }
            }
            let idx = output.add_symbol(symbol);
            symbol_index.insert(name.clone(), idx);
        }

        if let Some(entry_name) = &self.entry_point_symbol {
            let entry_point = symbol_index
                .get(entry_name)
                .map(|&idx| &output.symbols()[idx as usize])
                .filter(|symbol| !symbol.is_undefined())
                .map(|symbol| {
                    let load = merged_of_output
                        .get(&symbol.section_idx)
                        .and_then(|&merged_idx| merged[merged_idx].load_address)
                        .unwrap_or(0);
                    symbol.value + load
                })
                .ok_or_else(|| LinkError::EntryPointNotFound(entry_name.clone()))?;
            output.header_mut().entry_point = entry_point;
        }

        let mut applied = 0usize;
        for reloc in pending {
            let out_idx = output_section_idx[reloc.merged_idx];
            let symbol_out = symbol_index
                .get(&reloc.symbol_name)
                .copied()
                .ok_or_else(|| LinkError::SymbolNotFound(reloc.symbol_name.clone()))?;
            if reloc.eligible {
                let symbol = &output.symbols()[symbol_out as usize];
                let symbol_load = merged_of_output
                    .get(&symbol.section_idx)
                    .and_then(|&merged_idx| merged[merged_idx].load_address)
                    .unwrap_or(0);
                let target_addr = symbol_load + symbol.value;
                let site_addr = merged[reloc.merged_idx]
                    .load_address
                    .unwrap_or(0)
                    .wrapping_add(reloc.offset);
                let value = target_addr.wrapping_add_signed(reloc.addend);
                let site = reloc.offset as usize;
                if let Some(section) = output.section_mut(out_idx) {
                    match reloc.reloc_type {
                        RelocationType::Abs64 => {
                            patch(&mut section.data, site, &value.to_le_bytes(), &reloc.symbol_name)?;
                        }
                        RelocationType::Abs32 => {
                            let narrow = u32::try_from(value).map_err(|_| {
                                LinkError::RelocationOutOfRange(reloc.symbol_name.clone())
                            })?;
                            patch(&mut section.data, site, &narrow.to_le_bytes(), &reloc.symbol_name)?;
                        }
                        RelocationType::Pcrel64 => {
                            let delta = value.wrapping_sub(site_addr) as i64;
                            patch(&mut section.data, site, &delta.to_le_bytes(), &reloc.symbol_name)?;
                        }
                        RelocationType::Pcrel32 => {
                            let delta = value.wrapping_sub(site_addr) as i64;
                            let narrow = i32::try_from(delta).map_err(|_| {
                                LinkError::RelocationOutOfRange(reloc.symbol_name.clone())
                            })?;
                            patch(&mut section.data, site, &narrow.to_le_bytes(), &reloc.symbol_name)?;
                        }
                        RelocationType::Gotrel | RelocationType::Pltrel => {}
                    }
                }
                applied += 1;
            }
            if reloc.retained {
                if reloc.offset > u32::MAX as u64 {
                    return Err(LinkError::RelocationOutOfRange(reloc.symbol_name.clone()));
                }
                output.add_relocation(Relocation::new(
                    out_idx,
                    reloc.offset as u32,
                    symbol_out,
                    reloc.reloc_type,
                    reloc.addend,
                ));
            }
        }

        tracing::debug!(
            sections = output.sections().len(),
            symbols = output.symbols().len(),
            relocations = output.relocations().len(),
            applied,
            "generated output object"
        );
        Ok(output)
    }

    /// Loads each input path (trying the literal path, then each configured
    /// search directory), links, and saves the result.
    pub fn link_files<P: AsRef<Path>>(
        &self,
        paths: &[P],
        output_path: impl AsRef<Path>,
    ) -> Result<(), LinkError> {
        let mut objects = Vec::with_capacity(paths.len());
        for path in paths {
            let resolved = self.resolve_path(path.as_ref())?;
            objects.push(ObjectFile::load_from_file(&resolved)?);
        }
        let refs: Vec<&ObjectFile> = objects.iter().collect();
        let mut output = self.link(&refs)?;
        output.save_to_file(output_path)?;
        Ok(())
    }

    /// Combines objects without linking them into an executable: symbols stay
    /// unresolved where necessary and relocations are kept in the output.
    pub fn merge_object_files<P: AsRef<Path>>(
        paths: &[P],
        output_path: impl AsRef<Path>,
    ) -> Result<(), LinkError> {
        let linker = Linker::with_options(LinkerOptions {
            create_executable: false,
            resolve_all_symbols: false,
            keep_relocations: true,
            ..LinkerOptions::default()
        });
        linker.link_files(paths, output_path)
    }

    fn resolve_path(&self, path: &Path) -> Result<PathBuf, LinkError> {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        for dir in &self.search_dirs {
            let candidate = dir.join(path);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(LinkError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("object file not found: {}", path.display()),
        )))
    }
}

impl Default for Linker {
    fn default() -> Self {
        Linker::new()
    }
}

fn patch(data: &mut [u8], offset: usize, bytes: &[u8], symbol: &str) -> Result<(), LinkError> {
    if offset + bytes.len() > data.len() {
        return Err(LinkError::RelocationOutOfRange(symbol.to_string()));
    }
    data[offset..offset + bytes.len()].copy_from_slice(bytes);
    Ok(())
}
