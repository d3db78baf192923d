use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::object_file::symbol::{SymbolBinding, SymbolVisibility};

/// What to do when several strong definitions of one symbol collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictResolution {
    #[default]
    Error,
    TakeFirst,
    TakeStrongest,
}

#[derive(Debug, Clone)]
pub struct LinkerOptions {
    pub create_executable: bool,
    pub create_shared: bool,
    pub resolve_all_symbols: bool,
    pub keep_relocations: bool,
    pub strip_debug: bool,
    pub allow_mismatched_arch: bool,
    pub conflict_resolution: ConflictResolution,
}

impl Default for LinkerOptions {
    fn default() -> Self {
        LinkerOptions {
            create_executable: false,
            create_shared: false,
            resolve_all_symbols: true,
            keep_relocations: false,
            strip_debug: false,
            allow_mismatched_arch: false,
            conflict_resolution: ConflictResolution::Error,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Link configuration as it appears in a YAML file, before validation.
#[derive(Debug, Deserialize)]
pub struct RawLinkScript {
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub executable: bool,
    #[serde(default)]
    pub shared: bool,
    #[serde(default = "default_true")]
    pub resolve_all_symbols: bool,
    #[serde(default)]
    pub keep_relocations: bool,
    #[serde(default)]
    pub strip_debug: bool,
    #[serde(default)]
    pub allow_mismatched_arch: bool,
    #[serde(default)]
    pub conflict_resolution: Option<String>,
    #[serde(default)]
    pub search_dirs: Vec<String>,
    #[serde(default)]
    pub load_addresses: HashMap<String, u64>,
    #[serde(default)]
    pub bindings: HashMap<String, String>,
    #[serde(default)]
    pub visibilities: HashMap<String, String>,
}

impl RawLinkScript {
    pub fn from_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }
}

/// Validated link configuration.
#[derive(Debug, Clone)]
pub struct LinkScript {
    pub options: LinkerOptions,
    pub entry_point: Option<String>,
    pub search_dirs: Vec<PathBuf>,
    pub load_addresses: HashMap<String, u64>,
    pub bindings: HashMap<String, SymbolBinding>,
    pub visibilities: HashMap<String, SymbolVisibility>,
}

fn parse_binding(name: &str) -> Result<SymbolBinding, String> {
    match name {
        "local" => Ok(SymbolBinding::Local),
        "global" => Ok(SymbolBinding::Global),
        "weak" => Ok(SymbolBinding::Weak),
        "unique" => Ok(SymbolBinding::Unique),
        other => Err(format!("Unknown symbol binding: {}", other)),
    }
}

fn parse_visibility(name: &str) -> Result<SymbolVisibility, String> {
    match name {
        "default" => Ok(SymbolVisibility::Default),
        "internal" => Ok(SymbolVisibility::Internal),
        "hidden" => Ok(SymbolVisibility::Hidden),
        "protected" => Ok(SymbolVisibility::Protected),
        other => Err(format!("Unknown symbol visibility: {}", other)),
    }
}

fn parse_policy(name: &str) -> Result<ConflictResolution, String> {
    match name {
        "error" => Ok(ConflictResolution::Error),
        "take-first" => Ok(ConflictResolution::TakeFirst),
        "take-strongest" => Ok(ConflictResolution::TakeStrongest),
        other => Err(format!("Unknown conflict resolution policy: {}", other)),
    }
}

impl TryFrom<RawLinkScript> for LinkScript {
    type Error = String;

    fn try_from(raw: RawLinkScript) -> Result<Self, Self::Error> {
        if raw.executable && raw.shared {
            return Err("A link cannot produce both an executable and a shared object".to_string());
        }
        let conflict_resolution = match &raw.conflict_resolution {
            Some(name) => parse_policy(name)?,
            None => ConflictResolution::Error,
        };
        let bindings = raw
            .bindings
            .into_iter()
            .map(|(symbol, binding)| Ok((symbol, parse_binding(&binding)?)))
            .collect::<Result<HashMap<_, _>, String>>()?;
        let visibilities = raw
            .visibilities
            .into_iter()
            .map(|(symbol, visibility)| Ok((symbol, parse_visibility(&visibility)?)))
            .collect::<Result<HashMap<_, _>, String>>()?;

        Ok(LinkScript {
            options: LinkerOptions {
                create_executable: raw.executable,
                create_shared: raw.shared,
                resolve_all_symbols: raw.resolve_all_symbols,
                keep_relocations: raw.keep_relocations,
                strip_debug: raw.strip_debug,
                allow_mismatched_arch: raw.allow_mismatched_arch,
                conflict_resolution,
            },
            entry_point: raw.entry_point,
            search_dirs: raw.search_dirs.into_iter().map(PathBuf::from).collect(),
            load_addresses: raw.load_addresses,
            bindings,
            visibilities,
        })
    }
}

impl TryFrom<String> for LinkScript {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let raw = RawLinkScript::from_str(&s).map_err(|e| format!("Failed to parse YAML: {}", e))?;
        LinkScript::try_from(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_script() {
        let script = LinkScript::try_from(
            r#"
entry_point: main
executable: true
strip_debug: true
conflict_resolution: take-first
search_dirs:
  - /usr/lib/coil
load_addresses:
  .text: 0x1000
bindings:
  helper: weak
visibilities:
  internal_state: hidden
"#
            .to_string(),
        )
        .unwrap();
        assert_eq!(script.entry_point.as_deref(), Some("main"));
        assert!(script.options.create_executable);
        assert!(script.options.strip_debug);
        assert!(script.options.resolve_all_symbols);
        assert_eq!(
            script.options.conflict_resolution,
            ConflictResolution::TakeFirst
        );
        assert_eq!(script.load_addresses[".text"], 0x1000);
        assert_eq!(script.bindings["helper"], SymbolBinding::Weak);
        assert_eq!(
            script.visibilities["internal_state"],
            SymbolVisibility::Hidden
        );
    }

    #[test]
    fn defaults_resolve_all_symbols() {
        let script = LinkScript::try_from("executable: true".to_string()).unwrap();
        assert!(script.options.resolve_all_symbols);
        assert!(!script.options.keep_relocations);
    }

    #[test]
    fn rejects_executable_and_shared() {
        let err = LinkScript::try_from("executable: true\nshared: true".to_string()).unwrap_err();
        assert!(err.contains("both"));
    }

    #[test]
    fn rejects_unknown_binding() {
        let err =
            LinkScript::try_from("bindings:\n  foo: strongest".to_string()).unwrap_err();
        assert!(err.contains("Unknown symbol binding"));
    }

    #[test]
    fn rejects_unknown_policy() {
        let err =
            LinkScript::try_from("conflict_resolution: panic".to_string()).unwrap_err();
        assert!(err.contains("Unknown conflict resolution policy"));
    }
}
