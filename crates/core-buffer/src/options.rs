//! Per-buffer option schema.
//!
//! Buffers carry a fixed schema of named options: identity (filename,
//! buffer name, numeric id), the line/char counters, lifecycle flags, tab
//! settings, and the undo retention count. The command layer addresses
//! options by name (or abbreviation) through [`BufferOptions::get`] and
//! [`BufferOptions::set`]; the engine itself uses the typed fields
//! directly. New buffers inherit the inheritable subset from the reserved
//! default-options buffer.

use bitflags::bitflags;
use std::path::PathBuf;

bitflags! {
    /// Metadata attached to each option slot.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OptFlags: u8 {
        /// Not shown by option listings unless explicitly requested.
        const HIDDEN = 1;
        /// Maintained by the engine; the command layer may read but not
        /// assign it.
        const LOCKED = 2;
        /// Excluded from default-value inheritance.
        const NO_DEFAULT = 4;
    }
}

const HL: OptFlags = OptFlags::HIDDEN.union(OptFlags::LOCKED);
const HN: OptFlags = OptFlags::HIDDEN.union(OptFlags::NO_DEFAULT);

/// One row of the option schema: long name, abbreviation, metadata.
#[derive(Debug, Clone, Copy)]
pub struct OptDesc {
    pub name: &'static str,
    pub abbrev: &'static str,
    pub flags: OptFlags,
}

/// The fixed option schema, in listing order.
pub const SCHEMA: &[OptDesc] = &[
    OptDesc { name: "filename", abbrev: "file", flags: OptFlags::HIDDEN },
    OptDesc { name: "bufname", abbrev: "buffer", flags: HL },
    OptDesc { name: "bufid", abbrev: "bufferid", flags: HL },
    OptDesc { name: "buflines", abbrev: "bl", flags: HL },
    OptDesc { name: "bufchars", abbrev: "bc", flags: HL },
    OptDesc { name: "retain", abbrev: "ret", flags: OptFlags::empty() },
    OptDesc { name: "modified", abbrev: "mod", flags: HN },
    OptDesc { name: "edited", abbrev: "samename", flags: HN },
    OptDesc { name: "newfile", abbrev: "new", flags: HN },
    OptDesc { name: "readonly", abbrev: "ro", flags: OptFlags::empty() },
    OptDesc { name: "internal", abbrev: "internal", flags: HL },
    OptDesc { name: "tabstop", abbrev: "ts", flags: OptFlags::empty() },
    OptDesc { name: "shiftwidth", abbrev: "sw", flags: OptFlags::empty() },
    OptDesc { name: "undolevels", abbrev: "ul", flags: OptFlags::empty() },
    OptDesc { name: "textwidth", abbrev: "tw", flags: OptFlags::empty() },
    OptDesc { name: "locked", abbrev: "lock", flags: OptFlags::HIDDEN },
    OptDesc { name: "partiallastline", abbrev: "pll", flags: HN },
];

/// A dynamically-typed option value for name-based access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptValue {
    Bool(bool),
    Num(i64),
    Str(String),
}

/// Failure from name-based option assignment.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OptError {
    #[error("unknown option: {0}")]
    Unknown(String),
    #[error("option {0} is locked")]
    Locked(String),
    #[error("option {0}: wrong value type")]
    WrongType(String),
}

/// The option values of one buffer.
#[derive(Debug, Clone)]
pub struct BufferOptions {
    pub filename: Option<PathBuf>,
    pub bufname: String,
    /// Unique numeric id; 0 for internal buffers (which are never
    /// addressable by id).
    pub bufid: i64,
    pub buflines: usize,
    pub bufchars: usize,
    /// Keep the buffer loaded when its last viewer leaves.
    pub retain: bool,
    pub modified: bool,
    /// The buffer has been edited under its own filename (as opposed to
    /// holding text loaded from elsewhere).
    pub edited: bool,
    pub newfile: bool,
    pub readonly: bool,
    pub internal: bool,
    pub tabstop: u16,
    pub shiftwidth: u16,
    /// Undo retention cap. 0 selects oscillate behavior; trimming always
    /// keeps at least one snapshot.
    pub undolevels: usize,
    pub textwidth: usize,
    pub locked: bool,
    pub partial_last_line: bool,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            filename: None,
            bufname: String::new(),
            bufid: 0,
            buflines: 0,
            bufchars: 0,
            retain: false,
            modified: false,
            edited: false,
            newfile: false,
            readonly: false,
            internal: false,
            tabstop: 8,
            shiftwidth: 8,
            undolevels: 1,
            textwidth: 0,
            locked: false,
            partial_last_line: false,
        }
    }
}

impl BufferOptions {
    /// Copy the inheritable subset from the default-options buffer.
    /// Identity, counters, and lifecycle flags are never inherited.
    pub fn inherit_from(&mut self, defaults: &BufferOptions) {
        self.retain = defaults.retain;
        self.readonly = defaults.readonly;
        self.tabstop = defaults.tabstop;
        self.shiftwidth = defaults.shiftwidth;
        self.undolevels = defaults.undolevels;
        self.textwidth = defaults.textwidth;
        self.locked = defaults.locked;
    }

    /// Schema metadata for `name` (long or abbreviated).
    pub fn describe(name: &str) -> Option<&'static OptDesc> {
        SCHEMA
            .iter()
            .find(|d| d.name == name || d.abbrev == name)
    }

    /// Read an option by name or abbreviation.
    pub fn get(&self, name: &str) -> Option<OptValue> {
        let desc = Self::describe(name)?;
        let v = match desc.name {
            "filename" => OptValue::Str(
                self.filename
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
            "bufname" => OptValue::Str(self.bufname.clone()),
            "bufid" => OptValue::Num(self.bufid),
            "buflines" => OptValue::Num(self.buflines as i64),
            "bufchars" => OptValue::Num(self.bufchars as i64),
            "retain" => OptValue::Bool(self.retain),
            "modified" => OptValue::Bool(self.modified),
            "edited" => OptValue::Bool(self.edited),
            "newfile" => OptValue::Bool(self.newfile),
            "readonly" => OptValue::Bool(self.readonly),
            "internal" => OptValue::Bool(self.internal),
            "tabstop" => OptValue::Num(self.tabstop as i64),
            "shiftwidth" => OptValue::Num(self.shiftwidth as i64),
            "undolevels" => OptValue::Num(self.undolevels as i64),
            "textwidth" => OptValue::Num(self.textwidth as i64),
            "locked" => OptValue::Bool(self.locked),
            "partiallastline" => OptValue::Bool(self.partial_last_line),
            _ => unreachable!("schema covers every name"),
        };
        Some(v)
    }

    /// Assign an option by name or abbreviation, honoring locked slots.
    pub fn set(&mut self, name: &str, value: OptValue) -> Result<(), OptError> {
        let desc =
            Self::describe(name).ok_or_else(|| OptError::Unknown(name.to_string()))?;
        if desc.flags.contains(OptFlags::LOCKED) {
            return Err(OptError::Locked(desc.name.to_string()));
        }
        let wrong = || OptError::WrongType(desc.name.to_string());
        match desc.name {
            "filename" => match value {
                OptValue::Str(s) if s.is_empty() => self.filename = None,
                OptValue::Str(s) => self.filename = Some(PathBuf::from(s)),
                _ => return Err(wrong()),
            },
            "retain" => self.retain = value.as_bool().ok_or_else(wrong)?,
            "modified" => self.modified = value.as_bool().ok_or_else(wrong)?,
            "edited" => self.edited = value.as_bool().ok_or_else(wrong)?,
            "newfile" => self.newfile = value.as_bool().ok_or_else(wrong)?,
            "readonly" => self.readonly = value.as_bool().ok_or_else(wrong)?,
            "tabstop" => self.tabstop = value.as_num().ok_or_else(wrong)? as u16,
            "shiftwidth" => self.shiftwidth = value.as_num().ok_or_else(wrong)? as u16,
            "undolevels" => {
                self.undolevels = value.as_num().ok_or_else(wrong)?.max(0) as usize
            }
            "textwidth" => self.textwidth = value.as_num().ok_or_else(wrong)?.max(0) as usize,
            "locked" => self.locked = value.as_bool().ok_or_else(wrong)?,
            "partiallastline" => self.partial_last_line = value.as_bool().ok_or_else(wrong)?,
            other => return Err(OptError::Locked(other.to_string())),
        }
        Ok(())
    }
}

impl OptValue {
    fn as_bool(&self) -> Option<bool> {
        match self {
            OptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
    fn as_num(&self) -> Option<i64> {
        match self {
            OptValue::Num(n) => Some(*n),
            _ => None,
        }
    }
}
