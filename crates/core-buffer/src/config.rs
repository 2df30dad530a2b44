//! Defaults-file loading and parsing.
//!
//! Parses `palimpsest.toml` (or an override path supplied by the host)
//! extracting the `[options]` table of default option values for new
//! buffers. Unknown fields are ignored (TOML deserialization tolerance) so
//! the file format can grow without breaking older engines. A missing file
//! yields built-in defaults.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::info;

use crate::options::BufferOptions;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct OptionsTable {
    #[serde(default)]
    pub tabstop: Option<u16>,
    #[serde(default)]
    pub shiftwidth: Option<u16>,
    #[serde(default)]
    pub undolevels: Option<usize>,
    #[serde(default)]
    pub textwidth: Option<usize>,
    #[serde(default)]
    pub retain: Option<bool>,
    #[serde(default)]
    pub readonly: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub options: OptionsTable,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>, // original file string (optional)
    pub file: ConfigFile,    // parsed (or default) data
}

/// Best-effort config path following platform conventions (local file
/// first, then XDG / AppData Roaming).
pub fn discover() -> PathBuf {
    let local = PathBuf::from("palimpsest.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("palimpsest").join("palimpsest.toml");
    }
    PathBuf::from("palimpsest.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                info!(target: "buffer.config", path = %path.display(), "loaded defaults file");
                Ok(Config {
                    raw: Some(content),
                    file,
                })
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to parse {}: {e}",
                path.display()
            )),
        }
    } else {
        Ok(Config::default())
    }
}

impl Config {
    /// Fold the parsed defaults into the default-options buffer's options.
    pub fn apply_to(&self, opts: &mut BufferOptions) {
        let t = &self.file.options;
        if let Some(v) = t.tabstop {
            opts.tabstop = v;
        }
        if let Some(v) = t.shiftwidth {
            opts.shiftwidth = v;
        }
        if let Some(v) = t.undolevels {
            opts.undolevels = v;
        }
        if let Some(v) = t.textwidth {
            opts.textwidth = v;
        }
        if let Some(v) = t.retain {
            opts.retain = v;
        }
        if let Some(v) = t.readonly {
            opts.readonly = v;
        }
    }
}
