//! Banks and patches as loaded from TOML.
//!
//! ```toml
//! [names]
//! drums = "10"
//!
//! [[rules]]
//! type = "note"
//! chan = "drums"
//!
//! [patches.piano]
//! rules = [{ type = "cc=cc", chan = 1, num = 7 }]
//!
//! [patches.piano.players.beat]
//! type = "sequence"
//! patterns = [[["note:10:36:100", "_"]]]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compiler::RuleSpec;
use crate::error::{Error, Result};
use crate::players::PlayerDef;

/// One selectable setup: its rules and its players.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Patch {
    pub rules: Vec<RuleSpec>,
    pub players: BTreeMap<String, PlayerDef>,
}

/// A collection of patches sharing names and bank-wide rules.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Bank {
    pub names: HashMap<String, String>,
    /// Installed with every patch.
    pub rules: Vec<RuleSpec>,
    pub patches: BTreeMap<String, Patch>,
}

impl Bank {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn patch(&self, name: &str) -> Result<&Patch> {
        self.patches
            .get(name)
            .ok_or_else(|| Error::Config(format!("no patch named '{}'", name)))
    }

    pub fn patch_names(&self) -> impl Iterator<Item = &str> {
        self.patches.keys().map(String::as_str)
    }
}
