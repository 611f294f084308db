//! Where the live accounting file lives.
//!
//! Grid Engine installs are located by `SGE_ROOT` and `SGE_CELL`; the
//! scheduler appends to `$SGE_ROOT/$SGE_CELL/common/accounting`.

use std::path::PathBuf;

use config::{Config, ConfigError, Environment};
use tracing::debug;

use crate::error::Result;

/// Grid Engine installation paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
    pub cell: String,
}

impl Paths {
    /// Read `SGE_ROOT` and `SGE_CELL` from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_environment(Environment::with_prefix("SGE"))
    }

    /// Read the two settings from any `SGE`-prefixed environment source.
    pub fn from_environment(source: Environment) -> Result<Self> {
        let settings = Config::builder().add_source(source).build()?;
        let root = required(&settings, "root", "SGE_ROOT")?;
        let cell = required(&settings, "cell", "SGE_CELL")?;
        let paths = Paths {
            root: PathBuf::from(root),
            cell,
        };
        debug!(root = %paths.root.display(), cell = %paths.cell, "grid engine paths");
        Ok(paths)
    }

    pub fn accounting_file(&self) -> PathBuf {
        self.root.join(&self.cell).join("common").join("accounting")
    }
}

fn required(settings: &Config, key: &str, variable: &str) -> Result<String> {
    match settings.get_string(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        Ok(_) | Err(ConfigError::NotFound(_)) => {
            Err(ConfigError::NotFound(variable.to_string()).into())
        }
        Err(e) => Err(e.into()),
    }
}
