//! Merging of the configuration layers into one effective config.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::CorkboardConfig;

/// The TOML files read from the project directory, weakest first. The
/// `.local` file is meant to stay out of version control.
const LAYER_FILES: [&str; 2] = ["corkboard.toml", "corkboard.local.toml"];

/// Assembles a [`CorkboardConfig`] for one project directory.
///
/// Every tunable starts at its built-in default; each layer that is
/// present overrides the ones beneath it, ending with `CORKBOARD_*`
/// environment variables on top. A layer file that is absent is simply
/// skipped — only a file that exists and fails to parse is an error.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// A loader rooted at the current directory with the `CORKBOARD`
    /// environment prefix.
    pub fn new() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            env_prefix: "CORKBOARD".to_string(),
        }
    }

    /// Roots the loader at a different project directory (the binary's
    /// `--config-dir` flag lands here).
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Replaces the environment prefix. Useful when several deployments
    /// share one shell environment.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Merges defaults, layer files, and environment into the effective
    /// configuration.
    pub fn load(self) -> Result<CorkboardConfig> {
        let mut merged = config::Config::builder()
            .add_source(config::Config::try_from(&CorkboardConfig::default())?);

        for name in LAYER_FILES {
            let path = self.project_dir.join(name);
            if !path.exists() {
                continue;
            }
            merged = merged.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }

        merged = merged.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        let settings = merged.build().with_context(|| {
            format!(
                "could not merge the configuration under {}",
                self.project_dir.display()
            )
        })?;
        settings
            .try_deserialize()
            .context("configuration does not match the expected sections")
    }

    /// Like [`load`](Self::load), but any failure falls back to the
    /// built-in defaults.
    pub fn load_or_default(self) -> CorkboardConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
