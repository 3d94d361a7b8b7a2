//! Layered configuration sources for a Braid runtime.
//!
//! Sources are merged in this order, each one overriding the previous:
//!
//! 1. [`BraidConfig::default`]
//! 2. `braid.<profile>.<ext>` next to the base file, if present
//! 3. the base file (`braid.<ext>` or `config.<ext>`)
//! 4. `BRAID_*` environment variables
//! 5. values passed to [`ConfigLoader::merge`]
//!
//! Which extensions are searched depends on the `toml-config` and
//! `yaml-config` features. Without either, only defaults, the environment
//! and explicit merges apply.
//!
//! Nested keys are addressed in the environment with `__`, e.g.
//! `BRAID_DISPATCH__STRATEGY=round-robin` or
//! `BRAID_COMPONENTS__CACHE__CAPACITY=64`.
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .profile("prod")
//!     .search_path("/etc/braid")
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::BraidConfig;

/// Environment variable prefix.
const ENV_PREFIX: &str = "BRAID_";

/// Variable that selects the profile when none is set explicitly.
const PROFILE_VAR: &str = "BRAID_PROFILE";

/// Deployment profile; selects the `braid.<profile>.*` overlay file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Profile::Development => "development",
            Profile::Production => "production",
            Profile::Custom(custom) => custom.as_str(),
        }
    }

    /// Reads `BRAID_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }

    fn parse(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "prod" | "production" => Profile::Production,
            "dev" | "development" => Profile::Development,
            _ => Profile::Custom(name),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A config file syntax the loader can read.
#[derive(Clone, Copy)]
struct FileFormat {
    extensions: &'static [&'static str],
    base_names: &'static [&'static str],
    provider: fn(&Path) -> Figment,
}

impl FileFormat {
    fn merge_into(&self, figment: Figment, path: &Path) -> Figment {
        figment.merge((self.provider)(path))
    }
}

/// Formats compiled into this build, in search order.
fn enabled_formats() -> Vec<FileFormat> {
    #[allow(unused_mut)]
    let mut formats = Vec::new();
    #[cfg(feature = "toml-config")]
    formats.push(FileFormat {
        extensions: &["toml"],
        base_names: &["braid.toml", "config.toml"],
        provider: |path| Figment::from(Toml::file(path)),
    });
    #[cfg(feature = "yaml-config")]
    formats.push(FileFormat {
        extensions: &["yaml", "yml"],
        base_names: &["braid.yaml", "braid.yml", "config.yaml", "config.yml"],
        provider: |path| Figment::from(Yaml::file(path)),
    });
    formats
}

/// Builder that assembles a [`BraidConfig`] from files, environment and
/// explicit overrides.
pub struct ConfigLoader {
    profile: Profile,
    /// An explicit file disables directory search.
    explicit_file: Option<PathBuf>,
    directories: Vec<PathBuf>,
    read_env: bool,
    overrides: Figment,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Starts with the profile from `BRAID_PROFILE` and environment reading on.
    pub fn new() -> Self {
        Self {
            profile: Profile::from_env(),
            explicit_file: None,
            directories: Vec::new(),
            read_env: true,
            overrides: Figment::new(),
        }
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Appends a directory to search. When none are given the current
    /// directory and `<user config dir>/braid` are used.
    pub fn search_path(mut self, dir: impl AsRef<Path>) -> Self {
        self.directories.push(dir.as_ref().into());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join("braid")),
            None => self,
        }
    }

    /// Reads exactly `path`; a missing file is an error.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.explicit_file = Some(path.as_ref().into());
        self
    }

    pub fn with_env(self) -> Self {
        self.env(true)
    }

    pub fn without_env(self) -> Self {
        self.env(false)
    }

    fn env(mut self, enabled: bool) -> Self {
        self.read_env = enabled;
        self
    }

    /// Layers `config` over every other source.
    pub fn merge(mut self, config: BraidConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    pub fn load(self) -> ConfigResult<BraidConfig> {
        let profile = self.profile.clone();
        let config: BraidConfig = self.into_figment()?.extract()?;

        debug!(
            %profile,
            level = %config.logging.level,
            strategy = %config.dispatch.strategy,
            components = config.components.len(),
            "Configuration resolved"
        );
        Ok(config)
    }

    fn into_figment(self) -> ConfigResult<Figment> {
        let defaults = Figment::from(Serialized::defaults(BraidConfig::default()));

        let mut figment = match &self.explicit_file {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::FileNotFound(path.clone()));
                }
                info!(path = %path.display(), "Reading configuration file");
                merge_config_file(defaults, path)?
            }
            None => self.merge_discovered(defaults),
        };

        if self.read_env {
            trace!(prefix = ENV_PREFIX, "Reading environment overrides");
            let env = Env::prefixed(ENV_PREFIX).split("__").ignore(&["profile"]);
            figment = figment.merge(env);
        }

        Ok(figment.merge(self.overrides))
    }

    fn directories(&self) -> Vec<PathBuf> {
        if !self.directories.is_empty() {
            return self.directories.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join("braid")))
            .collect()
    }

    /// Each format contributes at most one base file: the first one found
    /// across `directories × base_names`, preceded by its profile overlay.
    fn merge_discovered(&self, mut figment: Figment) -> Figment {
        let directories = self.directories();
        let mut loaded = 0usize;

        for format in enabled_formats() {
            let (next, base) = self.merge_first_base(figment, &directories, &format);
            figment = next;
            loaded += usize::from(base.is_some());
        }

        if loaded == 0 {
            debug!(directories = ?directories, "No configuration file found");
        }
        figment
    }

    fn merge_first_base(
        &self,
        mut figment: Figment,
        directories: &[PathBuf],
        format: &FileFormat,
    ) -> (Figment, Option<PathBuf>) {
        for dir in directories {
            for base in format.base_names {
                let Some((stem, ext)) = base.rsplit_once('.') else {
                    continue;
                };

                let overlay = dir.join(format!("{stem}.{}.{ext}", self.profile));
                if overlay.is_file() {
                    debug!(path = %overlay.display(), "Reading profile overlay");
                    figment = format.merge_into(figment, &overlay);
                }

                let path = dir.join(base);
                if path.is_file() {
                    info!(path = %path.display(), "Reading configuration file");
                    return (format.merge_into(figment, &path), Some(path));
                }
            }
        }
        (figment, None)
    }
}

/// Merges a single file whose format is chosen by extension.
fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match enabled_formats()
        .into_iter()
        .find(|format| format.extensions.contains(&ext.as_str()))
    {
        Some(format) => Ok(format.merge_into(figment, path)),
        None => {
            warn!(path = %path.display(), "No enabled format reads this file");
            Err(ConfigError::UnsupportedFormat(ext))
        }
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<BraidConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from `path` plus environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<BraidConfig> {
    ConfigLoader::new().file(path).load()
}
