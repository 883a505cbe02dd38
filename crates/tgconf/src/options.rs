//! resolution options
//!
//! [ResolveOptions] carries everything a resolution run needs to know about its surroundings: where the primary
//! document lives, the environment map that `get_env()` reads, explicit variables and the bootstrap documents.
use crate::value::Value;
use crate::variables::{VariableContext, VariableSource};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Conventional name of a configuration document
pub const DEFAULT_CONFIG_NAME: &str = "terragrunt.hcl";

/// Candidate file names, in lookup order
pub const DEFAULT_CONFIG_NAMES: &[&str] = &[
    DEFAULT_CONFIG_NAME,
    "terragrunt.hcl.json",
    "terragrunt.json",
    "terragrunt.yaml",
    "terragrunt.yml",
    ".terragrunt",
];

/// Folder (below the working directory) that `get_scripts_folder()` points to
pub const SCRIPTS_FOLDER: &str = ".terragrunt-scripts";

/// Default download folder (below the working directory)
pub const DOWNLOAD_FOLDER: &str = ".terragrunt-cache";

/// Hard cap for `find_in_parent_folders()`
pub const MAX_PARENT_FOLDERS: usize = 100;

/// Environment variables with this prefix are exposed as variables
pub const ENV_VARIABLE_PREFIX: &str = "TF_VAR_";

#[derive(Debug, Clone, derive_new::new)]
pub struct ResolveOptions {
    /// Primary configuration document
    pub config_path: PathBuf,
    pub working_dir: PathBuf,
    #[new(default)]
    pub download_dir: Option<PathBuf>,
    /// Environment as seen by `get_env()`
    #[new(default)]
    pub env: IndexMap<String, String>,
    /// Explicit variables, these have the highest priority
    #[new(default)]
    pub variables: IndexMap<String, Value>,
    /// Documents merged before the primary document is read
    #[new(default)]
    pub pre_boot_configs: Vec<PathBuf>,
    /// Documents merged as the outermost parent of a document without include
    #[new(default)]
    pub boot_configs: Vec<PathBuf>,
    /// Replace unresolved `${var.x}` references with an empty string
    #[new(default)]
    pub erase_unresolved: bool,
    /// Command the configuration is resolved for (e.g. `plan`), used by `on_commands` filters
    #[new(default)]
    pub command: Option<String>,
    #[new(value = "DEFAULT_CONFIG_NAMES.iter().map(|s| s.to_string()).collect()")]
    pub config_names: Vec<String>,
    #[new(value = "MAX_PARENT_FOLDERS")]
    pub max_parent_folders: usize,
}

impl ResolveOptions {
    /// Options for the configuration document found in `working_dir`
    ///
    /// Falls back to `<working_dir>/terragrunt.hcl` if no candidate exists.
    pub fn for_working_dir(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        let config_path = working_dir.join(DEFAULT_CONFIG_NAME);
        let mut options = Self::new(config_path, working_dir.clone());
        if let Some(found) = options.find_config_in(&working_dir) {
            options.config_path = found;
        }
        options
    }

    pub fn with_process_env(mut self) -> Self {
        self.env = std::env::vars().collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_pre_boot_configs(mut self, paths: Vec<PathBuf>) -> Self {
        self.pre_boot_configs = paths;
        self
    }

    pub fn with_boot_configs(mut self, paths: Vec<PathBuf>) -> Self {
        self.boot_configs = paths;
        self
    }

    pub fn with_download_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(path.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn erasing_unresolved(mut self, erase: bool) -> Self {
        self.erase_unresolved = erase;
        self
    }

    /// Absolute path of the primary document
    pub fn absolute_config_path(&self) -> PathBuf {
        self.absolute(&self.config_path)
    }

    /// Directory of the primary document
    pub fn config_dir(&self) -> PathBuf {
        let path = self.absolute_config_path();
        path.parent().map(Path::to_path_buf).unwrap_or(path)
    }

    /// Join relative paths against the working directory
    pub fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            crate::util::clean_path(path)
        } else {
            crate::util::clean_path(&self.working_dir.join(path))
        }
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| self.working_dir.join(DOWNLOAD_FOLDER))
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.working_dir.join(SCRIPTS_FOLDER)
    }

    /// First configuration document candidate that exists in `dir`
    pub fn find_config_in(&self, dir: &Path) -> Option<PathBuf> {
        self.config_names
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    /// Variable context every resolution starts with
    ///
    /// Explicit variables are added with [VariableSource::CommandLine], `TF_VAR_*` environment entries with
    /// [VariableSource::Environment].
    pub fn seed_variables(&self) -> VariableContext {
        let mut variables = VariableContext::new();
        for (key, value) in &self.variables {
            variables.set(key, value.clone(), VariableSource::CommandLine);
        }
        for (key, value) in &self.env {
            if let Some(name) = key.strip_prefix(ENV_VARIABLE_PREFIX) {
                variables.set(name, value.as_str(), VariableSource::Environment);
            }
        }
        variables
    }
}
