//! resolved configuration
//!
//! A [TerragruntConfig] starts out as a single document ([TerragruntConfig::from_document]) and absorbs its parents
//! through [TerragruntConfig::merge_included]. The parent only supplies defaults: scalars set by the child are kept,
//! inputs are deep merged with the child winning, and extension lists are merged by name (see [extensions::merge]).
use crate::conditions::RunConditionSet;
use crate::dispatch::{CommandDescriptor, FileImport};
use crate::document::{ConfigDocument, RemoteState};
use crate::error::MergeError;
use crate::extensions::export::{self, ExportArtifact, ExportError};
use crate::extensions::extra_args::{self, ExtraArgumentsError};
use crate::extensions::extra_command::{self, ActualCommand};
use crate::extensions::hook::{self, HookStage, HookType};
use crate::extensions::import_files::ImportFilesError;
use crate::extensions::import_variables::ImportVariablesError;
use crate::extensions::{
    self, approval, ApprovalConfig, ExportVariables, Extension, ExtraArguments, ExtraCommand, Hook, ImportFiles,
    ImportVariables, MergeMode, RunCondition,
};
use crate::functions::{SCRIPTS_FOLDER_PLACEHOLDER, TEMP_FOLDER_PLACEHOLDER};
use crate::util;
use crate::value::{Map, Value};
use crate::variables::VariableContext;
use crate::visit::VisitMut;
use indexmap::IndexMap;
use serde::Serializer;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct TerragruntConfig {
    /// Primary document
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terraform_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_state: Option<RemoteState>,
    /// Absolute paths
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uniqueness_criteria: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assume_role: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assume_role_duration_hours: Option<i64>,
    pub inputs: Map,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pre_hooks: Vec<Hook>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub post_hooks: Vec<Hook>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_commands: Vec<ExtraCommand>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub import_files: Vec<ImportFiles>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub import_variables: Vec<ImportVariables>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_arguments: Vec<ExtraArguments>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub approval_configs: Vec<ApprovalConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub run_conditions: Vec<RunCondition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub export_variables: Vec<ExportVariables>,
    /// Explicitly included documents, primary document first
    pub include_chain: Vec<PathBuf>,
    #[serde(skip_serializing_if = "RunConditionSet::is_empty")]
    pub conditions: RunConditionSet,
    /// Variable context the configuration was resolved with
    #[serde(serialize_with = "serialize_variables")]
    pub variables: VariableContext,
    #[serde(skip)]
    pub working_dir: PathBuf,
    #[serde(skip)]
    finalized: bool,
}

fn serialize_variables<S: Serializer>(variables: &VariableContext, serializer: S) -> Result<S::Ok, S::Error> {
    serde::Serialize::serialize(&variables.to_map(), serializer)
}

impl TerragruntConfig {
    pub fn from_document(document: &ConfigDocument) -> Self {
        let dir = document.dir();
        TerragruntConfig {
            path: document.path.clone(),
            description: document.description.clone(),
            terraform_source: document.terraform_source.clone(),
            remote_state: document.remote_state.clone(),
            dependencies: document
                .dependencies
                .iter()
                .flatten()
                .map(|dependency| util::clean_path(&dir.join(dependency)))
                .collect(),
            uniqueness_criteria: document.uniqueness_criteria.clone(),
            assume_role: document.assume_role.clone().unwrap_or_default(),
            assume_role_duration_hours: document.assume_role_duration_hours,
            inputs: document.inputs.clone(),
            pre_hooks: extensions::normalize_list(document.pre_hooks.clone()),
            post_hooks: extensions::normalize_list(document.post_hooks.clone()),
            extra_commands: extensions::normalize_list(document.extra_commands.clone()),
            import_files: extensions::normalize_list(document.import_files.clone()),
            import_variables: extensions::normalize_list(document.import_variables.clone()),
            extra_arguments: extensions::normalize_list(document.extra_arguments.clone()),
            approval_configs: extensions::normalize_list(document.approval_configs.clone()),
            run_conditions: extensions::normalize_list(document.run_conditions.clone()),
            export_variables: extensions::normalize_list(document.export_variables.clone()),
            ..Default::default()
        }
    }

    /// Use `parent` for everything this configuration leaves unset
    pub fn merge_included(&mut self, parent: TerragruntConfig) {
        tracing::debug!(child=%self.path.display(), parent=%parent.path.display(), "merging included config");

        fn inherit<T>(current: &mut Option<T>, parent: Option<T>) {
            if current.is_none() {
                *current = parent;
            }
        }
        inherit(&mut self.description, parent.description);
        inherit(&mut self.terraform_source, parent.terraform_source);
        inherit(&mut self.remote_state, parent.remote_state);
        inherit(&mut self.uniqueness_criteria, parent.uniqueness_criteria);
        inherit(&mut self.assume_role_duration_hours, parent.assume_role_duration_hours);
        if self.dependencies.is_empty() {
            self.dependencies = parent.dependencies;
        }
        if self.assume_role.is_empty() {
            self.assume_role = parent.assume_role;
        }

        let mut inputs = Value::Object(parent.inputs);
        inputs.merge(Value::Object(std::mem::take(&mut self.inputs)), true);
        if let Value::Object(inputs) = inputs {
            self.inputs = inputs;
        }

        extensions::merge(&mut self.pre_hooks, parent.pre_hooks, MergeMode::Prepend);
        extensions::merge(&mut self.post_hooks, parent.post_hooks, MergeMode::Append);
        extensions::merge(&mut self.extra_arguments, parent.extra_arguments, MergeMode::Prepend);
        extensions::merge(&mut self.import_files, parent.import_files, MergeMode::Prepend);
        extensions::merge(&mut self.import_variables, parent.import_variables, MergeMode::Prepend);
        extensions::merge(&mut self.extra_commands, parent.extra_commands, MergeMode::Append);
        extensions::merge(&mut self.approval_configs, parent.approval_configs, MergeMode::Append);
        extensions::merge(&mut self.run_conditions, parent.run_conditions, MergeMode::Append);
        extensions::merge(&mut self.export_variables, parent.export_variables, MergeMode::Append);
        hook::sort(&mut self.pre_hooks);
        hook::sort(&mut self.post_hooks);
    }

    pub fn validate(&self) -> Result<(), MergeError> {
        if let Some(remote_state) = &self.remote_state {
            if remote_state.backend.trim().is_empty() {
                return Err(MergeError::RemoteStateWithoutBackend);
            }
        }
        match self.assume_role_duration_hours {
            Some(hours) if hours <= 0 => Err(MergeError::InvalidRoleDuration(hours)),
            _ => Ok(()),
        }
    }

    /// Replace the deferred folder placeholders and unindent free-form text
    ///
    /// Runs once, after every document has been merged. Later calls are ignored.
    pub fn final_substitution(&mut self, temp_folder: &Path, scripts_folder: &Path) {
        if self.finalized {
            tracing::debug!(path=%self.path.display(), "placeholders already substituted");
            return;
        }
        self.finalized = true;

        let temp_folder = util::to_slash(temp_folder);
        let scripts_folder = util::to_slash(scripts_folder);
        let mut placeholders = |text: &mut String| {
            if text.contains("@@") {
                *text = text
                    .replace(TEMP_FOLDER_PLACEHOLDER, &temp_folder)
                    .replace(SCRIPTS_FOLDER_PLACEHOLDER, &scripts_folder);
            }
        };

        for text in [&mut self.description, &mut self.terraform_source, &mut self.uniqueness_criteria]
            .into_iter()
            .flatten()
        {
            placeholders(text);
        }
        self.assume_role.iter_mut().for_each(&mut placeholders);
        self.inputs.values_mut().for_each(|value| visit_value_strings(value, &mut placeholders));
        if let Some(remote_state) = &mut self.remote_state {
            remote_state
                .config
                .values_mut()
                .for_each(|value| visit_value_strings(value, &mut placeholders));
        }

        visit_items(&mut self.pre_hooks, &mut placeholders);
        visit_items(&mut self.post_hooks, &mut placeholders);
        visit_items(&mut self.extra_commands, &mut placeholders);
        visit_items(&mut self.import_files, &mut placeholders);
        visit_items(&mut self.import_variables, &mut placeholders);
        visit_items(&mut self.extra_arguments, &mut placeholders);
        visit_items(&mut self.approval_configs, &mut placeholders);
        visit_items(&mut self.run_conditions, &mut placeholders);
        visit_items(&mut self.export_variables, &mut placeholders);

        let mut unindent = |text: &mut String| *text = util::unindent(text).trim().to_string();
        if let Some(description) = &mut self.description {
            unindent(description);
        }
        unindent_items(&mut self.pre_hooks, &mut unindent);
        unindent_items(&mut self.post_hooks, &mut unindent);
        unindent_items(&mut self.extra_commands, &mut unindent);
        unindent_items(&mut self.import_files, &mut unindent);
        unindent_items(&mut self.import_variables, &mut unindent);
        unindent_items(&mut self.extra_arguments, &mut unindent);
        unindent_items(&mut self.approval_configs, &mut unindent);
        unindent_items(&mut self.run_conditions, &mut unindent);
        unindent_items(&mut self.export_variables, &mut unindent);
    }

    /// Hook commands to run for `command` at `stage`
    pub fn hook_commands(
        &self,
        hook_type: HookType,
        command: Option<&str>,
        stage: HookStage,
        after_error: bool,
    ) -> Vec<CommandDescriptor> {
        let hooks = match hook_type {
            HookType::PreHook => &self.pre_hooks,
            HookType::PostHook => &self.post_hooks,
        };
        hook::command_descriptors(hooks, command, stage, after_error, &self.working_dir)
    }

    pub fn actual_command(&self, cmd: &str) -> ActualCommand<'_> {
        extra_command::actual_command(&self.extra_commands, cmd)
    }

    /// Descriptor running the extra command owning `cmd`, `None` for commands of the provisioning tool
    pub fn extra_command(&self, cmd: &str, arguments: &[String]) -> Option<CommandDescriptor> {
        let actual = self.actual_command(cmd);
        let extra = actual.extra?;
        Some(CommandDescriptor {
            name: extra.base.name.clone(),
            command: actual.command,
            arguments: extra.arguments.iter().chain(arguments).cloned().collect(),
            env: IndexMap::new(),
            working_dir: self.working_dir.clone(),
            ignore_error: extra.ignore_error,
            shell: extra.shell_command,
            expand_args: extra.expand_args.unwrap_or(true),
        })
    }

    pub fn approval_for(&self, command: &str) -> Option<&ApprovalConfig> {
        approval::approval_for(&self.approval_configs, command)
    }

    /// Files to stage into `folder`
    ///
    /// `source_folder` maps the `source` of an item to its local copy. Items without a source read from the working
    /// directory.
    pub fn staging_plan(
        &self,
        folder: &Path,
        source_folder: impl Fn(&str) -> Option<PathBuf>,
    ) -> Result<Vec<FileImport>, ImportFilesError> {
        let mut plan = vec![];
        for import in extensions::enabled(&self.import_files) {
            let source = match import.source.as_str() {
                "" => self.working_dir.clone(),
                source => source_folder(source).unwrap_or_else(|| self.working_dir.join(source)),
            };
            plan.extend(import.staging_plan(&source, folder, &self.working_dir)?);
        }
        Ok(plan)
    }

    /// Import the variables of every enabled `import_variables` item applying to `command` into `context`
    pub fn apply_import_variables(
        &self,
        command: Option<&str>,
        context: &mut VariableContext,
        env: &mut IndexMap<String, String>,
        folders: &[PathBuf],
    ) -> Result<Map, ImportVariablesError> {
        let mut imported = Map::new();
        for import in extensions::enabled(&self.import_variables) {
            if !import.applies_to(command) {
                continue;
            }
            let mut variables = Value::Object(imported);
            variables.merge(Value::Object(import.apply(context, env, folders)?), true);
            imported = match variables {
                Value::Object(map) => map,
                _ => Map::new(),
            };
        }
        Ok(imported)
    }

    /// See [extra_args::arguments_for]
    pub fn extra_arguments_for(
        &self,
        command: Option<&str>,
        folders: &[PathBuf],
        context: &mut VariableContext,
        source_folder: impl Fn(&str) -> Option<PathBuf>,
    ) -> Result<Vec<String>, ExtraArgumentsError> {
        extra_args::arguments_for(&self.extra_arguments, command, folders, context, source_folder)
    }

    /// Rendered `export_variables` artifacts for `folder`
    pub fn exports(&self, folder: &Path) -> Result<Vec<ExportArtifact>, ExportError> {
        export::render_all(
            &self.export_variables,
            &self.variables.to_map(),
            folder,
            folder == self.working_dir,
        )
    }

    /// See [RunConditionSet::should_run]
    pub fn should_run_with(&self, interpolate: impl FnMut(&str) -> Option<String>) -> bool {
        self.conditions.should_run(&self.variables, interpolate)
    }
}

fn visit_value_strings(value: &mut Value, visitor: &mut dyn FnMut(&mut String)) {
    match value {
        Value::String(text) => visitor(text),
        Value::Array(values) => values.iter_mut().for_each(|value| visit_value_strings(value, visitor)),
        Value::Object(map) => map.values_mut().for_each(|value| visit_value_strings(value, visitor)),
        Value::Null | Value::Boolean(_) | Value::Integer(_) | Value::Decimal(_) => {}
    }
}

fn visit_items<T: Extension>(items: &mut [T], visitor: &mut dyn VisitMut<String>) {
    for item in items {
        item.visit_strings_mut(visitor);
    }
}

fn unindent_items<T: Extension>(items: &mut [T], unindent: &mut dyn FnMut(&mut String)) {
    for item in items {
        unindent(&mut item.base_mut().description);
    }
}
