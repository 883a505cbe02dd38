//! configuration resolution
//!
//! [Resolver::resolve] turns the primary document of a working directory into a [TerragruntConfig]:
//!
//! 1. pre-boot documents are resolved, they end up as the outermost parent
//! 2. the primary document is loaded (a missing file is replaced by an empty document)
//! 3. `include {}` directives are followed, every parent is merged into its child
//! 4. at the top of the explicit chain, post-boot documents are merged as parents
//! 5. run conditions are collected and the configuration validated
//! 6. deferred placeholders are substituted
//!
//! Bootstrap documents that are not configuration documents are read as variable files instead.
use crate::collaborators::Collaborators;
use crate::conditions::RunConditionSet;
use crate::config::TerragruntConfig;
use crate::document::ConfigDocument;
use crate::error::ConfigError;
use crate::functions::FunctionTable;
use crate::include::{Include, IncludeTarget};
use crate::interpolation::{EvalScope, EvalState, Evaluator, TextMode};
use crate::loader::{self, DocumentCache, LoadedDocument, Loader};
use crate::options::ResolveOptions;
use crate::variables::{VariableContext, VariableSource};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Resolver {
    options: ResolveOptions,
    functions: FunctionTable,
    collaborators: Collaborators,
    /// Shared cache, every resolution gets a fresh one otherwise
    cache: Option<Arc<DocumentCache>>,
}

impl Resolver {
    pub fn new(options: ResolveOptions) -> Self {
        Resolver {
            options,
            functions: FunctionTable::builtin(),
            collaborators: Collaborators::default(),
            cache: None,
        }
    }

    pub fn with_functions(mut self, functions: FunctionTable) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Share loaded documents with other resolutions
    pub fn with_cache(mut self, cache: Arc<DocumentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    fn loader<'a>(&'a self, cache: &'a DocumentCache) -> Loader<'a> {
        Loader {
            options: &self.options,
            collaborators: &self.collaborators,
            functions: &self.functions,
            cache,
        }
    }

    #[tracing::instrument(level = "trace", skip_all)]
    pub fn resolve(&self) -> Result<TerragruntConfig, ConfigError> {
        let cache = self.cache.clone().unwrap_or_default();
        let loader = self.loader(&cache);
        let mut state = EvalState::new(self.options.seed_variables());
        let mut active = vec![];

        let pre_boot = self.resolve_bootstrap(
            &loader,
            &self.options.pre_boot_configs,
            None,
            VariableSource::Default,
            &mut state,
            &mut active,
        )?;

        let root = Arc::new(Include::root(self.options.config_path.clone()));
        let mut config = self.resolve_document(&loader, root, VariableSource::ConfigFile, &mut state, &mut active)?;
        if let Some(pre_boot) = pre_boot {
            config.merge_included(pre_boot);
        }

        if self.collaborators.cancellation.is_cancelled() {
            return Err(ConfigError::Cancelled);
        }

        config.conditions = RunConditionSet::from_items(&config.run_conditions);
        config.validate().map_err(|source| ConfigError::Invalid {
            path: config.path.clone(),
            source,
        })?;
        config.working_dir = self.options.working_dir.clone();
        config.variables = state.variables;
        config.final_substitution(&self.options.download_dir(), &self.options.scripts_dir());

        tracing::debug!(path=%config.path.display(), chain=?config.include_chain, "configuration resolved");
        Ok(config)
    }

    /// Resolve the document at `include` and everything it includes
    fn resolve_document(
        &self,
        loader: &Loader<'_>,
        include: Arc<Include>,
        priority: VariableSource,
        state: &mut EvalState,
        active: &mut Vec<PathBuf>,
    ) -> Result<TerragruntConfig, ConfigError> {
        if include.depth() > self.options.max_parent_folders {
            return Err(ConfigError::CycleOrDepthExceeded {
                path: include.path.clone(),
                reason: format!("include chain longer than {}", self.options.max_parent_folders),
            });
        }

        let local = loader.locate(&include)?;
        let include = Arc::new(Include {
            path: local.clone(),
            ..Include::clone(&include)
        });
        let is_primary = include.included_by.is_none() && !include.is_bootstrap();

        let loaded = match loader.load(&include, state) {
            Ok(loaded) => loaded,
            Err(err) if is_primary && err.is_not_found() => {
                tracing::warn!(path=%local.display(), "configuration file not found, using defaults");
                Arc::new(LoadedDocument {
                    text: String::new(),
                    document: ConfigDocument::empty(self.options.absolute(&local)),
                    global_writes: vec![],
                })
            }
            Err(err) => return Err(err.into()),
        };
        let document = &loaded.document;

        if active.contains(&document.path) {
            let mut chain: Vec<String> = active.iter().map(|path| path.display().to_string()).collect();
            chain.push(document.path.display().to_string());
            return Err(ConfigError::CycleOrDepthExceeded {
                path: document.path.clone(),
                reason: format!("include cycle {}", chain.join(" -> ")),
            });
        }

        state.variables.import_map(&document.inputs, priority);
        let mut config = TerragruntConfig::from_document(document);
        if !include.is_bootstrap() {
            config.include_chain.push(document.path.clone());
        }

        active.push(document.path.clone());
        let result = match &document.include {
            Some(directive) => {
                let target = directive
                    .target(&document.dir())
                    .ok_or_else(|| ConfigError::MissingIncludeTarget(document.path.clone()))?;
                let parent_include = match target {
                    IncludeTarget::Local(path) => include.child(path, None),
                    IncludeTarget::Remote { source, path } => include.child(path.unwrap_or_default(), Some(source)),
                };
                tracing::debug!(path=%document.path.display(), parent=%parent_include.path.display(), "following include");
                self.resolve_document(loader, Arc::new(parent_include), priority, state, active)
                    .map(Some)
            }
            None if include.ancestors().any(Include::is_bootstrap) => Ok(None),
            None => self.resolve_bootstrap(
                loader,
                &self.options.boot_configs,
                Some(Arc::clone(&include)),
                VariableSource::ConfigFile,
                state,
                active,
            ),
        };
        active.pop();

        if let Some(mut parent) = result? {
            config.include_chain.append(&mut parent.include_chain);
            config.merge_included(parent);
        }
        Ok(config)
    }

    /// Resolve bootstrap documents into a single configuration, later documents win
    fn resolve_bootstrap(
        &self,
        loader: &Loader<'_>,
        paths: &[PathBuf],
        included_by: Option<Arc<Include>>,
        priority: VariableSource,
        state: &mut EvalState,
        active: &mut Vec<PathBuf>,
    ) -> Result<Option<TerragruntConfig>, ConfigError> {
        let mut accumulated: Option<TerragruntConfig> = None;

        for path in paths.iter().rev() {
            let include = Arc::new(Include::bootstrap(path.clone(), included_by.clone()));
            match self.resolve_document(loader, include, priority, state, active) {
                Ok(config) => match &mut accumulated {
                    Some(accumulated) => accumulated.merge_included(config),
                    None => accumulated = Some(config),
                },
                Err(ConfigError::NoConfigurationFound(file)) => {
                    tracing::warn!(path=%file.display(), "bootstrap file is not a configuration, reading it as variables");
                    let variables = loader::read_variables_file(&file)?;
                    state.variables.import_map(&variables, priority);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(accumulated)
    }

    fn evaluator<'a>(&'a self, include: &'a Include, state: &'a mut EvalState) -> Evaluator<'a> {
        let scope = EvalScope {
            include,
            options: &self.options,
            collaborators: &self.collaborators,
            state,
        };
        Evaluator::new(scope, &self.functions, TextMode::Plain)
    }

    /// Whether the unit of `config` should run
    ///
    /// Composite condition keys (`${var.a}-${var.b}`) are interpolated with the variables of `config`.
    pub fn should_run(&self, config: &TerragruntConfig) -> bool {
        let include = Include::root(config.path.clone());
        let mut state = EvalState::new(config.variables.clone());
        let mut evaluator = self.evaluator(&include, &mut state);

        config.should_run_with(|key| {
            if !key.contains("${") {
                return None;
            }
            match evaluator.resolve_text(key) {
                Ok(text) if !text.contains("${") => Some(text),
                Ok(_) => None,
                Err(err) => {
                    tracing::debug!(key, %err, "condition key not evaluated");
                    None
                }
            }
        })
    }

    /// Interpolate `text` with `variables`
    pub fn evaluate_text(&self, variables: VariableContext, text: &str) -> Result<String, ConfigError> {
        let include = Include::root(self.options.config_path.clone());
        let mut state = EvalState::new(variables);
        self.evaluator(&include, &mut state)
            .resolve_text(text)
            .map_err(|source| ConfigError::Evaluation {
                path: self.options.absolute_config_path(),
                source,
            })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::Value;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn tree(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, contents) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            std::fs::write(path, contents).expect("write");
        }
        dir
    }

    fn resolver(dir: &Path, unit: &str) -> Resolver {
        let working_dir = dir.join(unit).canonicalize().unwrap_or_else(|_| dir.join(unit));
        Resolver::new(ResolveOptions::new(working_dir.join("terragrunt.hcl"), working_dir).with_env("ENV", "dev"))
    }

    fn hook_names(config: &TerragruntConfig) -> Vec<&str> {
        config.pre_hooks.iter().map(|hook| hook.base.name.as_str()).collect()
    }

    #[test]
    fn include_chain() {
        let dir = tree(&[
            (
                "terragrunt.hcl",
                r#"
                description = "root"
                inputs = { env = "${get_env("ENV")}", region = "us-east-1" }
                pre_hook "root" { command = "echo ${path_relative_to_include()}" }
                "#,
            ),
            (
                "live/terragrunt.hcl",
                r#"
                include { path = "${find_in_parent_folders()}" }
                inputs = { region = "eu-west-1" }
                pre_hook "live" { command = "echo live" }
                "#,
            ),
            (
                "live/unit/terragrunt.hcl",
                r#"
                include { path = find_in_parent_folders() }
                pre_hook "unit" { command = "echo unit" }
                "#,
            ),
        ]);

        let config = resolver(dir.path(), "live/unit").resolve().expect("resolved");
        assert_eq!(config.description.as_deref(), Some("root"));
        assert_eq!(hook_names(&config), vec!["root", "live", "unit"]);
        assert_eq!(config.pre_hooks[0].command, "echo live/unit");
        assert_eq!(config.include_chain.len(), 3);
        assert_eq!(config.inputs.get("region"), Some(&Value::from("eu-west-1")));
        assert_eq!(config.variables.get("region"), Some(&Value::from("eu-west-1")));
        assert_eq!(config.variables.get("env"), Some(&Value::from("dev")));
    }

    #[test]
    fn missing_primary_document_uses_defaults() {
        let dir = tree(&[("unit/.keep", "")]);
        let config = resolver(dir.path(), "unit").resolve().expect("resolved");
        assert!(config.pre_hooks.is_empty());
        assert_eq!(config.include_chain.len(), 1);
    }

    #[test]
    fn include_errors() {
        let dir = tree(&[
            ("empty/terragrunt.hcl", "include {}"),
            ("a/terragrunt.hcl", r#"include { path = "../b/terragrunt.hcl" }"#),
            ("b/terragrunt.hcl", r#"include { path = "../a/terragrunt.hcl" }"#),
            ("broken/terragrunt.hcl", r#"include { path = "../missing/terragrunt.hcl" }"#),
            ("invalid/terragrunt.hcl", r#"description = "${unknown_function()}""#),
        ]);

        let err = resolver(dir.path(), "empty").resolve().expect_err("must error");
        assert!(matches!(err, ConfigError::MissingIncludeTarget(_)));

        let err = resolver(dir.path(), "a").resolve().expect_err("must error");
        assert!(matches!(err, ConfigError::CycleOrDepthExceeded { ref reason, .. } if reason.starts_with("include cycle")));

        let err = resolver(dir.path(), "broken").resolve().expect_err("must error");
        assert!(matches!(err, ConfigError::Decode { .. }));

        let err = resolver(dir.path(), "invalid").resolve().expect_err("must error");
        assert!(matches!(err, ConfigError::Evaluation { .. }));
    }

    #[test]
    fn bootstrap_documents() {
        let dir = tree(&[
            (
                "boot/first.hcl",
                r#"
                pre_hook "shared" { command = "echo first" }
                pre_hook "first" { command = "echo first" }
                "#,
            ),
            ("boot/second.hcl", r#"pre_hook "shared" { command = "echo second" }"#),
            ("boot/vars.tfvars", "team = \"infra\"\n"),
            ("boot/pre.hcl", r#"inputs = { team = "pre", tier = "pre" }"#),
            ("unit/terragrunt.hcl", r#"pre_hook "unit" { command = "echo unit" }"#),
        ]);
        let boot = dir.path().join("boot");
        let working_dir = dir.path().join("unit");
        let options = ResolveOptions::new(working_dir.join("terragrunt.hcl"), working_dir)
            .with_pre_boot_configs(vec![boot.join("pre.hcl")])
            .with_boot_configs(vec![boot.join("first.hcl"), boot.join("second.hcl"), boot.join("vars.tfvars")]);

        let config = Resolver::new(options).resolve().expect("resolved");
        assert_eq!(hook_names(&config), vec!["shared", "first", "unit"]);
        assert_eq!(config.pre_hooks[0].command, "echo second");
        assert_eq!(config.include_chain.len(), 1);
        assert_eq!(config.variables.get("team"), Some(&Value::from("infra")));
        assert_eq!(config.variables.get("tier"), Some(&Value::from("pre")));
    }

    fn global_variable_tree() -> tempfile::TempDir {
        tree(&[
            ("terragrunt.hcl", r#"description = "root${set_global_variable("tier", "gold")}""#),
            (
                "unit/terragrunt.hcl",
                r#"
                include { path = find_in_parent_folders() }
                run_conditions {
                  run_if = { tier = "gold" }
                }
                "#,
            ),
        ])
    }

    #[test]
    fn every_resolution_sees_helper_writes() {
        let dir = global_variable_tree();
        let resolver = resolver(dir.path(), "unit");

        for _ in 0..2 {
            let config = resolver.resolve().expect("resolved");
            assert_eq!(config.description.as_deref(), Some("root"));
            assert_eq!(config.variables.get("tier"), Some(&Value::from("gold")));
            assert!(resolver.should_run(&config));
        }
    }

    #[test]
    fn shared_cache_parses_once_and_replays_helper_writes() {
        let dir = global_variable_tree();
        let cache = Arc::new(DocumentCache::new());
        let resolver = resolver(dir.path(), "unit").with_cache(Arc::clone(&cache));

        resolver.resolve().expect("resolved");
        assert_eq!(cache.parse_count(), 2);
        let config = resolver.resolve().expect("resolved");
        assert_eq!(cache.parse_count(), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(config.variables.get("tier"), Some(&Value::from("gold")));
        assert!(resolver.should_run(&config));
    }

    #[test]
    fn concurrent_resolutions_share_a_cache() {
        let dir = global_variable_tree();
        let cache = Arc::new(DocumentCache::new());

        let descriptions: Vec<Option<String>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let resolver = resolver(dir.path(), "unit").with_cache(Arc::clone(&cache));
                        resolver.resolve().expect("resolved").description
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().expect("thread")).collect()
        });

        assert_eq!(descriptions, vec![Some("root".to_string()); 4]);
        assert_eq!(cache.parse_count(), 2);
    }

    #[test]
    fn run_conditions_and_placeholders() {
        let dir = tree(&[(
            "unit/terragrunt.hcl",
            r#"
            inputs = { env = "qa", region = "us-east-1" }
            run_conditions {
              run_if = { env = ["dev", "qa"], "${var.env}-${var.region}" = "qa-us-east-1" }
            }
            pre_hook "setup" { command = "${get_scripts_folder()}/setup.sh" }
            "#,
        )]);
        let resolver = resolver(dir.path(), "unit");
        let config = resolver.resolve().expect("resolved");

        assert_eq!(config.conditions.allow.len(), 1);
        assert!(resolver.should_run(&config));
        let scripts = resolver.options().scripts_dir();
        assert_eq!(config.pre_hooks[0].command, format!("{}/setup.sh", scripts.display()));

        let mut variables = config.variables.clone();
        variables.set("env", "prod", VariableSource::CommandLine);
        let mut denied = config.clone();
        denied.variables = variables;
        assert!(!resolver.should_run(&denied));
    }

    #[test]
    fn evaluate_text() {
        let dir = tree(&[("unit/terragrunt.hcl", "")]);
        let resolver = resolver(dir.path(), "unit");
        let mut variables = VariableContext::new();
        variables.set("env", "qa", VariableSource::CommandLine);

        assert_eq!(
            resolver
                .evaluate_text(variables.clone(), r#"${var.env}-${get_env("ENV", "none")}"#)
                .expect("evaluated"),
            "qa-dev"
        );
        let err = resolver
            .evaluate_text(variables, "${unknown_function()}")
            .expect_err("must error");
        assert!(matches!(err, ConfigError::Evaluation { .. }));
    }
}
