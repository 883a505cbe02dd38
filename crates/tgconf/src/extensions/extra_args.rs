//! `extra_arguments` blocks
use super::{Extension, ExtensionBase};
use crate::loader::{self, LoadError};
use crate::util;
use crate::value::{Map, Value};
use crate::variables::{VariableContext, VariableSource};
use crate::visit::VisitMut;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ExtraArguments {
    #[serde(flatten)]
    pub base: ExtensionBase,
    /// Variables from files are imported under this key if set
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nested_under: String,
    /// Folder (or source) the var file patterns are looked up in
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub vars: Vec<String>,
    #[serde(default)]
    pub required_var_files: Vec<String>,
    #[serde(default)]
    pub optional_var_files: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ExtraArgumentsError {
    #[error("{name}: no file matches {pattern}")]
    NoMatch { name: String, pattern: String },
    #[error("{name}: invalid pattern {pattern}")]
    Pattern {
        name: String,
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("{name}: cannot import {}", path.display())]
    Load {
        name: String,
        path: PathBuf,
        #[source]
        source: Box<LoadError>,
    },
}

impl Extension for ExtraArguments {
    const KIND: &'static str = "extra_arguments";
    const ATTRIBUTES: &'static [&'static str] = &[
        "nested_under",
        "source",
        "arguments",
        "vars",
        "required_var_files",
        "optional_var_files",
        "commands",
    ];

    fn base(&self) -> &ExtensionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ExtensionBase {
        &mut self.base
    }

    fn visit_strings_mut(&mut self, visitor: &mut dyn VisitMut<String>) {
        self.base.visit_strings_mut(visitor);
        visitor.visit_mut(&mut self.nested_under);
        visitor.visit_mut(&mut self.source);
        for list in [
            &mut self.arguments,
            &mut self.vars,
            &mut self.required_var_files,
            &mut self.optional_var_files,
        ] {
            list.iter_mut().for_each(|value| visitor.visit_mut(value));
        }
    }
}

impl ExtraArguments {
    fn applies_to(&self, command: Option<&str>) -> bool {
        command.is_some_and(|command| self.commands.iter().any(|on| on == command))
    }

    fn glob_files(&self, pattern: &str, folders: &[PathBuf]) -> Result<Vec<PathBuf>, ExtraArgumentsError> {
        util::glob_files(pattern, folders).map_err(|source| ExtraArgumentsError::Pattern {
            name: self.base.name.clone(),
            pattern: pattern.to_string(),
            source,
        })
    }

    fn import_file(&self, context: &mut VariableContext, file: &Path) -> Result<(), ExtraArgumentsError> {
        tracing::info!(name = self.base.name, path=%file.display(), "importing variables file");
        let mut variables = loader::read_variables_file(file).map_err(|source| ExtraArgumentsError::Load {
            name: self.base.name.clone(),
            path: file.to_path_buf(),
            source: Box::new(source),
        })?;
        if !self.nested_under.is_empty() {
            let mut nested = Map::new();
            nested.insert(self.nested_under.clone(), Value::Object(variables));
            variables = nested;
        }
        context.import_map(&variables, VariableSource::VarFile);
        Ok(())
    }
}

/// Arguments to add to `command`
///
/// Every enabled item imports its `vars` and variable files into `context` ([VariableSource::VarFile] priority, so
/// explicit variables are never replaced), but only items listing `command` contribute arguments. Var files are
/// looked up in `folders`, or in the `source_folder` of the item if it has a source.
pub fn arguments_for(
    list: &[ExtraArguments],
    command: Option<&str>,
    folders: &[PathBuf],
    context: &mut VariableContext,
    source_folder: impl Fn(&str) -> Option<PathBuf>,
) -> Result<Vec<String>, ExtraArgumentsError> {
    let mut out = vec![];

    for arg in super::enabled(list) {
        tracing::debug!(name = arg.base.name, "processing extra arguments");
        let included = arg.applies_to(command);
        if included {
            out.extend(arg.arguments.iter().cloned());
        }

        let folders = match arg.source.as_str() {
            "" => folders.to_vec(),
            source => match source_folder(source) {
                Some(folder) => vec![folder],
                None => {
                    tracing::warn!(name = arg.base.name, source, "source doesn't exist");
                    folders.to_vec()
                }
            },
        };

        // -var first, they have precedence over -var-file
        for definition in util::dedup_definitions(&arg.vars) {
            match definition.split_once('=') {
                Some((key, value)) => {
                    context.set(key.trim(), value, VariableSource::VarFile);
                }
                None => tracing::warn!(name = arg.base.name, definition, "-var ignored, expected key=value"),
            }
            if included {
                out.push("-var".to_string());
                out.push(definition);
            }
        }

        for pattern in util::dedup_keep_last(&arg.required_var_files) {
            let files = arg.glob_files(&pattern, &folders)?;
            if files.is_empty() {
                return Err(ExtraArgumentsError::NoMatch {
                    name: arg.base.name.clone(),
                    pattern,
                });
            }
            for file in files {
                arg.import_file(context, &file)?;
                if included {
                    out.push(format!("-var-file={}", file.display()));
                }
            }
        }

        for pattern in util::dedup_keep_last(&arg.optional_var_files) {
            let files = arg.glob_files(&pattern, &folders)?;
            if files.is_empty() {
                tracing::debug!(name = arg.base.name, pattern, "skipping var-file, it does not exist");
            }
            for file in files {
                arg.import_file(context, &file)?;
                if included {
                    out.push(format!("-var-file={}", file.display()));
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(name: &str, commands: &[&str]) -> ExtraArguments {
        ExtraArguments {
            base: ExtensionBase {
                name: name.to_string(),
                ..Default::default()
            },
            commands: commands.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn arguments_for_matching_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("common.tfvars"), "size = 3\n").expect("write");
        std::fs::write(dir.path().join("dev.tfvars"), "env = \"dev\"\n").expect("write");

        let mut vars = args("vars", &["plan", "apply"]);
        vars.arguments = vec!["-lock-timeout=20m".into()];
        vars.vars = vec!["region=us-east-1".into()];
        vars.required_var_files = vec!["common.tfvars".into()];
        vars.optional_var_files = vec!["dev.tfvars".into(), "missing.tfvars".into()];
        let mut other = args("other", &["destroy"]);
        other.arguments = vec!["-refresh=false".into()];

        let list = vec![vars, other];
        let folders = vec![dir.path().to_path_buf()];
        let mut context = VariableContext::new();
        context.set("region", "explicit", VariableSource::CommandLine);

        let out = arguments_for(&list, Some("plan"), &folders, &mut context, |_| None).expect("arguments");
        assert_eq!(
            out,
            vec![
                "-lock-timeout=20m".to_string(),
                "-var".to_string(),
                "region=us-east-1".to_string(),
                format!("-var-file={}", dir.path().join("common.tfvars").display()),
                format!("-var-file={}", dir.path().join("dev.tfvars").display()),
            ]
        );
        assert_eq!(context.get("region"), Some(&Value::from("explicit")));
        assert_eq!(context.get("size"), Some(&Value::Integer(3)));
        assert_eq!(context.get("env"), Some(&Value::from("dev")));

        let mut context = VariableContext::new();
        let out = arguments_for(&list, Some("output"), &folders, &mut context, |_| None).expect("arguments");
        assert!(out.is_empty());
        assert_eq!(context.get("env"), Some(&Value::from("dev")));
    }

    #[test]
    fn nested_under_and_source() {
        let source = tempfile::tempdir().expect("tempdir");
        std::fs::write(source.path().join("shared.json"), r#"{"team": "infra"}"#).expect("write");

        let mut item = args("shared", &["plan"]);
        item.source = "shared-vars".into();
        item.nested_under = "shared".into();
        item.required_var_files = vec!["shared.json".into()];

        let mut context = VariableContext::new();
        let source_dir = source.path().to_path_buf();
        arguments_for(&[item], Some("plan"), &[], &mut context, |name| {
            (name == "shared-vars").then(|| source_dir.clone())
        })
        .expect("arguments");
        assert_eq!(context.get("shared.team"), Some(&Value::from("infra")));
    }

    #[test]
    fn missing_required_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut item = args("required", &["plan"]);
        item.required_var_files = vec!["*.tfvars".into()];

        let err = arguments_for(&[item], Some("plan"), &[dir.path().to_path_buf()], &mut VariableContext::new(), |_| None)
            .expect_err("must error");
        assert!(matches!(err, ExtraArgumentsError::NoMatch { .. }));
    }
}
