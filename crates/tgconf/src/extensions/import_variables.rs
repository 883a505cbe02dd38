//! `import_variables` blocks
use super::{Extension, ExtensionBase};
use crate::loader::{self, LoadError};
use crate::util;
use crate::value::{Map, Value};
use crate::variables::{VariableContext, VariableSource};
use crate::visit::VisitMut;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ImportVariables {
    #[serde(flatten)]
    pub base: ExtensionBase,
    /// `key=value` definitions, a bare `key` imports `null`
    #[serde(default)]
    pub vars: Vec<String>,
    #[serde(default)]
    pub required_var_files: Vec<String>,
    #[serde(default)]
    pub optional_var_files: Vec<String>,
    /// Folders (or sources) the var file patterns are looked up in, the working directory if empty
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub nested_under: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_variables_file: String,
    /// Levels of nested objects folded into `parent_child` keys, negative for unlimited
    #[serde(default)]
    pub flatten_levels: Option<i64>,
    #[serde(default)]
    pub env_vars: IndexMap<String, String>,
    #[serde(default)]
    pub on_commands: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ImportVariablesError {
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

impl Extension for ImportVariables {
    const KIND: &'static str = "import_variables";
    const ATTRIBUTES: &'static [&'static str] = &[
        "vars",
        "required_var_files",
        "optional_var_files",
        "sources",
        "nested_under",
        "output_variables_file",
        "flatten_levels",
        "env_vars",
        "on_commands",
    ];

    fn base(&self) -> &ExtensionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ExtensionBase {
        &mut self.base
    }

    fn normalize(&mut self) {
        self.flatten_levels.get_or_insert(-1);
        if self.nested_under.is_empty() {
            self.nested_under = vec![String::new()];
        }
    }

    fn visit_strings_mut(&mut self, visitor: &mut dyn VisitMut<String>) {
        self.base.visit_strings_mut(visitor);
        for list in [
            &mut self.vars,
            &mut self.required_var_files,
            &mut self.optional_var_files,
            &mut self.sources,
            &mut self.nested_under,
        ] {
            list.iter_mut().for_each(|value| visitor.visit_mut(value));
        }
        visitor.visit_mut(&mut self.output_variables_file);
        self.env_vars.values_mut().for_each(|value| visitor.visit_mut(value));
    }
}

impl ImportVariables {
    pub fn applies_to(&self, command: Option<&str>) -> bool {
        self.on_commands.is_empty() || command.is_some_and(|command| self.on_commands.iter().any(|on| on == command))
    }

    /// Import the variables into `context` with [VariableSource::VarFile] priority
    ///
    /// `folders` are the local folders var file patterns are matched in, the first folder with a match wins.
    /// `env_vars` are added to `env`. Returns the imported (flattened) variables.
    pub fn apply(
        &self,
        context: &mut VariableContext,
        env: &mut IndexMap<String, String>,
        folders: &[PathBuf],
    ) -> Result<Map, ImportVariablesError> {
        tracing::debug!(name = self.base.name, "processing import variables statement");
        env.extend(self.env_vars.iter().map(|(key, value)| (key.clone(), value.clone())));

        let mut imported = Map::new();
        for definition in util::dedup_definitions(&self.vars) {
            let (key, value) = match definition.split_once('=') {
                Some((key, value)) => (key.trim(), Value::String(value.to_string())),
                None => (definition.as_str().trim(), Value::Null),
            };
            let mut single = Map::new();
            single.insert(key.to_string(), value);
            self.import_map(context, single, &mut imported);
        }

        for pattern in util::dedup_keep_last(&self.required_var_files) {
            let files = self.glob_files(&pattern, folders)?;
            if files.is_empty() {
                return Err(ImportVariablesError::NoMatch {
                    name: self.base.name.clone(),
                    pattern,
                });
            }
            for file in files {
                self.import_file(context, &file, &mut imported)?;
            }
        }

        for pattern in util::dedup_keep_last(&self.optional_var_files) {
            for file in self.glob_files(&pattern, folders)? {
                self.import_file(context, &file, &mut imported)?;
            }
        }

        Ok(imported)
    }

    fn import_file(
        &self,
        context: &mut VariableContext,
        file: &Path,
        imported: &mut Map,
    ) -> Result<(), ImportVariablesError> {
        tracing::debug!(name = self.base.name, path=%file.display(), "importing variables file");
        let variables = loader::read_variables_file(file).map_err(|source| ImportVariablesError::Load {
            name: self.base.name.clone(),
            path: file.to_path_buf(),
            source: Box::new(source),
        })?;
        self.import_map(context, variables, imported);
        Ok(())
    }

    fn import_map(&self, context: &mut VariableContext, variables: Map, imported: &mut Map) {
        let levels = self.flatten_levels.unwrap_or(-1);
        for nested in &self.nested_under {
            let scoped = if nested.is_empty() {
                variables.clone()
            } else {
                let mut scoped = Map::new();
                scoped.insert(nested.clone(), Value::Object(variables.clone()));
                scoped
            };
            context.import_map(&scoped, VariableSource::VarFile);

            let flattened = flatten(&scoped, "", levels);
            context.import_map(&flattened, VariableSource::VarFile);
            for (key, value) in flattened {
                imported.insert(key, value);
            }
        }
    }

    fn glob_files(&self, pattern: &str, folders: &[PathBuf]) -> Result<Vec<PathBuf>, ImportVariablesError> {
        util::glob_files(pattern, folders).map_err(|source| ImportVariablesError::Pattern {
            name: self.base.name.clone(),
            pattern: pattern.to_string(),
            source,
        })
    }
}

/// Fold nested objects into `parent_child` keys
///
/// With a negative `levels` every object is folded, except objects whose values are all scalars.
pub fn flatten(map: &Map, prefix: &str, levels: i64) -> Map {
    let mut result = Map::new();
    for (key, value) in map {
        match value {
            Value::Object(nested) => {
                let only_scalars = nested.values().all(|child| !matches!(child, Value::Object(_)));
                if (levels < 0 && !only_scalars) || levels >= 1 {
                    for (nested_key, nested_value) in flatten(nested, &format!("{key}_"), levels - 1) {
                        result.insert(format!("{prefix}{nested_key}"), nested_value);
                    }
                    continue;
                }
                result.insert(format!("{prefix}{key}"), value.clone());
            }
            _ => {
                result.insert(format!("{prefix}{key}"), value.clone());
            }
        }
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn object(entries: &[(&str, Value)]) -> Value {
        Value::Object(entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    fn import() -> ImportVariables {
        let mut item = ImportVariables {
            base: ExtensionBase {
                name: "vars".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        item.normalize();
        item
    }

    #[test]
    fn flatten_levels() {
        let Value::Object(map) = object(&[
            ("plain", "x".into()),
            ("a", object(&[("b", object(&[("c", "1".into())]))])),
            ("scalars", object(&[("d", "2".into())])),
        ]) else {
            unreachable!()
        };

        let unlimited = flatten(&map, "", -1);
        assert_eq!(
            unlimited.keys().collect::<Vec<_>>(),
            vec!["plain", "a_b", "scalars"]
        );

        let one = flatten(&map, "", 1);
        assert_eq!(
            one.keys().collect::<Vec<_>>(),
            vec!["plain", "a_b", "scalars_d"]
        );

        assert_eq!(flatten(&map, "", 0), map);
    }

    #[test]
    fn vars_and_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("common.tfvars"), "region = \"us-east-1\"\nenv = \"file\"\n").expect("write");
        std::fs::write(dir.path().join("extra.json"), r#"{"tags": {"team": "infra"}}"#).expect("write");

        let mut item = import();
        item.vars = vec!["env=ignored".into(), "env=vars".into(), "flag".into()];
        item.required_var_files = vec!["*.tfvars".into()];
        item.optional_var_files = vec!["extra.json".into(), "missing.json".into()];
        item.env_vars.insert("IMPORTED".into(), "yes".into());

        let mut context = VariableContext::new();
        context.set("region", "cli", VariableSource::CommandLine);
        let mut env = IndexMap::new();

        let imported = item
            .apply(&mut context, &mut env, &[dir.path().to_path_buf()])
            .expect("imported");

        assert_eq!(context.get("env"), Some(&Value::from("file")));
        assert_eq!(context.get("region"), Some(&Value::from("cli")));
        assert_eq!(context.get("flag"), Some(&Value::Null));
        assert_eq!(context.get("tags.team"), Some(&Value::from("infra")));
        assert_eq!(env.get("IMPORTED").map(String::as_str), Some("yes"));
        assert_eq!(imported.get("region"), Some(&Value::from("us-east-1")));
    }

    #[test]
    fn nested_under() {
        let mut item = import();
        item.vars = vec!["name=value".into()];
        item.nested_under = vec!["config".into()];

        let mut context = VariableContext::new();
        item.apply(&mut context, &mut IndexMap::new(), &[]).expect("imported");
        assert_eq!(context.get("config.name"), Some(&Value::from("value")));
    }

    #[test]
    fn missing_required_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut item = import();
        item.required_var_files = vec!["*.tfvars".into()];

        let err = item
            .apply(&mut VariableContext::new(), &mut IndexMap::new(), &[dir.path().to_path_buf()])
            .expect_err("must error");
        assert!(matches!(err, ImportVariablesError::NoMatch { .. }));
    }
}
