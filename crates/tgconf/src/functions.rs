//! helper functions
//!
//! Functions callable from `${...}` spans and from plain HCL function calls (`path = find_in_parent_folders()`).
//! [FunctionTable::builtin] holds the functions every resolution gets; callers can add their own with
//! [FunctionTable::with_function] (available in both places) or [FunctionTable::with_hcl_function] (only available
//! to HCL evaluation).
use crate::interpolation::{EvalError, EvalScope};
use crate::util;
use crate::value::Value;
use indexmap::IndexMap;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Commands accepting `-var` and `-var-file`
pub const COMMANDS_NEEDING_VARS: &[&str] = &[
    "apply", "console", "destroy", "import", "plan", "push", "refresh", "validate",
];

/// Commands accepting `-lock-timeout`
pub const COMMANDS_NEEDING_LOCKING: &[&str] = &[
    "apply", "destroy", "import", "init", "plan", "refresh", "taint", "untaint",
];

/// Commands accepting `-input`
pub const COMMANDS_NEEDING_INPUT: &[&str] = &["apply", "import", "init", "plan", "refresh"];

/// Returned by `get_temp_folder()`, replaced by the download directory once resolution is complete
pub const TEMP_FOLDER_PLACEHOLDER: &str = "@@tgconf:temp_folder@@";

/// Returned by `get_scripts_folder()`, replaced by the scripts directory once resolution is complete
pub const SCRIPTS_FOLDER_PLACEHOLDER: &str = "@@tgconf:scripts_folder@@";

pub type BuiltinFn = fn(&mut EvalScope<'_>, Vec<Value>) -> Result<Value, EvalError>;
pub type ExternalFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

#[derive(Clone)]
pub enum Helper {
    Builtin(BuiltinFn),
    External(ExternalFn),
}

#[derive(Clone, Default)]
pub struct FunctionTable {
    helpers: IndexMap<String, Helper>,
    hcl_functions: IndexMap<String, hcl::eval::FuncDef>,
}

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTable")
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .field("hcl_functions", &self.hcl_functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctionTable {
    pub fn builtin() -> Self {
        let mut table = Self::default();
        table.register("find_in_parent_folders", find_in_parent_folders);
        table.register("path_relative_to_include", path_relative_to_include);
        table.register("path_relative_from_include", path_relative_from_include);
        table.register("get_env", get_env);
        table.register("get_current_dir", get_current_dir);
        table.register("get_leaf_dir", get_leaf_dir);
        table.register("get_tfvars_dir", get_leaf_dir);
        table.register("get_parent_dir", get_parent_dir);
        table.register("get_parent_tfvars_dir", get_parent_dir);
        table.register("get_aws_account_id", get_aws_account_id);
        table.register("get_parameter", get_parameter);
        table.register("set_global_variable", set_global_variable);
        table.register("get_terraform_commands_that_need_vars", |_, args| {
            command_list("get_terraform_commands_that_need_vars", &args, COMMANDS_NEEDING_VARS)
        });
        table.register("get_terraform_commands_that_need_locking", |_, args| {
            command_list("get_terraform_commands_that_need_locking", &args, COMMANDS_NEEDING_LOCKING)
        });
        table.register("get_terraform_commands_that_need_input", |_, args| {
            command_list("get_terraform_commands_that_need_input", &args, COMMANDS_NEEDING_INPUT)
        });
        table.register("get_temp_folder", |_, args| {
            expect_args("get_temp_folder", &args, 0..=0)?;
            Ok(TEMP_FOLDER_PLACEHOLDER.into())
        });
        table.register("get_scripts_folder", |_, args| {
            expect_args("get_scripts_folder", &args, 0..=0)?;
            Ok(SCRIPTS_FOLDER_PLACEHOLDER.into())
        });
        table.register("default", default);
        table
    }

    pub fn register(&mut self, name: &str, function: BuiltinFn) {
        self.helpers.insert(name.to_string(), Helper::Builtin(function));
    }

    /// Add a function usable in `${...}` spans and HCL function calls
    pub fn with_function(
        mut self,
        name: &str,
        function: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.helpers
            .insert(name.to_string(), Helper::External(Arc::new(function)));
        self
    }

    /// Add a function only known to HCL evaluation
    pub fn with_hcl_function(mut self, name: &str, function: hcl::eval::FuncDef) -> Self {
        self.hcl_functions.insert(name.to_string(), function);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.helpers.keys().map(String::as_str)
    }

    pub(crate) fn hcl_functions(&self) -> impl Iterator<Item = (&str, &hcl::eval::FuncDef)> {
        self.hcl_functions
            .iter()
            .map(|(name, function)| (name.as_str(), function))
    }

    pub fn call(&self, scope: &mut EvalScope<'_>, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        let helper = self
            .helpers
            .get(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;

        tracing::trace!(function = name, args = args.len(), "calling helper function");
        match helper {
            Helper::Builtin(function) => function(scope, args),
            Helper::External(function) => function(&args).map_err(|message| EvalError::External {
                function: name.to_string(),
                message,
            }),
        }
    }
}

fn expect_args(function: &str, args: &[Value], expected: RangeInclusive<usize>) -> Result<(), EvalError> {
    if expected.contains(&args.len()) {
        return Ok(());
    }
    Err(EvalError::ArgumentCount {
        function: function.to_string(),
        expected: if expected.start() == expected.end() {
            expected.start().to_string()
        } else {
            format!("{} to {}", expected.start(), expected.end())
        },
        actual: args.len(),
    })
}

fn string_arg(function: &str, args: &[Value], index: usize) -> Result<Option<String>, EvalError> {
    match args.get(index) {
        None => Ok(None),
        Some(Value::Array(_) | Value::Object(_)) => Err(EvalError::InvalidArgument {
            function: function.to_string(),
            reason: format!("argument {} must be a string", index + 1),
        }),
        Some(value) => Ok(Some(value.to_interpolated_string())),
    }
}

fn path_value(path: &Path) -> Value {
    Value::String(util::to_slash(path))
}

fn relative(from: &Path, to: &Path) -> Result<String, EvalError> {
    util::relative_path(from, to).ok_or_else(|| EvalError::RelativePath {
        path: from.to_path_buf(),
        base: to.to_path_buf(),
    })
}

/// Directory of the document currently being evaluated
fn current_document_dir(scope: &EvalScope<'_>) -> PathBuf {
    util::parent_dir(&scope.options.absolute(&scope.include.path))
}

fn include_dir(scope: &EvalScope<'_>) -> PathBuf {
    scope
        .include
        .nearest_explicit_dir(&scope.options.working_dir)
        .unwrap_or_else(|| scope.options.config_dir())
}

/// `find_in_parent_folders([name], [fallback])`
fn find_in_parent_folders(scope: &mut EvalScope<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    const NAME: &str = "find_in_parent_folders";
    expect_args(NAME, &args, 0..=2)?;
    let file_name = string_arg(NAME, &args, 0)?.filter(|name| !name.is_empty());
    let fallback = string_arg(NAME, &args, 1)?;

    let start = current_document_dir(scope);
    let document = scope.options.absolute(&scope.include.path);
    let mut previous = start.clone();

    for _ in 0..scope.options.max_parent_folders {
        let Some(current) = previous.parent().map(Path::to_path_buf) else {
            return match fallback {
                Some(fallback) => Ok(fallback.into()),
                None => Err(EvalError::ParentConfigNotFound(document)),
            };
        };

        let found = match &file_name {
            Some(file_name) => Some(current.join(file_name)).filter(|candidate| candidate.is_file()),
            None => scope.options.find_config_in(&current),
        };
        if let Some(found) = found {
            tracing::debug!(path=%found.display(), "found configuration in parent folder");
            return Ok(relative(&found, &start)?.into());
        }

        previous = current;
    }

    Err(EvalError::TooManyParentFolders {
        path: document,
        max: scope.options.max_parent_folders,
    })
}

fn path_relative_to_include(scope: &mut EvalScope<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    expect_args("path_relative_to_include", &args, 0..=0)?;
    Ok(relative(&scope.options.config_dir(), &include_dir(scope))?.into())
}

fn path_relative_from_include(scope: &mut EvalScope<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    expect_args("path_relative_from_include", &args, 0..=0)?;
    Ok(relative(&include_dir(scope), &scope.options.config_dir())?.into())
}

/// `get_env(name, [default])`
fn get_env(scope: &mut EvalScope<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    const NAME: &str = "get_env";
    expect_args(NAME, &args, 1..=2)?;
    let name = string_arg(NAME, &args, 0)?.unwrap_or_default();
    if name.is_empty() {
        return Err(EvalError::InvalidArgument {
            function: NAME.to_string(),
            reason: "the variable name must not be empty".to_string(),
        });
    }

    match scope.options.env.get(&name) {
        Some(value) => Ok(value.as_str().into()),
        None => Ok(string_arg(NAME, &args, 1)?.unwrap_or_default().into()),
    }
}

fn get_current_dir(scope: &mut EvalScope<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    expect_args("get_current_dir", &args, 0..=0)?;
    Ok(path_value(&current_document_dir(scope)))
}

fn get_leaf_dir(scope: &mut EvalScope<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    expect_args("get_leaf_dir", &args, 0..=0)?;
    Ok(path_value(&scope.options.config_dir()))
}

fn get_parent_dir(scope: &mut EvalScope<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    expect_args("get_parent_dir", &args, 0..=0)?;
    let child = scope.options.config_dir();
    let from_include = relative(&include_dir(scope), &child)?;
    Ok(path_value(&util::clean_path(&child.join(from_include))))
}

fn get_aws_account_id(scope: &mut EvalScope<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    expect_args("get_aws_account_id", &args, 0..=0)?;
    scope
        .collaborators
        .account_id()
        .map(Value::String)
        .map_err(|source| EvalError::Collaborator {
            function: "get_aws_account_id".to_string(),
            source,
        })
}

fn get_parameter(scope: &mut EvalScope<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    const NAME: &str = "get_parameter";
    expect_args(NAME, &args, 1..=1)?;
    let name = string_arg(NAME, &args, 0)?.unwrap_or_default();
    scope
        .collaborators
        .parameter(&name)
        .map(Value::String)
        .map_err(|source| EvalError::Collaborator {
            function: NAME.to_string(),
            source,
        })
}

/// `set_global_variable(key, value)`, an empty key spreads an object value
fn set_global_variable(scope: &mut EvalScope<'_>, mut args: Vec<Value>) -> Result<Value, EvalError> {
    const NAME: &str = "set_global_variable";
    expect_args(NAME, &args, 2..=2)?;
    let key = string_arg(NAME, &args, 0)?.unwrap_or_default();
    let value = args.pop().unwrap_or_default();

    if !key.is_empty() {
        scope.state.set_global(&key, value);
        return Ok(Value::String(String::new()));
    }

    let Value::Object(entries) = value else {
        return Err(EvalError::InvalidArgument {
            function: NAME.to_string(),
            reason: "an empty key requires an object value".to_string(),
        });
    };
    for (key, value) in entries {
        scope.state.set_global(&key, value);
    }
    Ok(Value::String(String::new()))
}

fn command_list(function: &str, args: &[Value], commands: &[&str]) -> Result<Value, EvalError> {
    expect_args(function, args, 0..=0)?;
    Ok(commands.to_vec().into())
}

/// `default(value, fallback)`
fn default(_: &mut EvalScope<'_>, mut args: Vec<Value>) -> Result<Value, EvalError> {
    expect_args("default", &args, 2..=2)?;
    let fallback = args.pop().unwrap_or_default();
    let value = args.pop().unwrap_or_default();
    if value.is_empty_string() {
        return Ok(fallback);
    }
    Ok(value)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collaborators::Collaborators;
    use crate::include::Include;
    use crate::interpolation::EvalState;
    use crate::options::ResolveOptions;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn call(
        options: &ResolveOptions,
        include: &Include,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, EvalError> {
        let collaborators = Collaborators::default();
        let mut state = EvalState::new(options.seed_variables());
        let mut scope = EvalScope {
            include,
            options,
            collaborators: &collaborators,
            state: &mut state,
        };
        FunctionTable::builtin().call(&mut scope, name, args)
    }

    fn options(config_path: &str) -> ResolveOptions {
        ResolveOptions::new(config_path.into(), "/work".into())
    }

    #[test]
    fn relative_to_include() {
        let options = options("/repo/child/sub/terragrunt.hcl");
        let root = Arc::new(Include::root("/repo/child/sub/terragrunt.hcl"));
        let parent = root.child("/repo/terragrunt.hcl", None);

        assert_eq!(
            call(&options, &parent, "path_relative_to_include", vec![]).expect("ok"),
            Value::from("child/sub")
        );
        assert_eq!(
            call(&options, &parent, "path_relative_from_include", vec![]).expect("ok"),
            Value::from("../..")
        );
        assert_eq!(
            call(&options, &parent, "get_parent_dir", vec![]).expect("ok"),
            Value::from("/repo")
        );
        assert_eq!(
            call(&options, &root, "path_relative_to_include", vec![]).expect("ok"),
            Value::from(".")
        );
    }

    #[test]
    fn parent_dir_with_relative_include() {
        let options = options("/repo/child/sub-child/sub-sub-child/terragrunt.hcl");
        let root = Arc::new(Include::root(
            "/repo/child/sub-child/sub-sub-child/terragrunt.hcl",
        ));
        let parent = root.child("/repo/terragrunt.hcl", None);

        assert_eq!(
            call(&options, &parent, "get_parent_tfvars_dir", vec![]).expect("ok"),
            Value::from("/repo")
        );
        assert_eq!(
            call(&options, &parent, "get_tfvars_dir", vec![]).expect("ok"),
            Value::from("/repo/child/sub-child/sub-sub-child")
        );
        assert_eq!(
            call(&options, &parent, "get_current_dir", vec![]).expect("ok"),
            Value::from("/repo")
        );
    }

    #[test]
    fn get_env() {
        let options = options("/repo/terragrunt.hcl").with_env("PRESENT", "value");
        let include = Include::root("/repo/terragrunt.hcl");

        assert_eq!(
            call(&options, &include, "get_env", vec!["PRESENT".into(), "default".into()]).expect("ok"),
            Value::from("value")
        );
        assert_eq!(
            call(&options, &include, "get_env", vec!["MISSING".into(), "default".into()]).expect("ok"),
            Value::from("default")
        );
        let err = call(&options, &include, "get_env", vec!["".into(), "default".into()])
            .expect_err("must error");
        assert!(matches!(err, EvalError::InvalidArgument { .. }));
    }

    #[test]
    fn command_lists() {
        let options = options("/repo/terragrunt.hcl");
        let include = Include::root("/repo/terragrunt.hcl");
        assert_eq!(
            call(&options, &include, "get_terraform_commands_that_need_input", vec![]).expect("ok"),
            Value::from(vec!["apply", "import", "init", "plan", "refresh"])
        );
        let err = call(
            &options,
            &include,
            "get_terraform_commands_that_need_vars",
            vec!["extra".into()],
        )
        .expect_err("must error");
        assert!(matches!(err, EvalError::ArgumentCount { actual: 1, .. }));
    }

    #[test]
    fn find_in_parent_folders() {
        let root = tempfile::tempdir().expect("tempdir");
        let child = root.path().join("child").join("sub");
        std::fs::create_dir_all(&child).expect("mkdir");
        std::fs::write(root.path().join("terragrunt.hcl"), "").expect("write");
        let config_path = child.join("terragrunt.hcl");

        let options = ResolveOptions::new(config_path.clone(), child.clone());
        let include = Include::root(config_path);
        assert_eq!(
            call(&options, &include, "find_in_parent_folders", vec![]).expect("ok"),
            Value::from("../../terragrunt.hcl")
        );
    }

    #[test]
    fn find_in_parent_folders_is_bounded() {
        let root = tempfile::tempdir().expect("tempdir");
        let deep = root.path().join("a").join("b").join("c");
        std::fs::create_dir_all(&deep).expect("mkdir");
        let config_path = deep.join("terragrunt.hcl");

        let mut options = ResolveOptions::new(config_path.clone(), deep.clone());
        options.config_names = vec!["never-exists.hcl".to_string()];
        options.max_parent_folders = 2;
        let include = Include::root(config_path.clone());

        let err = call(&options, &include, "find_in_parent_folders", vec![]).expect_err("must error");
        assert!(matches!(err, EvalError::TooManyParentFolders { max: 2, .. }));

        options.max_parent_folders = 1000;
        let err = call(&options, &include, "find_in_parent_folders", vec![]).expect_err("must error");
        assert!(matches!(err, EvalError::ParentConfigNotFound(_)));

        assert_eq!(
            call(
                &options,
                &include,
                "find_in_parent_folders",
                vec!["never-exists.hcl".into(), "fallback".into()]
            )
            .expect("fallback"),
            Value::from("fallback")
        );
    }

    #[test]
    fn set_global_variable() {
        let options = options("/repo/terragrunt.hcl").with_variable("explicit", "cli");
        let include = Include::root("/repo/terragrunt.hcl");
        let collaborators = Collaborators::default();
        let mut state = EvalState::new(options.seed_variables());
        let mut scope = EvalScope {
            include: &include,
            options: &options,
            collaborators: &collaborators,
            state: &mut state,
        };
        let table = FunctionTable::builtin();

        table
            .call(&mut scope, "set_global_variable", vec!["region".into(), "us-east-1".into()])
            .expect("ok");
        table
            .call(&mut scope, "set_global_variable", vec!["explicit".into(), "fn".into()])
            .expect("ok");
        let mut spread = crate::value::Map::new();
        spread.insert("a".into(), "1".into());
        spread.insert("b".into(), "2".into());
        table
            .call(&mut scope, "set_global_variable", vec!["".into(), Value::Object(spread)])
            .expect("ok");
        table
            .call(&mut scope, "set_global_variable", vec!["".into(), "not a map".into()])
            .expect_err("must error");

        let variables = &state.variables;
        assert_eq!(variables.get("region"), Some(&Value::from("us-east-1")));
        assert_eq!(variables.get("explicit"), Some(&Value::from("cli")));
        assert_eq!(variables.get("a"), Some(&Value::from("1")));
        assert_eq!(variables.get("b"), Some(&Value::from("2")));
    }

    #[test]
    fn external_functions() {
        let options = options("/repo/terragrunt.hcl");
        let include = Include::root("/repo/terragrunt.hcl");
        let collaborators = Collaborators::default();
        let mut state = EvalState::new(options.seed_variables());
        let mut scope = EvalScope {
            include: &include,
            options: &options,
            collaborators: &collaborators,
            state: &mut state,
        };
        let table = FunctionTable::builtin()
            .with_function("upper", |args| {
                Ok(args
                    .first()
                    .map(|value| value.to_interpolated_string().to_uppercase())
                    .unwrap_or_default()
                    .into())
            })
            .with_function("broken", |_| Err("boom".to_string()));

        assert_eq!(
            table.call(&mut scope, "upper", vec!["abc".into()]).expect("ok"),
            Value::from("ABC")
        );
        assert!(matches!(
            table.call(&mut scope, "broken", vec![]),
            Err(EvalError::External { .. })
        ));
        assert!(matches!(
            table.call(&mut scope, "nope", vec![]),
            Err(EvalError::UnknownFunction(name)) if name == "nope"
        ));
    }
}
