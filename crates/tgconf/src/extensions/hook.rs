//! `pre_hook`/`post_hook` blocks
use super::{Extension, ExtensionBase};
use crate::dispatch::CommandDescriptor;
use crate::visit::VisitMut;
use indexmap::IndexMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    #[default]
    PreHook,
    PostHook,
}

/// Point of the run a hook list is requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    /// Before files are imported
    BeforeImports,
    /// After imports, before the state is initialized
    BeforeInitState,
    AfterInitState,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Hook {
    #[serde(flatten)]
    pub base: ExtensionBase,
    #[serde(skip_deserializing, rename = "type")]
    pub hook_type: HookType,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub expand_args: bool,
    /// Commands the hook applies to, all if empty
    #[serde(default)]
    pub on_commands: Vec<String>,
    #[serde(default)]
    pub ignore_error: bool,
    #[serde(default)]
    pub run_on_errors: bool,
    #[serde(default)]
    pub before_imports: bool,
    #[serde(default)]
    pub after_init_state: bool,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub shell_command: bool,
    #[serde(default)]
    pub env_vars: IndexMap<String, String>,
    #[serde(default)]
    pub persistent_env_vars: IndexMap<String, String>,
}

impl Extension for Hook {
    const KIND: &'static str = "hook";
    const ATTRIBUTES: &'static [&'static str] = &[
        "command",
        "arguments",
        "expand_args",
        "on_commands",
        "ignore_error",
        "run_on_errors",
        "before_imports",
        "after_init_state",
        "order",
        "shell_command",
        "env_vars",
        "persistent_env_vars",
    ];

    fn base(&self) -> &ExtensionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ExtensionBase {
        &mut self.base
    }

    fn normalize(&mut self) {
        self.command = self.command.trim().to_string();
    }

    fn visit_strings_mut(&mut self, visitor: &mut dyn VisitMut<String>) {
        self.base.visit_strings_mut(visitor);
        visitor.visit_mut(&mut self.command);
        self.arguments.iter_mut().for_each(|arg| visitor.visit_mut(arg));
        self.env_vars.values_mut().for_each(|value| visitor.visit_mut(value));
        self.persistent_env_vars
            .values_mut()
            .for_each(|value| visitor.visit_mut(value));
    }
}

impl Hook {
    pub fn matches_stage(&self, stage: HookStage) -> bool {
        match stage {
            HookStage::BeforeImports => self.before_imports,
            HookStage::BeforeInitState => !self.after_init_state && !self.before_imports,
            HookStage::AfterInitState => self.after_init_state && !self.before_imports,
        }
    }

    pub fn applies_to(&self, command: Option<&str>) -> bool {
        if self.on_commands.is_empty() {
            return true;
        }
        command.is_some_and(|command| self.on_commands.iter().any(|on| on == command))
    }

    fn descriptor(&self, working_dir: &Path) -> CommandDescriptor {
        let mut env = self.persistent_env_vars.clone();
        env.extend(self.env_vars.iter().map(|(key, value)| (key.clone(), value.clone())));

        CommandDescriptor {
            name: self.base.name.clone(),
            command: self.command.clone(),
            arguments: self.arguments.clone(),
            env,
            working_dir: working_dir.to_path_buf(),
            ignore_error: self.ignore_error,
            shell: self.shell_command,
            expand_args: self.expand_args,
        }
    }
}

/// Stable sort by [Hook::order], the merged declaration order breaks ties
pub fn sort(hooks: &mut [Hook]) {
    hooks.sort_by_key(|hook| hook.order);
}

/// Ordered command descriptors of the hooks to run for `command` at `stage`
///
/// `after_error` drops hooks that do not have `run_on_errors` set.
pub fn command_descriptors(
    hooks: &[Hook],
    command: Option<&str>,
    stage: HookStage,
    after_error: bool,
    working_dir: &Path,
) -> Vec<CommandDescriptor> {
    super::enabled(hooks)
        .filter(|hook| hook.applies_to(command) && hook.matches_stage(stage))
        .filter(|hook| !after_error || hook.run_on_errors)
        .filter(|hook| {
            if hook.command.is_empty() {
                tracing::debug!(name = hook.base.name, "hook skipped, no command to execute");
                return false;
            }
            true
        })
        .map(|hook| hook.descriptor(working_dir))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hook(name: &str, order: i64) -> Hook {
        Hook {
            base: ExtensionBase {
                name: name.to_string(),
                ..Default::default()
            },
            command: format!("echo {name}"),
            order,
            ..Default::default()
        }
    }

    #[test]
    fn sorted_by_order_stable() {
        let mut hooks = vec![hook("a", 2), hook("b", 1), hook("c", 2), hook("d", 0)];
        sort(&mut hooks);
        let names: Vec<&str> = hooks.iter().map(|hook| hook.base.name.as_str()).collect();
        assert_eq!(names, vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn descriptors_are_filtered() {
        let mut plan_only = hook("plan_only", 0);
        plan_only.on_commands = vec!["plan".to_string()];
        let mut before_imports = hook("before_imports", 0);
        before_imports.before_imports = true;
        let mut on_errors = hook("on_errors", 0);
        on_errors.run_on_errors = true;
        on_errors.env_vars.insert("A".into(), "1".into());
        on_errors.persistent_env_vars.insert("A".into(), "0".into());
        on_errors.persistent_env_vars.insert("B".into(), "2".into());
        let mut empty = hook("empty", 0);
        empty.command = String::new();

        let hooks = vec![plan_only, before_imports, on_errors, empty];
        let dir = Path::new("/work");

        let names = |descriptors: Vec<CommandDescriptor>| -> Vec<String> {
            descriptors.into_iter().map(|descriptor| descriptor.name).collect()
        };
        assert_eq!(
            names(command_descriptors(&hooks, Some("plan"), HookStage::BeforeInitState, false, dir)),
            vec!["plan_only", "on_errors"]
        );
        assert_eq!(
            names(command_descriptors(&hooks, Some("apply"), HookStage::BeforeInitState, false, dir)),
            vec!["on_errors"]
        );
        assert_eq!(
            names(command_descriptors(&hooks, Some("plan"), HookStage::BeforeImports, false, dir)),
            vec!["before_imports"]
        );
        let after_error = command_descriptors(&hooks, Some("plan"), HookStage::BeforeInitState, true, dir);
        assert_eq!(after_error.len(), 1);
        assert_eq!(after_error[0].env.get("A").map(String::as_str), Some("1"));
        assert_eq!(after_error[0].env.get("B").map(String::as_str), Some("2"));
        assert_eq!(after_error[0].working_dir, dir);
    }
}
