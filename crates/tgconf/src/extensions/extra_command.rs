//! `extra_command` blocks
//!
//! An extra command makes an external program callable through the tool (`tgconf`-managed commands beside the
//! provisioning tool's own). Besides its `commands`, a definition can declare `aliases`. An alias written as
//! `name=real command` runs a different command than its name suggests.
use super::{Extension, ExtensionBase};
use crate::visit::VisitMut;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ExtraCommand {
    #[serde(flatten)]
    pub base: ExtensionBase,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub expand_args: Option<bool>,
    #[serde(default)]
    pub use_state: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub act_as: String,
    #[serde(default, rename = "version", skip_serializing_if = "String::is_empty")]
    pub version_arg: String,
    #[serde(default)]
    pub shell_command: bool,
    #[serde(default)]
    pub ignore_error: bool,
}

/// Result of looking up a command among the extra commands
#[derive(Debug, Clone, PartialEq)]
pub struct ActualCommand<'a> {
    /// Command to execute
    pub command: String,
    /// Provisioning tool command this command behaves like (e.g. `plan` when it uses the state)
    pub behave_as: Option<String>,
    pub extra: Option<&'a ExtraCommand>,
}

/// Names usable as a command on their own
fn is_valid_name(name: &str) -> bool {
    static VALID_NAME: OnceLock<Option<Regex>> = OnceLock::new();
    VALID_NAME
        .get_or_init(|| Regex::new(r"^[\w.-]+$").ok())
        .as_ref()
        .is_some_and(|regex| regex.is_match(name))
}

impl Extension for ExtraCommand {
    const KIND: &'static str = "extra_command";
    const ATTRIBUTES: &'static [&'static str] = &[
        "commands",
        "aliases",
        "arguments",
        "expand_args",
        "use_state",
        "act_as",
        "version",
        "shell_command",
        "ignore_error",
    ];

    fn base(&self) -> &ExtensionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ExtensionBase {
        &mut self.base
    }

    fn normalize(&mut self) {
        if self.commands.is_empty() {
            self.commands = vec![self.base.name.clone()];
        } else if is_valid_name(&self.base.name) && !self.names().contains(&self.base.name) {
            self.aliases.push(self.base.name.clone());
        }

        self.use_state.get_or_insert(false);
        self.expand_args.get_or_insert(true);
    }

    fn visit_strings_mut(&mut self, visitor: &mut dyn VisitMut<String>) {
        self.base.visit_strings_mut(visitor);
        self.commands.iter_mut().for_each(|command| visitor.visit_mut(command));
        self.arguments.iter_mut().for_each(|arg| visitor.visit_mut(arg));
        visitor.visit_mut(&mut self.act_as);
        visitor.visit_mut(&mut self.version_arg);
    }
}

impl ExtraCommand {
    /// Sorted, deduplicated command and alias names (without `=...` targets)
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.commands.len() + self.aliases.len());
        for name in self.commands.iter().chain(self.aliases.iter()) {
            let name = name.split('=').next().unwrap_or_default().trim().to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names.sort();
        names
    }

    fn resolve_alias(&self, cmd: &str) -> Option<String> {
        self.aliases.iter().find_map(|alias| {
            let (name, command) = alias.split_once('=').unwrap_or((alias.as_str(), ""));
            if name.trim() != cmd {
                return None;
            }
            if command.trim().is_empty() {
                return self.commands.first().cloned();
            }
            Some(command.trim().to_string())
        })
    }

    /// `None` if neither a command nor an alias of this definition is `cmd`
    pub fn resolve(&self, cmd: &str) -> Option<ActualCommand<'_>> {
        let command = match self.resolve_alias(cmd) {
            Some(command) => command,
            None if self.commands.iter().any(|command| command == cmd) => cmd.to_string(),
            None => return None,
        };

        let behave_as = if !self.act_as.is_empty() {
            Some(self.act_as.clone())
        } else if self.use_state.unwrap_or(true) {
            Some("plan".to_string())
        } else {
            None
        };

        Some(ActualCommand {
            command,
            behave_as,
            extra: Some(self),
        })
    }
}

/// Find the enabled definition owning `cmd`, or treat `cmd` as a plain command
pub fn actual_command<'a>(commands: &'a [ExtraCommand], cmd: &str) -> ActualCommand<'a> {
    super::enabled(commands)
        .find_map(|extra| extra.resolve(cmd))
        .unwrap_or_else(|| ActualCommand {
            command: cmd.to_string(),
            behave_as: None,
            extra: None,
        })
}
