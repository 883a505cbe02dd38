//! `approval_config` blocks
use super::{Extension, ExtensionBase};
use crate::visit::VisitMut;

/// Statements to wait for while a command runs: `expect_statements` ask for approval, `completed_statements` end it
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ApprovalConfig {
    #[serde(flatten)]
    pub base: ExtensionBase,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub expect_statements: Vec<String>,
    #[serde(default)]
    pub completed_statements: Vec<String>,
}

impl Extension for ApprovalConfig {
    const KIND: &'static str = "approval_config";
    const ATTRIBUTES: &'static [&'static str] = &["commands", "expect_statements", "completed_statements"];

    fn base(&self) -> &ExtensionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ExtensionBase {
        &mut self.base
    }

    fn visit_strings_mut(&mut self, visitor: &mut dyn VisitMut<String>) {
        self.base.visit_strings_mut(visitor);
        self.expect_statements.iter_mut().for_each(|value| visitor.visit_mut(value));
        self.completed_statements.iter_mut().for_each(|value| visitor.visit_mut(value));
    }
}

/// First enabled approval config listing `command`
pub fn approval_for<'a>(list: &'a [ApprovalConfig], command: &str) -> Option<&'a ApprovalConfig> {
    super::enabled(list).find(|approval| approval.commands.iter().any(|on| on == command))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn approval(name: &str, commands: &[&str]) -> ApprovalConfig {
        ApprovalConfig {
            base: ExtensionBase {
                name: name.to_string(),
                ..Default::default()
            },
            commands: commands.iter().map(|s| s.to_string()).collect(),
            expect_statements: vec!["Enter a value:".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn first_matching_config() {
        let mut disabled = approval("disabled", &["apply"]);
        disabled.base.disabled = true;
        let list = vec![disabled, approval("apply", &["apply", "destroy"]), approval("other", &["apply"])];

        assert_eq!(approval_for(&list, "destroy").map(|a| a.base.name.as_str()), Some("apply"));
        assert_eq!(approval_for(&list, "apply").map(|a| a.base.name.as_str()), Some("apply"));
        assert_eq!(approval_for(&list, "plan"), None);
    }
}
