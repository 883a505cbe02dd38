//! run conditions
//!
//! A [Condition] maps variable keys to the values they may take, every clause must match for the condition to hold.
//! Separate conditions are alternatives. `ignore_if` conditions are checked before `run_if` conditions:
//!
//! - any holding deny condition skips the unit, so does a deny condition referencing an undefined variable
//! - without allow conditions the unit runs
//! - otherwise at least one allow condition must hold
use crate::extensions::{self, RunCondition};
use crate::value::Map;
use crate::variables::VariableContext;
use indexmap::IndexMap;
use std::fmt::{Display, Formatter};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConditionError {
    #[error("variable undefined ({0})")]
    Undefined(String),
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Condition {
    /// Run condition item the condition was declared in
    pub origin: String,
    pub clauses: IndexMap<String, Vec<String>>,
}

impl Condition {
    pub fn new(origin: impl Into<String>, clauses: &Map) -> Self {
        Condition {
            origin: origin.into(),
            clauses: clauses
                .iter()
                .map(|(key, accepted)| (key.clone(), accepted.to_string_list()))
                .collect(),
        }
    }

    /// Evaluate every clause
    ///
    /// Keys are looked up in `variables` (dotted keys descend into objects). Other keys go through `interpolate`,
    /// which returns `None` when the key cannot be resolved.
    pub fn is_true(
        &self,
        variables: &VariableContext,
        interpolate: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<bool, ConditionError> {
        for (key, accepted) in &self.clauses {
            let actual = match variables.get(key) {
                Some(value) => value.to_interpolated_string(),
                None => interpolate(key).ok_or_else(|| ConditionError::Undefined(key.clone()))?,
            };
            if !accepted.contains(&actual) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let clauses: Vec<String> = self
            .clauses
            .iter()
            .map(|(key, accepted)| match accepted.as_slice() {
                [single] => format!("{key} = {single}"),
                many => format!("{key} in [{}]", many.join(", ")),
            })
            .collect();
        f.write_str(&clauses.join(" and "))
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct RunConditionSet {
    pub allow: Vec<Condition>,
    pub deny: Vec<Condition>,
}

impl RunConditionSet {
    /// Conditions of the enabled items, in merged order
    pub fn from_items(items: &[RunCondition]) -> Self {
        let mut set = RunConditionSet::default();
        for item in extensions::enabled(items) {
            if !item.run_if.is_empty() {
                set.allow.push(Condition::new(&item.base.name, &item.run_if));
            }
            if !item.ignore_if.is_empty() {
                set.deny.push(Condition::new(&item.base.name, &item.ignore_if));
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }

    /// Whether the unit should run with `variables`
    ///
    /// Keys that are not variables are resolved with `interpolate` (composite keys such as `${var.a}-${var.b}`).
    pub fn should_run(
        &self,
        variables: &VariableContext,
        mut interpolate: impl FnMut(&str) -> Option<String>,
    ) -> bool {
        let mut answer = true;
        for deny in &self.deny {
            match deny.is_true(variables, &mut interpolate) {
                Err(err) => {
                    tracing::warn!(origin = deny.origin, condition=%deny, %err, "ignoring project");
                    answer = false;
                }
                Ok(true) => {
                    tracing::warn!(origin = deny.origin, condition=%deny, "ignoring project because of ignore rule");
                    answer = false;
                }
                Ok(false) => {}
            }
        }
        if !answer {
            return false;
        }

        if self.allow.is_empty() {
            return true;
        }

        for allow in &self.allow {
            match allow.is_true(variables, &mut interpolate) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(origin = allow.origin, condition=%allow, %err, "run condition not evaluated");
                }
            }
        }

        let rules: Vec<String> = self.allow.iter().map(ToString::to_string).collect();
        tracing::warn!(rules = rules.join(" or "), "ignoring project because running condition is not met");
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::Value;
    use crate::variables::VariableSource;
    use pretty_assertions::assert_eq;

    /// Accepted values are comma separated
    fn condition(clauses: &[(&str, &str)]) -> Condition {
        Condition {
            origin: "test".to_string(),
            clauses: clauses
                .iter()
                .map(|(key, values)| (key.to_string(), values.split(',').map(str::to_string).collect()))
                .collect(),
        }
    }

    fn variables(entries: &[(&str, &str)]) -> VariableContext {
        let mut context = VariableContext::new();
        for (key, value) in entries {
            context.set(key, *value, VariableSource::CommandLine);
        }
        context
    }

    fn should_run(set: &RunConditionSet, entries: &[(&str, &str)]) -> bool {
        set.should_run(&variables(entries), |_| None)
    }

    #[test]
    fn truth_table() {
        assert!(should_run(&RunConditionSet::default(), &[]));

        let deny_qa = RunConditionSet {
            deny: vec![condition(&[("env", "qa")])],
            ..Default::default()
        };
        assert!(!should_run(&deny_qa, &[("env", "qa")]));
        assert!(should_run(&deny_qa, &[("env", "dev")]));

        let allow = RunConditionSet {
            allow: vec![condition(&[("env", "dev,qa")])],
            ..Default::default()
        };
        assert!(!should_run(&allow, &[("env", "prod")]));
        assert!(should_run(&allow, &[("env", "qa")]));

        let both = RunConditionSet {
            allow: vec![condition(&[("env", "dev,qa")])],
            deny: vec![condition(&[("region", "us-west-2")])],
        };
        assert!(should_run(&both, &[("env", "qa"), ("region", "us-east-1")]));
        assert!(!should_run(&both, &[("env", "qa"), ("region", "us-west-2")]));
    }

    #[test]
    fn clauses_are_anded_conditions_ored() {
        let set = RunConditionSet {
            allow: vec![
                condition(&[("env", "dev,qa"), ("region", "us-east-1")]),
                condition(&[("env", "prod")]),
            ],
            ..Default::default()
        };
        assert!(!should_run(&set, &[("env", "qa"), ("region", "us-west-2")]));
        assert!(should_run(&set, &[("env", "qa"), ("region", "us-east-1")]));
        assert!(should_run(&set, &[("env", "prod"), ("region", "us-west-2")]));
    }

    #[test]
    fn undefined_variables() {
        let deny = RunConditionSet {
            deny: vec![condition(&[("nonexistent", "value")])],
            ..Default::default()
        };
        assert!(!should_run(&deny, &[]));

        let allow = RunConditionSet {
            allow: vec![condition(&[("nonexistent", "value")]), condition(&[("env", "qa")])],
            ..Default::default()
        };
        assert!(should_run(&allow, &[("env", "qa")]));
        assert!(!should_run(&allow, &[("env", "dev")]));
    }

    #[test]
    fn dotted_and_composite_keys() {
        let mut context = VariableContext::new();
        context.set("config.env", "qa", VariableSource::ConfigFile);
        context.set("region", "us-east-1", VariableSource::ConfigFile);

        let set = RunConditionSet {
            allow: vec![condition(&[("config.env", "qa"), ("${region}-x", "us-east-1-x")])],
            ..Default::default()
        };
        let interpolate = |key: &str| (key == "${region}-x").then(|| "us-east-1-x".to_string());
        assert!(set.should_run(&context, interpolate));
    }

    #[test]
    fn from_items() {
        let mut accepted = Map::new();
        accepted.insert("env".into(), Value::from(vec!["dev", "qa"]));
        let mut disabled = RunCondition {
            run_if: accepted.clone(),
            ..Default::default()
        };
        disabled.base.disabled = true;
        let item = RunCondition {
            base: extensions::ExtensionBase {
                name: "envs".into(),
                ..Default::default()
            },
            run_if: accepted,
            ignore_if: Map::new(),
        };

        let set = RunConditionSet::from_items(&[item, disabled]);
        let mut expected = condition(&[("env", "dev,qa")]);
        expected.origin = "envs".to_string();
        assert_eq!(set.allow, vec![expected]);
        assert!(set.deny.is_empty());
        assert_eq!(set.allow[0].to_string(), "env in [dev, qa]");
    }
}
