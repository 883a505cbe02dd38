//! `run_conditions` blocks
use super::{Extension, ExtensionBase};
use crate::value::Map;

/// `run_if` and `ignore_if` gates, see [crate::conditions]
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RunCondition {
    #[serde(flatten)]
    pub base: ExtensionBase,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub run_if: Map,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub ignore_if: Map,
}

impl Extension for RunCondition {
    const KIND: &'static str = "run_conditions";
    const ATTRIBUTES: &'static [&'static str] = &["run_if", "ignore_if"];

    fn base(&self) -> &ExtensionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ExtensionBase {
        &mut self.base
    }
}
