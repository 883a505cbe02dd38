//! extension items
//!
//! Hooks, extra commands, import rules and the other named blocks of a document are "extension items". They share
//! [ExtensionBase] and are merged along the include chain by the same algorithm, see [merge].
//!
//! A child document overrides a parent item by declaring an item with the same name. The overriding item takes the
//! position of the parent item, so the declared order of the list survives the override.
use crate::visit::VisitMut;
use indexmap::IndexMap;

pub mod approval;
pub mod export;
pub mod extra_args;
pub mod extra_command;
pub mod hook;
pub mod import_files;
pub mod import_variables;
pub mod run_condition;

pub use approval::ApprovalConfig;
pub use export::ExportVariables;
pub use extra_args::ExtraArguments;
pub use extra_command::ExtraCommand;
pub use hook::Hook;
pub use import_files::ImportFiles;
pub use import_variables::ImportVariables;
pub use run_condition::RunCondition;

/// Attributes every extension item accepts
pub const BASE_ATTRIBUTES: &[&str] = &["name", "display_name", "description", "os", "disabled"];

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ExtensionBase {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Operating systems the item applies to, all if empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub os: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl ExtensionBase {
    pub fn enabled(&self) -> bool {
        !self.disabled && (self.os.is_empty() || self.os.iter().any(|os| is_current_os(os)))
    }

    fn visit_strings_mut(&mut self, visitor: &mut dyn VisitMut<String>) {
        visitor.visit_mut(&mut self.display_name);
        visitor.visit_mut(&mut self.description);
    }
}

fn is_current_os(os: &str) -> bool {
    let current = std::env::consts::OS;
    os.eq_ignore_ascii_case(current) || (current == "macos" && os.eq_ignore_ascii_case("darwin"))
}

/// Behavior shared by every extension item type
pub trait Extension: Clone + std::fmt::Debug {
    /// Block identifier the item is declared with
    const KIND: &'static str;
    /// Attributes accepted in addition to [BASE_ATTRIBUTES]
    const ATTRIBUTES: &'static [&'static str];

    fn base(&self) -> &ExtensionBase;
    fn base_mut(&mut self) -> &mut ExtensionBase;

    /// Name used to match items across documents
    fn id(&self) -> &str {
        &self.base().name
    }

    fn enabled(&self) -> bool {
        self.base().enabled()
    }

    /// Fill in defaults, called once per item after decoding
    fn normalize(&mut self) {}

    /// Visit every free-form string of the item
    fn visit_strings_mut(&mut self, visitor: &mut dyn VisitMut<String>) {
        self.base_mut().visit_strings_mut(visitor);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Imported (parent) items go after the current items
    Append,
    /// Imported (parent) items go before the current items
    Prepend,
}

/// Merge `imported` (items of a parent document) into `current` (items of the child document)
///
/// - when `imported` declares a name more than once, only the last declaration is kept
/// - an imported item that also exists in `current` is replaced by the current item, which moves to the position of
///   the imported item
/// - remaining current items are placed before ([MergeMode::Append]) or after ([MergeMode::Prepend]) the imported ones
pub fn merge<T: Extension>(current: &mut Vec<T>, imported: Vec<T>, mode: MergeMode) {
    if imported.is_empty() {
        return;
    }

    let mut index: IndexMap<String, usize> = current
        .iter()
        .enumerate()
        .map(|(position, item)| (item.id().to_string(), position))
        .collect();
    let last_declaration: IndexMap<String, usize> = imported
        .iter()
        .enumerate()
        .map(|(position, item)| (item.id().to_string(), position))
        .collect();

    let mut merged = Vec::with_capacity(imported.len());
    for (position, item) in imported.into_iter().enumerate() {
        let name = item.id().to_string();
        if last_declaration.get(&name) != Some(&position) {
            tracing::warn!(kind = T::KIND, name, "skipping previous definition overridden in the same file");
            continue;
        }
        if let Some(existing) = index.shift_remove(&name) {
            tracing::info!(kind = T::KIND, name, "skipping definition overridden in the current config");
            merged.push(current[existing].clone());
            continue;
        }
        merged.push(item);
    }

    if current.is_empty() {
        *current = merged;
        return;
    }

    if index.len() != current.len() {
        current.retain(|item| index.contains_key(item.id()));
    }

    match mode {
        MergeMode::Append => current.extend(merged),
        MergeMode::Prepend => {
            merged.append(current);
            *current = merged;
        }
    }
}

/// Apply [Extension::normalize] to every item and drop same-file duplicates (keeping the last)
pub fn normalize_list<T: Extension>(items: Vec<T>) -> Vec<T> {
    let mut normalized = Vec::with_capacity(items.len());
    merge(&mut normalized, items, MergeMode::Append);
    for item in normalized.iter_mut() {
        item.normalize();
    }
    normalized
}

/// Enabled items, in order
pub fn enabled<T: Extension>(items: &[T]) -> impl Iterator<Item = &T> {
    items.iter().filter(|item| item.enabled())
}
