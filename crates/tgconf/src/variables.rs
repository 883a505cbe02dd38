//! variable context
//!
//! An ordered store of variables where every entry remembers which source contributed it. Sources are ranked (see
//! [VariableSource]) and a lower ranked source never replaces a value set by a higher ranked one.
//!
//! Dotted keys address nested objects: setting `a.b = 1` produces `a = { b = 1 }` and `get("a.b")` reads it back.
use crate::value::{Map, Value};
use indexmap::IndexMap;

/// Where a variable came from, ordered from lowest to highest priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableSource {
    Default,
    /// `inputs` of a configuration document or a bootstrap variables file
    ConfigFile,
    /// `-var-file` style imports
    VarFile,
    Environment,
    /// `set_global_variable()`
    FunctionSet,
    /// explicit `-var` input from the caller
    CommandLine,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct VariableEntry {
    pub value: Value,
    pub source: VariableSource,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableContext {
    entries: IndexMap<String, VariableEntry>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable honoring source priority
    ///
    /// Returns `false` if the existing entry has a higher priority and the set was ignored. Object values are merged
    /// key by key instead of being replaced.
    pub fn set(&mut self, key: &str, value: impl Into<Value>, source: VariableSource) -> bool {
        let (key, value) = nest_dotted_key(key, value.into());

        if !self.entries.contains_key(&key) {
            tracing::trace!(key, ?source, "variable set");
            self.entries.insert(key, VariableEntry { value, source });
            return true;
        }
        let Some(existing) = self.entries.get_mut(&key) else {
            return false;
        };

        let same_config_level =
            existing.source == VariableSource::ConfigFile && source == VariableSource::ConfigFile;

        if let (Value::Object(_), Value::Object(_)) = (&existing.value, &value) {
            let incoming_wins = source >= existing.source && !same_config_level;
            existing.value.merge(value, incoming_wins);
            existing.source = existing.source.max(source);
            tracing::trace!(key, ?source, "variable merged");
            return true;
        }

        if existing.source > source || same_config_level {
            tracing::trace!(key, ?source, existing=?existing.source, "variable set ignored");
            return false;
        }

        tracing::trace!(key, ?source, "variable overwritten");
        *existing = VariableEntry { value, source };
        true
    }

    /// Set every entry of `map`
    pub fn import_map(&mut self, map: &Map, source: VariableSource) {
        for (key, value) in map {
            self.set(key, value.clone(), source);
        }
    }

    /// Look up a variable, descending into objects for dotted keys
    ///
    /// An exact top-level match wins over the dotted interpretation.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some(entry) = self.entries.get(key) {
            return Some(&entry.value);
        }

        let mut segments = key.split('.');
        let root = self.entries.get(segments.next()?)?;
        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() {
            return None;
        }
        root.value.get_path(&rest)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn entry(&self, key: &str) -> Option<&VariableEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariableEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All variables as a plain object
    pub fn to_map(&self) -> Map {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// All variables, plus a `var` object mirroring them for legacy `var.name` references
    pub fn to_map_with_legacy_alias(&self) -> Map {
        let mut map = self.to_map();
        let alias = Value::Object(map.clone());
        map.insert("var".to_string(), alias);
        map
    }
}

fn nest_dotted_key(key: &str, value: Value) -> (String, Value) {
    let mut segments: Vec<&str> = key.split('.').collect();
    let root = segments.remove(0).to_string();
    let value = segments.into_iter().rev().fold(value, |inner, segment| {
        let mut map = Map::new();
        map.insert(segment.to_string(), inner);
        Value::Object(map)
    });
    (root, value)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lower_priority_does_not_overwrite() {
        let mut ctx = VariableContext::new();
        assert!(ctx.set("env", "cli", VariableSource::CommandLine));
        assert!(!ctx.set("env", "file", VariableSource::VarFile));
        assert_eq!(ctx.get("env"), Some(&Value::from("cli")));

        assert!(ctx.set("region", "file", VariableSource::VarFile));
        assert!(ctx.set("region", "env", VariableSource::Environment));
        assert_eq!(ctx.get("region"), Some(&Value::from("env")));
        assert_eq!(
            ctx.entry("region").map(|entry| entry.source),
            Some(VariableSource::Environment)
        );
    }

    #[test]
    fn first_config_file_definition_wins() {
        let mut ctx = VariableContext::new();
        ctx.set("name", "child", VariableSource::ConfigFile);
        ctx.set("name", "parent", VariableSource::ConfigFile);
        assert_eq!(ctx.get("name"), Some(&Value::from("child")));

        let mut tags = Map::new();
        tags.insert("team".into(), "child".into());
        ctx.set("tags", tags, VariableSource::ConfigFile);
        let mut tags = Map::new();
        tags.insert("team".into(), "parent".into());
        tags.insert("owner".into(), "parent".into());
        ctx.set("tags", tags, VariableSource::ConfigFile);
        assert_eq!(ctx.get("tags.team"), Some(&Value::from("child")));
        assert_eq!(ctx.get("tags.owner"), Some(&Value::from("parent")));
    }

    #[test]
    fn command_line_beats_function_set() {
        let mut ctx = VariableContext::new();
        ctx.set("env", "cli", VariableSource::CommandLine);
        assert!(!ctx.set("env", "fn", VariableSource::FunctionSet));
        assert_eq!(ctx.get("env"), Some(&Value::from("cli")));
    }

    #[test]
    fn dotted_keys() {
        let mut ctx = VariableContext::new();
        ctx.set("my_map.my_var", "a", VariableSource::Default);
        ctx.set("my_map.other", "b", VariableSource::VarFile);

        assert_eq!(ctx.get("my_map.my_var"), Some(&Value::from("a")));
        assert_eq!(ctx.get("my_map.other"), Some(&Value::from("b")));
        assert_eq!(ctx.get("my_map.missing"), None);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn object_merge_respects_priority() {
        let mut ctx = VariableContext::new();
        ctx.set("tags.owner", "cli", VariableSource::CommandLine);
        ctx.set("tags.owner", "file", VariableSource::VarFile);
        ctx.set("tags.team", "file", VariableSource::VarFile);

        assert_eq!(ctx.get("tags.owner"), Some(&Value::from("cli")));
        assert_eq!(ctx.get("tags.team"), Some(&Value::from("file")));
    }

    #[test]
    fn legacy_alias() {
        let mut ctx = VariableContext::new();
        ctx.set("env", "qa", VariableSource::Default);
        let map = ctx.to_map_with_legacy_alias();

        assert_eq!(map.get("env"), Some(&Value::from("qa")));
        assert_eq!(
            map.get("var").and_then(|var| var.get_path(&["env"])),
            Some(&Value::from("qa"))
        );
    }
}
