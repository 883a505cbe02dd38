//! configuration documents
//!
//! [ConfigDocument] is one decoded file. Decoding works on an evaluated [hcl::Body]: every `${...}` span has been
//! substituted and every expression evaluated before the structure is looked at.
//!
//! JSON and YAML documents are converted to the same block/attribute model by [structured_to_body]. Keys naming a
//! known block kind become blocks, everything else becomes an attribute.
use crate::extensions::{
    self, ApprovalConfig, ExportVariables, Extension, ExtraArguments, ExtraCommand, Hook, ImportFiles,
    ImportVariables, RunCondition,
};
use crate::extensions::hook::HookType;
use crate::include::IncludeDirective;
use crate::value::{Map, Value};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Once;

#[derive(thiserror::Error, Debug)]
#[error("{}: {message}", path.display())]
pub struct DecodeError {
    pub path: PathBuf,
    pub message: String,
}

impl DecodeError {
    fn new(path: &Path, message: impl Into<String>) -> Self {
        DecodeError {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RemoteState {
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub config: Map,
}

/// Shape of a block kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockShape {
    /// At most one, no label
    Single,
    /// Named by its label
    Labelled,
    /// Label is optional, unlabelled blocks get a generated name
    OptionallyLabelled,
}

fn block_shape(identifier: &str) -> Option<BlockShape> {
    Some(match identifier {
        "include" | "terraform" | "remote_state" | "dependencies" => BlockShape::Single,
        "pre_hook" | "before_hook" | "pre_hooks" | "post_hook" | "after_hook" | "post_hooks" | "extra_command"
        | "import_files" | "import_variables" | "extra_arguments" | "approval_config" => BlockShape::Labelled,
        "run_conditions" | "export_variables" => BlockShape::OptionallyLabelled,
        _ => return None,
    })
}

const ATTRIBUTES: &[&str] = &[
    "description",
    "uniqueness_criteria",
    "assume_role",
    "assume_role_duration_hours",
    "inputs",
];

/// A single decoded configuration file
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ConfigDocument {
    pub path: PathBuf,
    /// Remote source the document was fetched from
    pub source: Option<String>,
    pub include: Option<IncludeDirective>,
    pub description: Option<String>,
    pub terraform_source: Option<String>,
    pub remote_state: Option<RemoteState>,
    /// Paths as declared
    pub dependencies: Option<Vec<String>>,
    pub uniqueness_criteria: Option<String>,
    pub assume_role: Option<Vec<String>>,
    pub assume_role_duration_hours: Option<i64>,
    pub inputs: Map,
    pub pre_hooks: Vec<Hook>,
    pub post_hooks: Vec<Hook>,
    pub extra_commands: Vec<ExtraCommand>,
    pub import_files: Vec<ImportFiles>,
    pub import_variables: Vec<ImportVariables>,
    pub extra_arguments: Vec<ExtraArguments>,
    pub approval_configs: Vec<ApprovalConfig>,
    pub run_conditions: Vec<RunCondition>,
    pub export_variables: Vec<ExportVariables>,
}

impl ConfigDocument {
    /// Document used in place of a missing file
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        ConfigDocument {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn dir(&self) -> PathBuf {
        crate::util::parent_dir(&self.path)
    }

    /// Decode an evaluated body
    ///
    /// Unknown blocks and attributes are ignored with a warning, see [ConfigDocument::has_content].
    #[tracing::instrument(level = "trace", skip_all, fields(path=%path.display()))]
    pub fn decode(body: hcl::Body, path: &Path) -> Result<Self, DecodeError> {
        let mut document = ConfigDocument::empty(path);
        let mut counters: indexmap::IndexMap<String, usize> = Default::default();

        for structure in body.into_iter() {
            match structure {
                hcl::Structure::Attribute(attribute) => {
                    document.decode_attribute(attribute.key.as_str(), attribute.expr, path)?
                }
                hcl::Structure::Block(block) => {
                    let identifier = block.identifier.as_str().to_string();
                    let index = counters.entry(identifier.clone()).or_default();
                    *index += 1;
                    document.decode_block(&identifier, block, *index - 1, path)?;
                }
            }
        }

        document.pre_hooks.iter_mut().for_each(|hook| hook.hook_type = HookType::PreHook);
        document.post_hooks.iter_mut().for_each(|hook| hook.hook_type = HookType::PostHook);
        Ok(document)
    }

    /// Whether any known block or attribute was decoded
    pub fn has_content(&self) -> bool {
        *self != ConfigDocument::empty(&self.path)
    }

    fn decode_attribute(&mut self, key: &str, expr: hcl::Expression, path: &Path) -> Result<(), DecodeError> {
        let value = Value::try_from(expr).map_err(|err| DecodeError::new(path, format!("{key}: {err}")))?;
        match key {
            "description" => match value {
                Value::String(description) => self.description = Some(description),
                Value::Null => {}
                other => return Err(DecodeError::new(path, format!("description must be a string, got {other}"))),
            },
            "uniqueness_criteria" => self.uniqueness_criteria = Some(value.to_interpolated_string()),
            "assume_role" => self.assume_role = Some(value.to_string_list()),
            "assume_role_duration_hours" => match value {
                Value::Integer(hours) => self.assume_role_duration_hours = Some(hours),
                Value::Null => {}
                other => {
                    return Err(DecodeError::new(
                        path,
                        format!("assume_role_duration_hours must be a number, got {other}"),
                    ))
                }
            },
            "inputs" => match value {
                Value::Object(inputs) => self.inputs = inputs,
                Value::Null => {}
                _ => return Err(DecodeError::new(path, "inputs must be an object")),
            },
            unknown => {
                tracing::warn!(path=%path.display(), attribute = unknown, expected=?ATTRIBUTES, "unknown attribute ignored")
            }
        }
        Ok(())
    }

    fn decode_block(
        &mut self,
        identifier: &str,
        block: hcl::Block,
        index: usize,
        path: &Path,
    ) -> Result<(), DecodeError> {
        match identifier {
            "include" => self.include = Some(decode_plain(&block, path)?),
            "terraform" => {
                for structure in block.body.into_iter() {
                    match structure {
                        hcl::Structure::Attribute(attribute) if attribute.key.as_str() == "source" => {
                            let value = Value::try_from(attribute.expr)
                                .map_err(|err| DecodeError::new(path, format!("terraform.source: {err}")))?;
                            self.terraform_source = value.as_str().map(str::to_string);
                        }
                        hcl::Structure::Block(nested) if nested.identifier.as_str() == "extra_arguments" => {
                            let position = self.extra_arguments.len();
                            self.extra_arguments.push(decode_item(&nested, path, position)?);
                        }
                        hcl::Structure::Attribute(attribute) => {
                            tracing::warn!(path=%path.display(), attribute=%attribute.key, "unknown terraform attribute ignored")
                        }
                        hcl::Structure::Block(nested) => {
                            tracing::warn!(path=%path.display(), block=%nested.identifier, "unknown terraform block ignored")
                        }
                    }
                }
            }
            "remote_state" => self.remote_state = Some(decode_plain(&block, path)?),
            "dependencies" => {
                let map = body_to_map(&block.body, path)?;
                self.dependencies = Some(map.get("paths").map(Value::to_string_list).unwrap_or_default());
            }
            "pre_hook" | "before_hook" => self.pre_hooks.push(decode_item(&block, path, index)?),
            "post_hook" | "after_hook" => self.post_hooks.push(decode_item(&block, path, index)?),
            "pre_hooks" | "post_hooks" => {
                static DEPRECATED: Once = Once::new();
                DEPRECATED.call_once(|| {
                    tracing::warn!(block = identifier, "deprecated block name, use pre_hook/post_hook instead")
                });
                let hook = decode_item(&block, path, index)?;
                match identifier {
                    "pre_hooks" => self.pre_hooks.push(hook),
                    _ => self.post_hooks.push(hook),
                }
            }
            "extra_command" => self.extra_commands.push(decode_item(&block, path, index)?),
            "import_files" => self.import_files.push(decode_item(&block, path, index)?),
            "import_variables" => self.import_variables.push(decode_item(&block, path, index)?),
            "extra_arguments" => {
                let position = self.extra_arguments.len();
                self.extra_arguments.push(decode_item(&block, path, position)?)
            }
            "approval_config" => self.approval_configs.push(decode_item(&block, path, index)?),
            "run_conditions" => self.run_conditions.push(decode_item(&block, path, index)?),
            "export_variables" => self.export_variables.push(decode_item(&block, path, index)?),
            unknown => tracing::warn!(path=%path.display(), block = unknown, "unknown block ignored"),
        }
        Ok(())
    }
}

/// Attributes (and nested blocks) of an evaluated body as a [Map]
///
/// Nested blocks are collected in a list under their identifier, a label becomes the `name` of the block.
fn body_to_map(body: &hcl::Body, path: &Path) -> Result<Map, DecodeError> {
    let mut map = Map::new();
    for attribute in body.attributes() {
        let key = attribute.key.as_str();
        let value = Value::try_from(attribute.expr.clone())
            .map_err(|err| DecodeError::new(path, format!("{key}: {err}")))?;
        map.insert(key.to_string(), value);
    }
    for block in body.blocks() {
        let mut nested = body_to_map(&block.body, path)?;
        if let Some(label) = block.labels.first() {
            nested.insert("name".to_string(), label.as_str().into());
        }
        let entry = map
            .entry(block.identifier.as_str().to_string())
            .or_insert_with(|| Value::Array(vec![]));
        if let Value::Array(items) = entry {
            items.push(Value::Object(nested));
        }
    }
    Ok(map)
}

fn decode_plain<T: DeserializeOwned>(block: &hcl::Block, path: &Path) -> Result<T, DecodeError> {
    let json = Value::Object(body_to_map(&block.body, path)?).to_json();
    serde_json::from_value(json).map_err(|err| DecodeError::new(path, format!("{}: {err}", block.identifier)))
}

/// Decode an extension item, `index` is the position of the block among the blocks of its kind
fn decode_item<T: Extension + DeserializeOwned>(
    block: &hcl::Block,
    path: &Path,
    index: usize,
) -> Result<T, DecodeError> {
    let kind = block.identifier.as_str();
    let mut map = body_to_map(&block.body, path)?;

    for key in map.keys() {
        if !extensions::BASE_ATTRIBUTES.contains(&key.as_str()) && !T::ATTRIBUTES.contains(&key.as_str()) {
            tracing::warn!(path=%path.display(), kind, attribute = key, "unknown attribute ignored");
        }
    }

    let name = match block.labels.first() {
        Some(label) => label.as_str().to_string(),
        None if block_shape(kind) == Some(BlockShape::OptionallyLabelled) => {
            format!("{}#{kind}{index}", path.display())
        }
        None => match map.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => return Err(DecodeError::new(path, format!("{kind} block #{index} requires a name"))),
        },
    };
    map.insert("name".to_string(), name.into());

    serde_json::from_value(Value::Object(map).to_json())
        .map_err(|err| DecodeError::new(path, format!("{kind}: {err}")))
}

/// Convert a JSON/YAML document to the block/attribute model
///
/// A document nesting its configuration under a `terragrunt` key is unwrapped.
pub fn structured_to_body(mut map: Map) -> hcl::Body {
    if let Some(Value::Object(inner)) = map.shift_remove("terragrunt") {
        return structured_to_body(inner);
    }

    let mut builder = hcl::Body::builder();
    for (key, value) in map {
        match (block_shape(&key), value) {
            (Some(BlockShape::Single), Value::Object(inner)) => {
                builder = builder.add_block(nested_block(&key, None, structured_to_body(inner)));
            }
            (Some(_), Value::Object(items)) => {
                for (label, body) in items {
                    let body = match body {
                        Value::Object(body) => body,
                        _ => Map::new(),
                    };
                    builder = builder.add_block(nested_block(&key, Some(label), attributes_body(body)));
                }
            }
            (Some(_), Value::Array(items)) => {
                for item in items {
                    let Value::Object(mut body) = item else {
                        continue;
                    };
                    let label = body.shift_remove("name").map(|name| name.to_interpolated_string());
                    builder = builder.add_block(nested_block(&key, label, attributes_body(body)));
                }
            }
            (_, value) => builder = builder.add_attribute(attribute(&key, value)),
        }
    }
    builder.build()
}

fn attribute(key: &str, value: Value) -> hcl::Attribute {
    hcl::Attribute::new(
        hcl::Identifier::sanitized(key),
        hcl::Expression::from(hcl::Value::from(value)),
    )
}

fn attributes_body(map: Map) -> hcl::Body {
    map.into_iter()
        .fold(hcl::Body::builder(), |builder, (key, value)| builder.add_attribute(attribute(&key, value)))
        .build()
}

fn nested_block(identifier: &str, label: Option<String>, body: hcl::Body) -> hcl::Block {
    let mut builder = hcl::Block::builder(hcl::Identifier::sanitized(identifier));
    if let Some(label) = label {
        builder = builder.add_label(label);
    }
    builder.add_structures(body).build()
}
