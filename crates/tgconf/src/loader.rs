//! document loading
//!
//! [Loader::load] reads a document, runs it through the [Evaluator] at its include position and decodes it. Results
//! are kept in a [DocumentCache] so a document is parsed at most once per include position, however many units
//! include it.
use crate::collaborators::{CollaboratorError, Collaborators};
use crate::document::{self, ConfigDocument, DecodeError};
use crate::functions::FunctionTable;
use crate::include::{Include, IncludeKind};
use crate::interpolation::{EvalError, EvalScope, EvalState, Evaluator, TextMode};
use crate::options::ResolveOptions;
use crate::value::{Map, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("unable to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to fetch {source_uri}")]
    Fetch {
        source_uri: String,
        #[source]
        source: CollaboratorError,
    },
    #[error("{}: evaluation failed", path.display())]
    Evaluation {
        path: PathBuf,
        #[source]
        source: EvalError,
    },
    #[error("{}: unable to parse hcl", path.display())]
    HclParseFailed {
        path: PathBuf,
        #[source]
        source: hcl_edit::parser::Error,
    },
    #[error("{}: unable to parse {format}: {message}", path.display())]
    StructuredParseFailed {
        path: PathBuf,
        format: &'static str,
        message: String,
    },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("{}: no configuration found", .0.display())]
    NoConfigurationFound(PathBuf),
}

impl LoadError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoadError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// A loaded document, along with the text it was decoded from
#[derive(Debug)]
pub struct LoadedDocument {
    /// Text after `${...}` substitution
    pub text: String,
    pub document: ConfigDocument,
    /// Variables set by helper functions while the document was evaluated, replayed on cache hits
    pub global_writes: Vec<(String, Value)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    /// Innermost document of the include chain, helper functions depend on it
    leaf: PathBuf,
    kind: IncludeKind,
}

/// Holds the document of one key once it is loaded, locked while it is being loaded
type Slot = Arc<Mutex<Option<Arc<LoadedDocument>>>>;

/// Loaded documents, shareable between concurrent resolutions
///
/// Resolutions sharing a cache must use the same [ResolveOptions].
#[derive(Debug, Default)]
pub struct DocumentCache {
    entries: Mutex<HashMap<CacheKey, Slot>>,
    parses: AtomicUsize,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents parsed through this cache
    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::Relaxed)
    }

    /// Number of loaded documents
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self.entries.lock().values().cloned().collect();
        slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: CacheKey) -> Slot {
        Arc::clone(self.entries.lock().entry(key).or_default())
    }
}

pub struct Loader<'a> {
    pub options: &'a ResolveOptions,
    pub collaborators: &'a Collaborators,
    pub functions: &'a FunctionTable,
    pub cache: &'a DocumentCache,
}

impl<'a> Loader<'a> {
    /// Local path of the document at `include`
    ///
    /// Remote sources are fetched into the download directory first.
    pub fn locate(&self, include: &Include) -> Result<PathBuf, LoadError> {
        let Some(source) = include.source.as_deref() else {
            return Ok(self.options.absolute(&include.path));
        };

        let fetched = self
            .collaborators
            .fetch(source, &self.options.download_dir())
            .map_err(|source_err| LoadError::Fetch {
                source_uri: source.to_string(),
                source: source_err,
            })?;
        if !fetched.is_dir() {
            return Ok(fetched);
        }
        if !include.path.as_os_str().is_empty() {
            return Ok(fetched.join(&include.path));
        }
        Ok(self
            .options
            .find_config_in(&fetched)
            .unwrap_or_else(|| fetched.join(crate::options::DEFAULT_CONFIG_NAME)))
    }

    /// Load the document at `include`
    ///
    /// `include.path` must be the local path of the document, see [Loader::locate].
    pub fn load(&self, include: &Include, state: &mut EvalState) -> Result<Arc<LoadedDocument>, LoadError> {
        let path = self.options.absolute(&include.path);
        let canonical = path.canonicalize().map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        let leaf = include
            .ancestors()
            .last()
            .map(|root| self.options.absolute(&root.path))
            .unwrap_or_else(|| path.clone());
        let key = CacheKey {
            path: canonical.clone(),
            leaf,
            kind: include.kind,
        };

        // concurrent loads of the same key wait for the first one
        let slot = self.cache.slot(key);
        let mut cached = slot.lock();
        if let Some(loaded) = cached.as_ref() {
            tracing::debug!(path=%canonical.display(), "document cache hit");
            state.replay_global_writes(&loaded.global_writes);
            return Ok(Arc::clone(loaded));
        }

        tracing::info!(path=%canonical.display(), "loading config");
        let raw = std::fs::read_to_string(&canonical).map_err(|source| LoadError::Io {
            path: canonical.clone(),
            source,
        })?;

        let mark = state.global_write_count();
        let scope = EvalScope {
            include,
            options: self.options,
            collaborators: self.collaborators,
            state: &mut *state,
        };
        let mut evaluator = Evaluator::new(scope, self.functions, TextMode::Document);
        let evaluation_error = |source| LoadError::Evaluation {
            path: canonical.clone(),
            source,
        };
        let text = evaluator.resolve_text(&raw).map_err(evaluation_error)?;
        let body = parse_body(&text, &canonical)?;
        let body = evaluator.evaluate_body(body).map_err(evaluation_error)?;

        let mut document = ConfigDocument::decode(body, &canonical)?;
        if !document.has_content() && !text.trim().is_empty() {
            return Err(LoadError::NoConfigurationFound(canonical));
        }
        document.source = include.source.clone();

        let loaded = Arc::new(LoadedDocument {
            text,
            document,
            global_writes: state.global_writes_since(mark),
        });
        self.cache.parses.fetch_add(1, Ordering::Relaxed);
        *cached = Some(Arc::clone(&loaded));
        Ok(loaded)
    }
}

fn structured_format(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some("json") => Some("json"),
        Some("yaml" | "yml") => Some("yaml"),
        _ => None,
    }
}

/// Parse a JSON or YAML object
fn parse_structured(text: &str, path: &Path, format: &'static str) -> Result<Map, LoadError> {
    let error = |message: String| LoadError::StructuredParseFailed {
        path: path.to_path_buf(),
        format,
        message,
    };
    let value: Value = match format {
        "json" => serde_json::from_str::<serde_json::Value>(text)
            .map_err(|err| error(err.to_string()))?
            .into(),
        _ => serde_yaml::from_str::<serde_json::Value>(text)
            .map_err(|err| error(err.to_string()))?
            .into(),
    };
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(error("expected an object".to_string())),
    }
}

/// Parse document text as HCL, falling back to JSON and YAML
///
/// Files with a `.json`, `.yaml` or `.yml` extension are tried with that syntax first.
fn parse_body(text: &str, path: &Path) -> Result<hcl::Body, LoadError> {
    if let Some(format) = structured_format(path) {
        if let Ok(map) = parse_structured(text, path, format) {
            return Ok(document::structured_to_body(map));
        }
    }

    match hcl_edit::parser::parse_body(text) {
        Ok(body) => Ok(hcl::Body::from(body)),
        Err(source) => {
            for format in ["json", "yaml"] {
                if let Ok(map) = parse_structured(text, path, format) {
                    tracing::debug!(path=%path.display(), format, "document parsed with fallback syntax");
                    return Ok(document::structured_to_body(map));
                }
            }
            Err(LoadError::HclParseFailed {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

/// Variables defined in a tfvars (HCL), JSON or YAML file
///
/// A `terragrunt` entry holds configuration and is skipped.
pub fn read_variables_file(path: &Path) -> Result<Map, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_variables(&text, path)
}

/// See [read_variables_file]
pub fn parse_variables(text: &str, path: &Path) -> Result<Map, LoadError> {
    let mut variables = match structured_format(path) {
        Some(format) => parse_structured(text, path, format)?,
        None => {
            let body = parse_body(text, path)?;
            let context = hcl::eval::Context::new();
            let mut variables = Map::new();
            for attribute in body.attributes() {
                let value = hcl::eval::Evaluate::evaluate(&attribute.expr, &context).map_err(|err| {
                    LoadError::Evaluation {
                        path: path.to_path_buf(),
                        source: EvalError::Hcl(err.to_string()),
                    }
                })?;
                variables.insert(attribute.key.to_string(), value.into());
            }
            variables
        }
    };
    variables.shift_remove("terragrunt");
    Ok(variables)
}
