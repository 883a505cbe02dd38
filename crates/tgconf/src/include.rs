//! include chain
//!
//! Each document is evaluated at a position in an include chain. The chain is a singly linked list from the
//! document being evaluated back to the primary document, see [Include::included_by].
//!
//! Bootstrap includes (see [IncludeKind::Bootstrap]) are synthesized for globally configured documents. They are
//! skipped when helper functions look for "the include" and are not part of the resolved include chain.
use crate::util;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncludeKind {
    /// The primary document or an `include {}` block
    Explicit,
    /// A pre-boot or post-boot document
    Bootstrap,
}

#[derive(Debug, Clone)]
pub struct Include {
    /// Path as declared (relative paths are relative to the working directory)
    pub path: PathBuf,
    pub source: Option<String>,
    pub kind: IncludeKind,
    pub included_by: Option<Arc<Include>>,
}

impl Include {
    /// Include position of the primary document
    pub fn root(path: impl Into<PathBuf>) -> Self {
        Include {
            path: path.into(),
            source: None,
            kind: IncludeKind::Explicit,
            included_by: None,
        }
    }

    pub fn bootstrap(path: impl Into<PathBuf>, included_by: Option<Arc<Include>>) -> Self {
        Include {
            path: path.into(),
            source: None,
            kind: IncludeKind::Bootstrap,
            included_by,
        }
    }

    pub fn child(self: &Arc<Self>, path: impl Into<PathBuf>, source: Option<String>) -> Self {
        Include {
            path: path.into(),
            source,
            kind: IncludeKind::Explicit,
            included_by: Some(Arc::clone(self)),
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        self.kind == IncludeKind::Bootstrap
    }

    /// This include followed by everything that includes it
    pub fn ancestors(&self) -> impl Iterator<Item = &Include> {
        std::iter::successors(Some(self), |include| {
            let include: &Include = *include;
            include.included_by.as_deref()
        })
    }

    /// Directory of the nearest include that is not a bootstrap include
    pub fn nearest_explicit_dir(&self, working_dir: &Path) -> Option<PathBuf> {
        self.ancestors()
            .find(|include| !include.is_bootstrap())
            .map(|include| {
                let path = if include.path.is_absolute() {
                    include.path.clone()
                } else {
                    working_dir.join(&include.path)
                };
                util::parent_dir(&util::clean_path(&path))
            })
    }

    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }
}

/// `include {}` block as written in a document
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct IncludeDirective {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Where an include directive points to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeTarget {
    Local(PathBuf),
    Remote { source: String, path: Option<String> },
}

impl IncludeDirective {
    /// Resolve against the directory of the including document
    ///
    /// Returns `None` if neither `path` nor `source` is set.
    pub fn target(&self, including_dir: &Path) -> Option<IncludeTarget> {
        let path = self.path.as_deref().filter(|path| !path.is_empty());
        let source = self.source.as_deref().filter(|source| !source.is_empty());

        match (path, source) {
            (_, Some(source)) => Some(IncludeTarget::Remote {
                source: source.to_string(),
                path: path.map(str::to_string),
            }),
            (Some(path), None) => {
                let path = Path::new(path);
                let joined = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    including_dir.join(path)
                };
                Some(IncludeTarget::Local(util::clean_path(&joined)))
            }
            (None, None) => None,
        }
    }
}
