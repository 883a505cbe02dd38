//! `export_variables` blocks
use super::{Extension, ExtensionBase};
use crate::value::Map;
use crate::visit::VisitMut;
use std::path::{Path, PathBuf};

const ACCEPTED_FORMATS: &str = "yml, yaml, tfvars, hcl, json";

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ExportVariables {
    #[serde(flatten)]
    pub base: ExtensionBase,
    pub path: String,
    /// Inferred from the extension of [ExportVariables::path] if empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default)]
    pub skip_on_error: bool,
    #[serde(default)]
    pub import_into_modules: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("{path}: unknown export format '{format}', accepted formats: {ACCEPTED_FORMATS}")]
    UnknownFormat { path: String, format: String },
    #[error("{path}: unable to render YAML")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path}: unable to render JSON")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: unable to render HCL")]
    Hcl {
        path: String,
        #[source]
        source: hcl::Error,
    },
}

/// Rendered export, written by the caller
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ExportArtifact {
    pub path: PathBuf,
    pub contents: String,
}

impl Extension for ExportVariables {
    const KIND: &'static str = "export_variables";
    const ATTRIBUTES: &'static [&'static str] = &["path", "format", "skip_on_error", "import_into_modules"];

    fn base(&self) -> &ExtensionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ExtensionBase {
        &mut self.base
    }

    fn normalize(&mut self) {
        self.format = self.format.trim().to_string();
    }

    fn visit_strings_mut(&mut self, visitor: &mut dyn VisitMut<String>) {
        self.base.visit_strings_mut(visitor);
        visitor.visit_mut(&mut self.path);
    }
}

impl ExportVariables {
    pub fn effective_format(&self) -> String {
        if !self.format.is_empty() {
            return self.format.clone();
        }
        Path::new(&self.path)
            .extension()
            .map(|extension| extension.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Render `variables` for `folder`
    pub fn render(&self, variables: &Map, folder: &Path) -> Result<ExportArtifact, ExportError> {
        let path = self.path.clone();
        let mut contents = match self.effective_format().as_str() {
            "yml" | "yaml" => {
                serde_yaml::to_string(variables).map_err(|source| ExportError::Yaml { path, source })?
            }
            "json" => serde_json::to_string_pretty(variables).map_err(|source| ExportError::Json { path, source })?,
            "tfvars" | "hcl" => render_attributes(variables).map_err(|source| ExportError::Hcl { path, source })?,
            format => {
                return Err(ExportError::UnknownFormat {
                    path,
                    format: format.to_string(),
                })
            }
        };
        if !contents.ends_with('\n') {
            contents.push('\n');
        }

        let target = folder.join(&self.path);
        tracing::debug!(name = self.base.name, path=%target.display(), "variables rendered");
        Ok(ExportArtifact {
            path: target,
            contents,
        })
    }
}

/// Variables as top-level HCL attributes
fn render_attributes(variables: &Map) -> Result<String, hcl::Error> {
    let mut body = hcl::Body::builder();
    for (key, value) in variables {
        let value: hcl::Value = value.clone().into();
        body = body.add_attribute(hcl::Attribute::new(key.as_str(), hcl::Expression::from(value)));
    }
    hcl::to_string(&body.build())
}

/// Artifacts of every enabled export
///
/// Exports into a folder other than the working directory only happen with `import_into_modules`. Failing exports
/// with `skip_on_error` are logged and skipped.
pub fn render_all(
    list: &[ExportVariables],
    variables: &Map,
    folder: &Path,
    is_working_dir: bool,
) -> Result<Vec<ExportArtifact>, ExportError> {
    let mut artifacts = vec![];
    for export in super::enabled(list) {
        if !is_working_dir && !export.import_into_modules {
            continue;
        }
        match export.render(variables, folder) {
            Ok(artifact) => artifacts.push(artifact),
            Err(err) if export.skip_on_error => {
                tracing::error!(name = export.base.name, %err, "export skipped");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(artifacts)
}
