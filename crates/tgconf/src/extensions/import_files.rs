//! `import_files` blocks
use super::{Extension, ExtensionBase};
use crate::dispatch::FileImport;
use crate::visit::VisitMut;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CopyAndRename {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ImportFiles {
    #[serde(flatten)]
    pub base: ExtensionBase,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, rename = "copy_and_remove", skip_serializing_if = "Vec::is_empty")]
    pub copy_and_rename: Vec<CopyAndRename>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub import_into_modules: bool,
    #[serde(default)]
    pub file_mode: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ImportFilesError {
    #[error("{name}: invalid pattern {pattern}")]
    Pattern {
        name: String,
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("{name}: unable to import required file {files}")]
    RequiredFileMissing { name: String, files: String },
}

impl Extension for ImportFiles {
    const KIND: &'static str = "import_files";
    const ATTRIBUTES: &'static [&'static str] = &[
        "source",
        "files",
        "copy_and_remove",
        "required",
        "import_into_modules",
        "file_mode",
        "target",
        "prefix",
    ];

    fn base(&self) -> &ExtensionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ExtensionBase {
        &mut self.base
    }

    fn normalize(&mut self) {
        self.required.get_or_insert(true);
        if self.prefix.is_none() {
            self.prefix = Some(default_prefix(&self.base.name));
        }
    }

    fn visit_strings_mut(&mut self, visitor: &mut dyn VisitMut<String>) {
        self.base.visit_strings_mut(visitor);
        visitor.visit_mut(&mut self.source);
        visitor.visit_mut(&mut self.target);
        self.files.iter_mut().for_each(|file| visitor.visit_mut(file));
        for copy in self.copy_and_rename.iter_mut() {
            visitor.visit_mut(&mut copy.source);
            visitor.visit_mut(&mut copy.target);
        }
    }
}

/// Letters of the hex encoded SHA-1 digest of `name`, followed by `_`
fn default_prefix(name: &str) -> String {
    let digest = hex::encode(Sha1::digest(name.as_bytes()));
    let mut prefix: String = digest.chars().filter(char::is_ascii_alphabetic).collect();
    prefix.push('_');
    prefix
}

impl ImportFiles {
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(true)
    }

    /// Files to stage into `folder`
    ///
    /// `source_folder` is the local copy of [ImportFiles::source] (or the folder patterns are relative to). Imports
    /// into a folder other than `working_dir` only happen with `import_into_modules`.
    pub fn staging_plan(
        &self,
        source_folder: &Path,
        folder: &Path,
        working_dir: &Path,
    ) -> Result<Vec<FileImport>, ImportFilesError> {
        if !self.enabled() {
            tracing::debug!(name = self.base.name, "import files skipped, disabled for this OS");
            return Ok(vec![]);
        }
        if self.source.is_empty() && self.files.is_empty() && self.copy_and_rename.is_empty() {
            tracing::debug!(name = self.base.name, "import files skipped, nothing to do");
            return Ok(vec![]);
        }
        if folder != working_dir && !self.import_into_modules {
            return Ok(vec![]);
        }

        let target_dir = match self.target.as_str() {
            "" => folder.to_path_buf(),
            target if Path::new(target).is_absolute() => PathBuf::from(target),
            target => folder.join(target),
        };
        let prefix = self.prefix.clone().unwrap_or_default();
        let with_prefix = |target: PathBuf| -> PathBuf {
            let file_name = target
                .file_name()
                .map(|name| format!("{prefix}{}", name.to_string_lossy()))
                .unwrap_or_default();
            target.with_file_name(file_name)
        };

        let patterns = if self.files.is_empty() && self.copy_and_rename.is_empty() {
            vec!["*".to_string()]
        } else {
            self.files.clone()
        };

        let mut plan = vec![];
        for pattern in &patterns {
            let full_pattern = if Path::new(pattern).is_absolute() {
                PathBuf::from(pattern)
            } else {
                source_folder.join(pattern)
            };
            let full_pattern = full_pattern.to_string_lossy().to_string();
            let paths = glob::glob(&full_pattern).map_err(|source| ImportFilesError::Pattern {
                name: self.base.name.clone(),
                pattern: full_pattern.clone(),
                source,
            })?;

            let mut matched = 0;
            for path in paths.flatten() {
                if !path.is_file() {
                    tracing::warn!(name = self.base.name, path=%path.display(), "not a file, skipped");
                    continue;
                }
                let target = if !self.target.is_empty() || Path::new(pattern).is_absolute() {
                    target_dir.join(path.file_name().unwrap_or_default())
                } else {
                    target_dir.join(path.strip_prefix(source_folder).unwrap_or(&path))
                };
                plan.push(FileImport {
                    source: path.clone(),
                    target: with_prefix(target),
                    required: self.is_required(),
                    mode: self.file_mode,
                });
                matched += 1;
            }

            if matched == 0 && self.is_required() {
                return Err(ImportFilesError::RequiredFileMissing {
                    name: self.base.name.clone(),
                    files: patterns.join(", "),
                });
            }
        }

        for copy in &self.copy_and_rename {
            let source = source_folder.join(&copy.source);
            if !source.is_file() && self.is_required() {
                return Err(ImportFilesError::RequiredFileMissing {
                    name: self.base.name.clone(),
                    files: copy.source.clone(),
                });
            }
            plan.push(FileImport {
                source,
                target: with_prefix(target_dir.join(&copy.target)),
                required: self.is_required(),
                mode: self.file_mode,
            });
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn import(name: &str) -> ImportFiles {
        let mut import = ImportFiles {
            base: ExtensionBase {
                name: name.to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        import.normalize();
        import
    }

    #[test]
    fn default_prefix_is_letters_of_digest() {
        let item = import("test");
        // sha1("test") = a94a8fe5ccb19ba61c4c0873d391e987982fbbd3
        assert_eq!(item.prefix.as_deref(), Some("aafeccbbaccdefbbd_"));
        assert_eq!(item.required, Some(true));
    }

    #[test]
    fn staging_plan() {
        let source = tempfile::tempdir().expect("tempdir");
        std::fs::write(source.path().join("a.tf"), "").expect("write");
        std::fs::write(source.path().join("b.tf"), "").expect("write");
        std::fs::write(source.path().join("c.txt"), "").expect("write");
        let work = Path::new("/work");

        let mut item = import("tf");
        item.files = vec!["*.tf".to_string()];
        item.prefix = Some("p_".to_string());
        item.file_mode = Some(0o644);

        let mut plan = item.staging_plan(source.path(), work, work).expect("plan");
        plan.sort_by(|a, b| a.target.cmp(&b.target));
        let targets: Vec<PathBuf> = plan.iter().map(|import| import.target.clone()).collect();
        assert_eq!(
            targets,
            vec![PathBuf::from("/work/p_a.tf"), PathBuf::from("/work/p_b.tf")]
        );
        assert!(plan.iter().all(|import| import.mode == Some(0o644) && import.required));

        assert!(item
            .staging_plan(source.path(), Path::new("/work/module"), work)
            .expect("plan")
            .is_empty());
    }

    #[test]
    fn missing_required_files() {
        let source = tempfile::tempdir().expect("tempdir");
        let work = Path::new("/work");

        let mut item = import("missing");
        item.files = vec!["*.tf".to_string()];
        let err = item.staging_plan(source.path(), work, work).expect_err("must error");
        assert!(matches!(err, ImportFilesError::RequiredFileMissing { .. }));

        item.required = Some(false);
        assert!(item.staging_plan(source.path(), work, work).expect("plan").is_empty());
    }
}
