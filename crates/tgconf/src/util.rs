use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path (`.` removed, `..` folded) without touching the filesystem
pub(crate) fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    cleaned.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    cleaned.pop();
                } else if !cleaned.has_root() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }

    if cleaned.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        cleaned
    }
}

/// `path` expressed relative to `base`, `.` if both are the same directory
pub(crate) fn relative_path(path: &Path, base: &Path) -> Option<String> {
    let relative = pathdiff::diff_paths(clean_path(path), clean_path(base))?;
    if relative.as_os_str().is_empty() {
        return Some(".".to_string());
    }
    Some(to_slash(&relative))
}

pub(crate) fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Remove the indentation of the first line from every line
///
/// Only applies to text starting with a space and spanning multiple lines (i.e. heredocs written inline).
pub(crate) fn unindent(text: &str) -> String {
    if !text.starts_with(' ') || !text.contains('\n') {
        return text.to_string();
    }

    let indent = text.len() - text.trim_start_matches(' ').len();
    let prefix = " ".repeat(indent);
    text.split('\n')
        .map(|line| line.strip_prefix(prefix.as_str()).unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove duplicates, keeping the last occurrence of every element
pub(crate) fn dedup_keep_last(items: &[String]) -> Vec<String> {
    let mut result: Vec<String> = Vec::with_capacity(items.len());
    for item in items.iter().rev() {
        if !result.contains(item) {
            result.push(item.clone());
        }
    }
    result.reverse();
    result
}

/// Remove `key=value` definitions overridden by a later definition of the same key
pub(crate) fn dedup_definitions(definitions: &[String]) -> Vec<String> {
    let key = |definition: &str| definition.split('=').next().unwrap_or_default().trim().to_string();
    let mut result: Vec<String> = Vec::with_capacity(definitions.len());
    for definition in definitions.iter().rev() {
        if !result.iter().any(|kept| key(kept) == key(definition)) {
            result.push(definition.clone());
        }
    }
    result.reverse();
    result
}

/// Files matching `pattern`
///
/// Relative patterns are tried in each folder in turn, the first folder with a match wins.
pub(crate) fn glob_files(pattern: &str, folders: &[PathBuf]) -> Result<Vec<PathBuf>, glob::PatternError> {
    let candidates: Vec<PathBuf> = if Path::new(pattern).is_absolute() {
        vec![PathBuf::from(pattern)]
    } else {
        folders.iter().map(|folder| folder.join(pattern)).collect()
    };

    for candidate in candidates {
        let files: Vec<PathBuf> = glob::glob(&candidate.to_string_lossy())?
            .flatten()
            .filter(|path| path.is_file())
            .collect();
        if !files.is_empty() {
            return Ok(files);
        }
    }
    Ok(vec![])
}
