//! Named file type presets resolved to filename globs

use std::collections::HashSet;
use thiserror::Error;

/// Preset used by `folders add` when no `--types` are given
pub const DEFAULT_PRESETS: &[&str] = &["text"];

const CODE: &[&str] = &[
    "*.py", "*.pyi", "*.pyw", "*.js", "*.jsx", "*.mjs", "*.cjs", "*.ts", "*.tsx", "*.go", "*.rs",
    "*.java", "*.cs", "*.c", "*.h", "*.cpp", "*.hpp", "*.cc", "*.hh",
];

/// Preset name → globs, in display order
pub const FILE_TYPE_PRESETS: &[(&str, &[&str])] = &[
    ("c", &["*.c", "*.h"]),
    ("code", CODE),
    ("cpp", &["*.cpp", "*.hpp", "*.cc", "*.hh"]),
    ("csharp", &["*.cs"]),
    ("docs", &["*.md", "*.txt", "*.rst", "*.pdf"]),
    ("go", &["*.go"]),
    ("java", &["*.java"]),
    ("javascript", &["*.js", "*.jsx", "*.mjs", "*.cjs"]),
    ("pdf", &["*.pdf"]),
    ("python", &["*.py", "*.pyi", "*.pyw"]),
    ("rust", &["*.rs"]),
    ("text", &["*.md", "*.txt", "*.rst"]),
    ("typescript", &["*.ts", "*.tsx"]),
    ("web", &["*.html", "*.css", "*.scss", "*.jsx", "*.tsx"]),
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PresetError {
    #[error("Unknown file type preset '{name}'. Valid presets: {}", valid.join(", "))]
    Unknown { name: String, valid: Vec<String> },
}

pub fn preset_globs(name: &str) -> Option<&'static [&'static str]> {
    FILE_TYPE_PRESETS
        .iter()
        .find(|(preset, _)| *preset == name)
        .map(|(_, globs)| *globs)
}

/// Globs for `names`, deduplicated in first-seen order
///
/// Every name is checked before anything is resolved.
pub fn resolve_file_types<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>, PresetError> {
    let names: Vec<&str> = names.iter().map(AsRef::as_ref).collect();

    if let Some(unknown) = names.iter().find(|n| preset_globs(n).is_none()) {
        return Err(PresetError::Unknown {
            name: unknown.to_string(),
            valid: FILE_TYPE_PRESETS.iter().map(|(n, _)| n.to_string()).collect(),
        });
    }

    let mut seen = HashSet::new();
    Ok(names
        .iter()
        .filter_map(|n| preset_globs(n))
        .flatten()
        .filter(|glob| seen.insert(**glob))
        .map(|glob| glob.to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_single_preset() {
        assert_eq!(resolve_file_types(&["python"]).unwrap(), vec!["*.py", "*.pyi", "*.pyw"]);
    }

    #[test]
    fn test_resolve_dedups_across_presets() {
        let globs = resolve_file_types(&["text", "docs"]).unwrap();
        assert_eq!(globs, vec!["*.md", "*.txt", "*.rst", "*.pdf"]);

        let globs = resolve_file_types(&["typescript", "web"]).unwrap();
        assert_eq!(globs.iter().filter(|g| *g == "*.tsx").count(), 1);
    }

    #[test]
    fn test_code_covers_every_language_preset() {
        let code = preset_globs("code").unwrap();
        for language in ["python", "javascript", "typescript", "go", "rust", "java", "csharp", "c", "cpp"] {
            for glob in preset_globs(language).unwrap() {
                assert!(code.contains(glob), "{} missing {}", language, glob);
            }
        }
    }

    #[test]
    fn test_unknown_preset_lists_valid_names() {
        let err = resolve_file_types(&["rust", "cobol"]).unwrap_err();
        match &err {
            PresetError::Unknown { name, valid } => {
                assert_eq!(name, "cobol");
                assert_eq!(valid.len(), FILE_TYPE_PRESETS.len());
            }
        }
        assert!(err.to_string().contains("python"));
    }

    #[test]
    fn test_empty_selection_resolves_to_nothing() {
        let none: [&str; 0] = [];
        assert!(resolve_file_types(&none).unwrap().is_empty());
    }
}
