//! detectors/language.rs
//!
//! Target-language classification of changed paths and diff lines.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use glob::Pattern;
use regex::Regex;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
    Java,
}

impl Language {
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Language::Python => &["py"],
            Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Language::TypeScript => &["ts", "tsx"],
            Language::Rust => &["rs"],
            Language::Go => &["go"],
            Language::Java => &["java"],
        }
    }

    /// Line-start pattern of an import / module statement.
    fn import_pattern(self) -> &'static str {
        match self {
            Language::Python => r"^\s*(import\s+\w|from\s+[\w.]+\s+import\s)",
            Language::JavaScript | Language::TypeScript => {
                r"^\s*(import[\s{(*]|export\s.*\sfrom\s)|\brequire\("
            }
            Language::Rust => r"^\s*(pub(\([^)]*\))?\s+)?(use|mod|extern\s+crate)\s",
            Language::Go => r"^\s*import[\s(]",
            Language::Java => r"^\s*import\s+(static\s+)?[\w.]+(\.\*)?\s*;",
        }
    }
}

impl FromStr for Language {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            "rust" | "rs" => Ok(Language::Rust),
            "go" | "golang" => Ok(Language::Go),
            "java" => Ok(Language::Java),
            _ => Err(ConfigError::UnknownLanguage(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Java => "java",
        };
        f.write_str(s)
    }
}

/* ============================================================
   Target language
   ============================================================ */

/// The language whose files make a merge interesting.
#[derive(Debug, Clone)]
pub struct TargetLanguage {
    language: Language,
    extra: Vec<Pattern>,
    imports: Regex,
}

impl TargetLanguage {
    pub fn new(language: Language, source_globs: &[String]) -> Result<Self, ConfigError> {
        let extra = source_globs
            .iter()
            .map(|g| {
                Pattern::new(g).map_err(|source| ConfigError::Glob {
                    pattern: g.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            language,
            extra,
            imports: Regex::new(language.import_pattern())?,
        })
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn is_source_file(&self, path: &str) -> bool {
        let by_ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.language.extensions().contains(&ext));

        by_ext || self.extra.iter().any(|p| p.matches(path))
    }

    pub fn is_import_line(&self, line: &str) -> bool {
        self.imports.is_match(line)
    }
}
