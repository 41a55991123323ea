//! Static language registry.
//!
//! Adding a language is deliberately a code change plus a jail image
//! rebuild; unknown interpreter paths are a privilege-escalation vector,
//! so there is no runtime registration.

use std::collections::HashMap;

use crate::errors::RunnerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    pub id: i32,
    pub name: String,
    /// Absolute interpreter path inside the jail image.
    pub interpreter: String,
    /// Source-file extension, dot included.
    pub extension: String,
}

/// Immutable id → descriptor table, fixed at construction.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: HashMap<i32, Language>,
}

impl LanguageRegistry {
    /// The languages baked into the jail image.
    pub fn builtin() -> Self {
        Self::new(vec![
            Language {
                id: 71,
                name: "Python".to_string(),
                interpreter: "/usr/bin/python3".to_string(),
                extension: ".py".to_string(),
            },
            Language {
                id: 63,
                name: "JavaScript".to_string(),
                interpreter: "/usr/bin/node".to_string(),
                extension: ".js".to_string(),
            },
        ])
    }

    /// Builds a registry from an explicit descriptor list, for embedders and
    /// tests. The table cannot change afterwards; the daemon itself only
    /// ever constructs [`LanguageRegistry::builtin`], and nothing registers
    /// languages at runtime.
    pub fn new(languages: impl IntoIterator<Item = Language>) -> Self {
        Self {
            languages: languages.into_iter().map(|l| (l.id, l)).collect(),
        }
    }

    pub fn lookup(&self, id: i32) -> Result<Language, RunnerError> {
        self.languages
            .get(&id)
            .cloned()
            .ok_or(RunnerError::UnsupportedLanguage(id))
    }

    /// Snapshot of supported ids, sorted for stable health output.
    pub fn supported_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.languages.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
