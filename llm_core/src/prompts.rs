use std::{collections::HashMap, fs, path::Path};

use anyhow::Context;

/// Persona system prompts keyed by persona id.
///
/// Loaded from a directory of `<persona>.txt` files.
#[derive(Debug, Clone, Default)]
pub struct PersonaPrompts {
    prompts: HashMap<String, String>,
}

impl PersonaPrompts {
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read prompt directory {}", dir.display()))?;

        let mut prompts = HashMap::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            prompts.insert(stem.to_string(), text);
        }

        Ok(Self { prompts })
    }

    pub fn get(&self, persona_key: &str) -> Option<&str> {
        self.prompts.get(persona_key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

impl FromIterator<(String, String)> for PersonaPrompts {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            prompts: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_dir_keys_by_stem_and_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("professional.txt"), "Be concise.").unwrap();
        fs::write(dir.path().join("pirate.txt"), "Talk like a pirate.").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let prompts = PersonaPrompts::load_dir(dir.path()).unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts.get("pirate"), Some("Talk like a pirate."));
        assert_eq!(prompts.get("notes"), None);
    }

    #[test]
    fn test_load_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PersonaPrompts::load_dir(dir.path().join("absent")).is_err());
    }
}
