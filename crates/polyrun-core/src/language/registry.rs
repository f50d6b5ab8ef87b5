//! Language id to recipe lookup.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rustc_hash::FxHashMap;

use crate::config::StudioConfig;
use crate::error::{Error, Result};

use super::builtin::{BLOCKLY_ID, builtin_recipes};
use super::recipe::LanguageRecipe;

/// Registry of execution recipes keyed by language id.
///
/// Populated once at startup and read-only afterwards; share it behind an
/// `Arc`. Lookups are case-insensitive and accept aliases. The `blockly` id
/// resolves to whichever language the block editor is configured to emit.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    /// Recipes by id, in stable order for listings.
    recipes: BTreeMap<String, LanguageRecipe>,
    /// Alias -> id.
    aliases: FxHashMap<String, String>,
    /// Target of the `blockly` id.
    blockly_target: String,
}

impl LanguageRegistry {
    /// Create an empty registry.
    pub fn empty() -> Self {
        Self {
            recipes: BTreeMap::new(),
            aliases: FxHashMap::default(),
            blockly_target: "javascript".to_string(),
        }
    }

    /// Create a registry holding the built-in recipes.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for recipe in builtin_recipes() {
            registry.insert(recipe);
        }
        registry
    }

    /// Build from a list of recipes, validating each.
    ///
    /// # Errors
    /// Returns [`Error::Config`] on an invalid recipe or a duplicate id.
    pub fn from_recipes(recipes: impl IntoIterator<Item = LanguageRecipe>) -> Result<Self> {
        let mut registry = Self::empty();
        registry.merge(recipes)?;
        Ok(registry)
    }

    /// Merge a recipe table over the current entries.
    ///
    /// Recipes with an existing id replace the old entry.
    pub fn merge(&mut self, recipes: impl IntoIterator<Item = LanguageRecipe>) -> Result<()> {
        let mut seen = Vec::new();
        for recipe in recipes {
            recipe.validate()?;
            if seen.contains(&recipe.id) {
                return Err(Error::Config(format!(
                    "recipe table defines '{}' twice",
                    recipe.id
                )));
            }
            seen.push(recipe.id.clone());
            self.insert(recipe);
        }
        Ok(())
    }

    /// Merge a JSON recipe table file (an array of recipes).
    pub fn merge_table_file(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path).map_err(|e| Error::scratch(path, e))?;
        let recipes: Vec<LanguageRecipe> = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::info!(
            "Loaded {} recipes from {}",
            recipes.len(),
            path.display()
        );
        self.merge(recipes)
    }

    /// Built-ins plus a JSON recipe table file.
    pub fn from_table_file(path: &Path) -> Result<Self> {
        let mut registry = Self::with_builtins();
        registry.merge_table_file(path)?;
        Ok(registry)
    }

    /// Built-ins, the configured recipe table and the block editor target.
    pub fn from_config(config: &StudioConfig) -> Result<Self> {
        let registry = match &config.recipes_file {
            Some(path) => Self::from_table_file(path)?,
            None => Self::with_builtins(),
        };
        registry.with_blockly_target(&config.blockly_target)
    }

    /// Point the `blockly` id at another language.
    pub fn with_blockly_target(mut self, language_id: &str) -> Result<Self> {
        let target = language_id.to_ascii_lowercase();
        if target == BLOCKLY_ID {
            return Err(Error::Config("blockly cannot target itself".to_string()));
        }
        self.blockly_target = self.canonical_id(&target)?.to_string();
        Ok(self)
    }

    /// Resolve a language id (or alias) to its recipe.
    ///
    /// # Errors
    /// Returns [`Error::UnknownLanguage`] for unregistered ids.
    pub fn resolve(&self, language_id: &str) -> Result<&LanguageRecipe> {
        let id = self.canonical_id(&language_id.to_ascii_lowercase())?.to_string();
        self.recipes
            .get(&id)
            .ok_or_else(|| Error::UnknownLanguage(language_id.to_string()))
    }

    /// Detect the language of a file by its extension.
    pub fn by_extension(&self, extension: &str) -> Option<&LanguageRecipe> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.recipes.values().find(|recipe| {
            recipe.file_extension == ext || recipe.aliases.iter().any(|alias| *alias == ext)
        })
    }

    /// Detect the language of a path.
    pub fn by_path(&self, path: &Path) -> Option<&LanguageRecipe> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.by_extension(ext))
    }

    /// Registered ids in stable order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.recipes.keys().map(String::as_str)
    }

    /// Registered recipes in stable order.
    pub fn recipes(&self) -> impl Iterator<Item = &LanguageRecipe> {
        self.recipes.values()
    }

    /// Language the `blockly` id resolves to.
    pub fn blockly_target(&self) -> &str {
        &self.blockly_target
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    fn insert(&mut self, recipe: LanguageRecipe) {
        // Drop aliases that pointed at a replaced recipe
        if self.recipes.contains_key(&recipe.id) {
            self.aliases.retain(|_, id| *id != recipe.id);
        }
        for alias in &recipe.aliases {
            self.aliases
                .insert(alias.to_ascii_lowercase(), recipe.id.clone());
        }
        self.recipes.insert(recipe.id.clone(), recipe);
    }

    fn canonical_id<'a>(&'a self, id: &'a str) -> Result<&'a str> {
        if id == BLOCKLY_ID {
            return Ok(self.blockly_target.as_str());
        }
        if self.recipes.contains_key(id) {
            return Ok(id);
        }
        self.aliases
            .get(id)
            .map(String::as_str)
            .ok_or_else(|| Error::UnknownLanguage(id.to_string()))
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::recipe::CommandTemplate;
    use tempfile::TempDir;

    const REQUIRED: &[&str] = &[
        "python",
        "javascript",
        "html",
        "css",
        "java",
        "cpp",
        "php",
        "go",
        "sql",
        "blockly",
    ];

    #[test]
    fn test_required_languages_resolve() {
        let registry = LanguageRegistry::with_builtins();
        for id in REQUIRED {
            assert!(registry.resolve(id).is_ok(), "{} should resolve", id);
        }
        for id in registry.ids() {
            assert_eq!(registry.resolve(id).unwrap().id, id);
        }
    }

    #[test]
    fn test_unknown_language() {
        let registry = LanguageRegistry::with_builtins();
        let err = registry.resolve("cobol").unwrap_err();
        assert!(matches!(err, Error::UnknownLanguage(ref id) if id == "cobol"));
    }

    #[test]
    fn test_aliases_and_case() {
        let registry = LanguageRegistry::with_builtins();
        assert_eq!(registry.resolve("JS").unwrap().id, "javascript");
        assert_eq!(registry.resolve("c++").unwrap().id, "cpp");
        assert_eq!(registry.resolve("Python").unwrap().id, "python");
    }

    #[test]
    fn test_blockly_target() {
        let registry = LanguageRegistry::with_builtins();
        assert_eq!(registry.resolve("blockly").unwrap().id, "javascript");

        let registry = registry.with_blockly_target("py").unwrap();
        assert_eq!(registry.resolve("blockly").unwrap().id, "python");
        assert_eq!(registry.blockly_target(), "python");

        assert!(LanguageRegistry::with_builtins().with_blockly_target("blockly").is_err());
        assert!(LanguageRegistry::with_builtins().with_blockly_target("cobol").is_err());
    }

    #[test]
    fn test_by_extension() {
        let registry = LanguageRegistry::with_builtins();
        assert_eq!(registry.by_extension(".py").unwrap().id, "python");
        assert_eq!(registry.by_extension("CPP").unwrap().id, "cpp");
        assert_eq!(
            registry.by_path(Path::new("/src/Main.java")).unwrap().id,
            "java"
        );
        assert!(registry.by_extension("xyz").is_none());
    }

    #[test]
    fn test_table_file_overrides_builtin() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("recipes.json");
        fs::write(
            &path,
            r#"[
                {
                    "id": "python",
                    "display_name": "PyPy",
                    "file_extension": "py",
                    "run_command": { "program": "pypy3", "args": ["{source}"] }
                },
                {
                    "id": "lua",
                    "display_name": "Lua",
                    "file_extension": "lua",
                    "run_command": { "program": "lua", "args": ["{source}"] },
                    "aliases": ["luajit"]
                }
            ]"#,
        )
        .unwrap();

        let registry = LanguageRegistry::from_table_file(&path).unwrap();
        assert_eq!(registry.resolve("python").unwrap().display_name, "PyPy");
        assert_eq!(registry.resolve("luajit").unwrap().id, "lua");
        // Replaced recipe dropped its old aliases
        assert!(registry.resolve("py").is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let recipe = LanguageRecipe {
            id: "lua".to_string(),
            display_name: "Lua".to_string(),
            file_extension: "lua".to_string(),
            source_file_name: None,
            build_command: None,
            run_command: CommandTemplate::new("lua", &["{source}"]),
            cleanup_policy: Default::default(),
            kind: Default::default(),
            aliases: Vec::new(),
        };
        let err = LanguageRegistry::from_recipes(vec![recipe.clone(), recipe]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
