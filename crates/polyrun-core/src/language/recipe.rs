//! Execution recipes.
//!
//! A recipe is the static description of how one language is built and
//! run. Command templates reference the materialized artifact through
//! placeholders:
//!
//! | placeholder | meaning |
//! |---|---|
//! | `{source}`  | the written source file |
//! | `{output}`  | the build output (compiled languages) |
//! | `{dir}`     | the run directory |
//! | `{stem}`    | source file name without extension |
//! | `{preview}` | the document to open for rendered languages |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a recipe's artifact is consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipeKind {
    /// Executed as a program; output is captured.
    #[default]
    Execute,
    /// Opened in a viewer (HTML, CSS) rather than run.
    Render,
}

/// What happens to the run directory after the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Delete the run directory once the process exits.
    #[default]
    RemoveOnExit,
    /// Keep it; the consumer (e.g. a browser) reads it after we return.
    Retain,
}

/// A program plus argument list with placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    /// Program name (looked up in `PATH`) or placeholder.
    pub program: String,
    /// Arguments, rendered individually.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Concrete values for template placeholders.
#[derive(Debug, Clone)]
pub struct TemplateVars<'a> {
    pub source: &'a Path,
    pub output: &'a Path,
    pub dir: &'a Path,
    pub stem: &'a str,
    pub preview: &'a Path,
}

/// A template rendered against an artifact, with the program resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandTemplate {
    /// Create a template from string slices.
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Whether the program is a `PATH` tool rather than an artifact placeholder.
    pub fn is_external_tool(&self) -> bool {
        !self.program.contains('{')
    }

    /// Substitute placeholders in program and arguments.
    pub fn render(&self, vars: &TemplateVars<'_>) -> (String, Vec<String>) {
        let program = substitute(&self.program, vars);
        let args = self.args.iter().map(|arg| substitute(arg, vars)).collect();
        (program, args)
    }

    /// Render and resolve the program.
    ///
    /// Bare program names are looked up in `PATH`; anything containing a
    /// path separator (including rendered placeholders) is used as-is.
    ///
    /// # Errors
    /// Returns [`Error::Spawn`] if the program cannot be found.
    pub fn resolve(&self, vars: &TemplateVars<'_>) -> Result<ResolvedCommand> {
        let (program, args) = self.render(vars);
        let program = resolve_program(&program)?;
        Ok(ResolvedCommand { program, args })
    }
}

/// Resolve a program name to an executable path.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return Ok(candidate.to_path_buf());
    }
    which::which(program).map_err(|e| Error::Spawn {
        program: program.to_string(),
        message: format!("not found in PATH ({})", e),
    })
}

fn substitute(template: &str, vars: &TemplateVars<'_>) -> String {
    template
        .replace("{source}", &vars.source.to_string_lossy())
        .replace("{output}", &vars.output.to_string_lossy())
        .replace("{dir}", &vars.dir.to_string_lossy())
        .replace("{stem}", vars.stem)
        .replace("{preview}", &vars.preview.to_string_lossy())
}

/// How to build and run one language.
///
/// Immutable once registered. Recipe tables on disk use the same
/// snake_case field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageRecipe {
    /// Unique, lowercase identifier (e.g. `python`).
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Extension without the dot, used for the source file and detection.
    pub file_extension: String,
    /// Fixed source file name (Java needs `Main.java`).
    #[serde(default)]
    pub source_file_name: Option<String>,
    /// Build step for compiled languages.
    #[serde(default)]
    pub build_command: Option<CommandTemplate>,
    /// Command that runs (or opens) the artifact.
    pub run_command: CommandTemplate,
    #[serde(default)]
    pub cleanup_policy: CleanupPolicy,
    #[serde(default)]
    pub kind: RecipeKind,
    /// Alternative ids accepted by the registry.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl LanguageRecipe {
    /// Whether materialization runs a build step before execution.
    pub fn requires_build_step(&self) -> bool {
        self.build_command.is_some()
    }

    /// Name of the source file inside the run directory.
    pub fn source_file_name(&self) -> String {
        self.source_file_name
            .clone()
            .unwrap_or_else(|| format!("main.{}", self.file_extension))
    }

    /// Name of the build output inside the run directory.
    pub fn output_file_name(&self) -> String {
        format!("main{}", std::env::consts::EXE_SUFFIX)
    }

    /// External tools this recipe needs on `PATH`.
    pub fn required_tools(&self) -> Vec<&str> {
        self.build_command
            .iter()
            .chain(std::iter::once(&self.run_command))
            .filter(|cmd| cmd.is_external_tool())
            .map(|cmd| cmd.program.as_str())
            .collect()
    }

    /// Whether every required tool is installed.
    pub fn tool_available(&self) -> bool {
        self.required_tools()
            .iter()
            .all(|tool| which::which(tool).is_ok())
    }

    /// Check the fields an editable recipe table could get wrong.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.id != self.id.to_ascii_lowercase() {
            return Err(Error::Config(format!(
                "recipe id '{}' must be non-empty and lowercase",
                self.id
            )));
        }
        if self.file_extension.is_empty() || self.file_extension.starts_with('.') {
            return Err(Error::Config(format!(
                "recipe '{}' needs a file extension without the leading dot",
                self.id
            )));
        }
        for command in self.build_command.iter().chain(std::iter::once(&self.run_command)) {
            if command.program.trim().is_empty() {
                return Err(Error::Config(format!(
                    "recipe '{}' has a command without a program",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(dir: &'a Path, source: &'a Path, output: &'a Path) -> TemplateVars<'a> {
        TemplateVars {
            source,
            output,
            dir,
            stem: "main",
            preview: source,
        }
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let dir = PathBuf::from("/tmp/run-1-1");
        let source = dir.join("main.cpp");
        let output = dir.join("main");
        let template = CommandTemplate::new("c++", &["-o", "{output}", "{source}"]);

        let (program, args) = template.render(&vars(&dir, &source, &output));
        assert_eq!(program, "c++");
        assert_eq!(args, vec!["-o", "/tmp/run-1-1/main", "/tmp/run-1-1/main.cpp"]);
    }

    #[test]
    fn test_placeholder_program_is_not_a_tool() {
        assert!(!CommandTemplate::new("{output}", &[]).is_external_tool());
        assert!(CommandTemplate::new("node", &["{source}"]).is_external_tool());
    }

    #[test]
    fn test_resolve_missing_program() {
        let err = resolve_program("definitely-not-a-real-interpreter-xyz").unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn test_resolve_path_is_used_verbatim() {
        let path = resolve_program("/some/where/main").unwrap();
        assert_eq!(path, PathBuf::from("/some/where/main"));
    }

    #[test]
    fn test_recipe_from_json_defaults() {
        let recipe: LanguageRecipe = serde_json::from_str(
            r#"{
                "id": "lua",
                "display_name": "Lua",
                "file_extension": "lua",
                "run_command": { "program": "lua", "args": ["{source}"] }
            }"#,
        )
        .unwrap();

        assert!(!recipe.requires_build_step());
        assert_eq!(recipe.kind, RecipeKind::Execute);
        assert_eq!(recipe.cleanup_policy, CleanupPolicy::RemoveOnExit);
        assert_eq!(recipe.source_file_name(), "main.lua");
        assert_eq!(recipe.required_tools(), vec!["lua"]);
        recipe.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_uppercase_id() {
        let recipe = LanguageRecipe {
            id: "Lua".to_string(),
            display_name: "Lua".to_string(),
            file_extension: "lua".to_string(),
            source_file_name: None,
            build_command: None,
            run_command: CommandTemplate::new("lua", &["{source}"]),
            cleanup_policy: CleanupPolicy::RemoveOnExit,
            kind: RecipeKind::Execute,
            aliases: Vec::new(),
        };
        assert!(matches!(recipe.validate(), Err(Error::Config(_))));
    }
}
