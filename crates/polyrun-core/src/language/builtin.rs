//! Built-in recipe table.
//!
//! Where a language can be run either interpreted or compiled, the recipe
//! with fewer external tools wins: Java uses the single-file source
//! launcher and Go uses `go run`.

use super::recipe::{CleanupPolicy, CommandTemplate, LanguageRecipe, RecipeKind};

/// Id the block editor's output is submitted under.
pub const BLOCKLY_ID: &str = "blockly";

#[cfg(windows)]
const PYTHON: &str = "python";
#[cfg(not(windows))]
const PYTHON: &str = "python3";

fn interpreted(id: &str, display_name: &str, ext: &str, program: &str, args: &[&str]) -> LanguageRecipe {
    LanguageRecipe {
        id: id.to_string(),
        display_name: display_name.to_string(),
        file_extension: ext.to_string(),
        source_file_name: None,
        build_command: None,
        run_command: CommandTemplate::new(program, args),
        cleanup_policy: CleanupPolicy::RemoveOnExit,
        kind: RecipeKind::Execute,
        aliases: Vec::new(),
    }
}

fn compiled(id: &str, display_name: &str, ext: &str, compiler: &str, args: &[&str]) -> LanguageRecipe {
    LanguageRecipe {
        build_command: Some(CommandTemplate::new(compiler, args)),
        run_command: CommandTemplate::new("{output}", &[]),
        ..interpreted(id, display_name, ext, "{output}", &[])
    }
}

fn rendered(id: &str, display_name: &str, ext: &str) -> LanguageRecipe {
    LanguageRecipe {
        cleanup_policy: CleanupPolicy::Retain,
        kind: RecipeKind::Render,
        run_command: opener(),
        ..interpreted(id, display_name, ext, "", &[])
    }
}

/// Platform command that opens a document in the default viewer.
fn opener() -> CommandTemplate {
    if cfg!(windows) {
        CommandTemplate::new("cmd", &["/C", "start", "", "{preview}"])
    } else if cfg!(target_os = "macos") {
        CommandTemplate::new("open", &["{preview}"])
    } else {
        CommandTemplate::new("xdg-open", &["{preview}"])
    }
}

fn with_aliases(mut recipe: LanguageRecipe, aliases: &[&str]) -> LanguageRecipe {
    recipe.aliases = aliases.iter().map(|a| a.to_string()).collect();
    recipe
}

/// All built-in recipes.
pub fn builtin_recipes() -> Vec<LanguageRecipe> {
    vec![
        with_aliases(
            interpreted("python", "Python", "py", PYTHON, &["-u", "{source}"]),
            &["py", "python3"],
        ),
        with_aliases(
            interpreted("javascript", "JavaScript", "js", "node", &["{source}"]),
            &["js", "node"],
        ),
        with_aliases(rendered("html", "HTML", "html"), &["htm"]),
        rendered("css", "CSS", "css"),
        LanguageRecipe {
            source_file_name: Some("Main.java".to_string()),
            ..interpreted("java", "Java", "java", "java", &["{source}"])
        },
        with_aliases(
            compiled(
                "cpp",
                "C++",
                "cpp",
                "c++",
                &["-std=c++17", "-O2", "-o", "{output}", "{source}"],
            ),
            &["c++", "cxx"],
        ),
        compiled("c", "C", "c", "cc", &["-O2", "-o", "{output}", "{source}"]),
        with_aliases(
            compiled(
                "rust",
                "Rust",
                "rs",
                "rustc",
                &["--edition", "2021", "-O", "-o", "{output}", "{source}"],
            ),
            &["rs"],
        ),
        interpreted("php", "PHP", "php", "php", &["{source}"]),
        with_aliases(
            interpreted("go", "Go", "go", "go", &["run", "{source}"]),
            &["golang"],
        ),
        with_aliases(
            interpreted(
                "sql",
                "SQL (SQLite)",
                "sql",
                "sqlite3",
                &["-batch", "-bail", "-init", "{source}", ":memory:", ".quit"],
            ),
            &["sqlite"],
        ),
        with_aliases(
            interpreted("shell", "Shell", "sh", "sh", &["{source}"]),
            &["sh", "bash"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_ids_are_unique_and_valid() {
        let recipes = builtin_recipes();
        let mut ids: Vec<&str> = recipes.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), recipes.len());

        for recipe in &recipes {
            recipe.validate().unwrap();
        }
    }

    #[test]
    fn test_compiled_recipes_run_their_output() {
        for recipe in builtin_recipes().iter().filter(|r| r.requires_build_step()) {
            assert_eq!(recipe.run_command.program, "{output}", "{}", recipe.id);
            assert_eq!(recipe.required_tools().len(), 1);
        }
    }

    #[test]
    fn test_sql_source_path_is_a_single_argument() {
        let recipes = builtin_recipes();
        let sql = recipes.iter().find(|r| r.id == "sql").unwrap();
        let dir = std::path::Path::new("/tmp/it's here");
        let source = dir.join("main.sql");
        let vars = crate::language::TemplateVars {
            source: &source,
            output: &source,
            dir,
            stem: "main",
            preview: &source,
        };

        let (_, args) = sql.run_command.render(&vars);
        assert!(args.iter().any(|arg| arg == "/tmp/it's here/main.sql"));
    }

    #[test]
    fn test_rendered_recipes_are_retained() {
        for recipe in builtin_recipes().iter().filter(|r| r.kind == RecipeKind::Render) {
            assert_eq!(recipe.cleanup_policy, CleanupPolicy::Retain);
            assert!(!recipe.requires_build_step());
        }
    }
}
