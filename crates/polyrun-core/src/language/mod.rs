//! Language recipes and the registry that resolves them.

mod builtin;
mod recipe;
mod registry;

pub use builtin::{BLOCKLY_ID, builtin_recipes};
pub use recipe::{
    CleanupPolicy, CommandTemplate, LanguageRecipe, RecipeKind, ResolvedCommand, TemplateVars,
    resolve_program,
};
pub use registry::LanguageRegistry;
