//! Named pipeline recipes
//!
//! A recipe names an input kind, the phases to run and whether the
//! post-processing pass follows. The [`RecipeRegistry`] maps recipe names
//! to recipes; [`super::factory::PipelineFactory`] builds pipelines from them.

use super::{recipes, PHASE1_END, PHASE2_END, PHASE3_END};
use std::collections::HashMap;

/// What a pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Wiki source, tokenized first
    Text,
    /// An already tokenized stream
    Tokens,
}

/// One transformation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Ranks [0,1): synchronous input patches
    Input,
    /// Ranks [1,2): asynchronous expansion
    Expansion,
    /// Ranks [2,3): synchronous block structure
    Structure,
}

impl Phase {
    pub fn min_rank(self) -> f64 {
        match self {
            Phase::Input => 0.0,
            Phase::Expansion => PHASE1_END,
            Phase::Structure => PHASE2_END,
        }
    }

    pub fn end_rank(self) -> f64 {
        match self {
            Phase::Input => PHASE1_END,
            Phase::Expansion => PHASE2_END,
            Phase::Structure => PHASE3_END,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Input => "input",
            Phase::Expansion => "expansion",
            Phase::Structure => "structure",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub name: String,
    pub description: String,
    pub input: InputKind,
    pub phases: Vec<Phase>,
    /// Remove useless paragraph wrappers after the last phase
    pub post_process: bool,
}

/// Registry of recipes.
#[derive(Debug, Clone)]
pub struct RecipeRegistry {
    recipes: HashMap<String, Recipe>,
}

impl RecipeRegistry {
    pub fn new() -> Self {
        RecipeRegistry {
            recipes: HashMap::new(),
        }
    }

    pub fn register(&mut self, recipe: Recipe) {
        self.recipes.insert(recipe.name.clone(), recipe);
    }

    pub fn get(&self, name: &str) -> Option<&Recipe> {
        self.recipes.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.recipes.contains_key(name)
    }

    /// All recipes, sorted by name.
    pub fn list_all(&self) -> Vec<&Recipe> {
        let mut all: Vec<_> = self.recipes.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Registry with the built-in recipes.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(Recipe {
            name: recipes::TEXT_FULL.into(),
            description: "Full document: tokenize, expand, build blocks, clean up".into(),
            input: InputKind::Text,
            phases: vec![Phase::Input, Phase::Expansion, Phase::Structure],
            post_process: true,
        });

        registry.register(Recipe {
            name: recipes::TEXT.into(),
            description: "Template bodies: tokenize and expand".into(),
            input: InputKind::Text,
            phases: vec![Phase::Input, Phase::Expansion],
            post_process: false,
        });

        registry.register(Recipe {
            name: recipes::TOKENS.into(),
            description: "Re-expand a literal token sequence".into(),
            input: InputKind::Tokens,
            phases: vec![Phase::Input, Phase::Expansion],
            post_process: false,
        });

        registry.register(Recipe {
            name: recipes::TOKENS_EXPANDED.into(),
            description: "Expand attribute and argument tokens".into(),
            input: InputKind::Tokens,
            phases: vec![Phase::Expansion],
            post_process: false,
        });

        registry
    }
}

impl Default for RecipeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_registered() {
        let registry = RecipeRegistry::with_defaults();
        assert!(registry.has(recipes::TEXT_FULL));
        assert!(registry.has(recipes::TOKENS_EXPANDED));
        assert!(!registry.has("text/html"));
        let full = registry.get(recipes::TEXT_FULL).unwrap();
        assert_eq!(full.phases.len(), 3);
        assert!(full.post_process);
    }

    #[test]
    fn test_list_all_sorted() {
        let registry = RecipeRegistry::with_defaults();
        let names: Vec<&str> = registry.list_all().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["text/wiki", "text/wiki/full", "tokens/wiki", "tokens/wiki/expanded"]
        );
    }

    #[test]
    fn test_phase_ranks() {
        assert_eq!(Phase::Expansion.min_rank(), 1.0);
        assert_eq!(Phase::Expansion.end_rank(), 2.0);
        assert!(Phase::Input < Phase::Structure);
    }
}
