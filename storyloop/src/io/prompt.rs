//! Prompt rendering for agent sessions.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use super::prd::Story;
use crate::core::types::ErrorType;

const TEST_GENERATION_TEMPLATE: &str = include_str!("prompts/test_generation.md");
const IMPLEMENTATION_TEMPLATE: &str = include_str!("prompts/implementation.md");
const FIX_TEMPLATE: &str = include_str!("prompts/fix.md");

/// Inputs shared by the test-generation and implementation prompts.
#[derive(Debug, Clone)]
pub struct StoryPromptInput<'a> {
    pub story: &'a Story,
    pub prd_name: &'a str,
    /// Raw PRD document, when readable.
    pub prd_text: Option<&'a str>,
    pub test_path: &'a str,
    /// Current contents of the story's test file, when it exists.
    pub test_source: Option<&'a str>,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("test_generation", TEST_GENERATION_TEMPLATE)
            .context("load test_generation template")?;
        env.add_template("implementation", IMPLEMENTATION_TEMPLATE)
            .context("load implementation template")?;
        env.add_template("fix", FIX_TEMPLATE)
            .context("load fix template")?;
        Ok(Self { env })
    }

    pub fn render_test_generation(&self, input: &StoryPromptInput<'_>) -> Result<String> {
        self.render_story("test_generation", input)
    }

    pub fn render_implementation(&self, input: &StoryPromptInput<'_>) -> Result<String> {
        self.render_story("implementation", input)
    }

    pub fn render_fix(
        &self,
        story_id: &str,
        error_type: ErrorType,
        test_output: &str,
    ) -> Result<String> {
        let template = self.env.get_template("fix")?;
        let rendered = template.render(context! {
            story_id => story_id,
            error_type => error_type.as_str(),
            test_output => test_output.trim(),
        })?;
        Ok(rendered)
    }

    fn render_story(&self, name: &str, input: &StoryPromptInput<'_>) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template.render(context! {
            story => input.story,
            prd_name => input.prd_name,
            prd_text => input.prd_text.map(str::trim).filter(|s| !s.is_empty()),
            test_path => input.test_path,
            test_source => input.test_source.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story() -> Story {
        Story {
            id: "US-001".to_string(),
            title: "Login".to_string(),
            acceptance_criteria: vec!["form renders".to_string(), "bad password rejected".to_string()],
        }
    }

    #[test]
    fn test_generation_prompt_names_story_and_signal() {
        let engine = PromptEngine::new().expect("engine");
        let story = story();
        let prompt = engine
            .render_test_generation(&StoryPromptInput {
                story: &story,
                prd_name: "001-auth.json",
                prd_text: Some("{\"userStories\": []}"),
                test_path: "tests/test_US-001.py",
                test_source: None,
            })
            .expect("render");
        assert!(prompt.contains("tests/test_US-001.py"));
        assert!(prompt.contains("- bad password rejected"));
        assert!(prompt.contains("TESTS_GENERATED: US-001"));
        assert!(prompt.contains("001-auth.json"));
    }

    #[test]
    fn implementation_prompt_embeds_test_source() {
        let engine = PromptEngine::new().expect("engine");
        let story = story();
        let prompt = engine
            .render_implementation(&StoryPromptInput {
                story: &story,
                prd_name: "001-auth.json",
                prd_text: None,
                test_path: "tests/test_US-001.py",
                test_source: Some("def test_login():\n    assert login()\n"),
            })
            .expect("render");
        assert!(prompt.contains("def test_login():"));
        assert!(prompt.contains("STORY_DONE: US-001"));
        assert!(!prompt.contains("## PRD"));
    }

    #[test]
    fn fix_prompt_distinguishes_regressions() {
        let engine = PromptEngine::new().expect("engine");
        let regression = engine
            .render_fix("US-003", ErrorType::RegressionFailure, "FAILED tests/regression/x")
            .expect("render");
        assert!(regression.contains("broke a regression test"));
        assert!(regression.contains("FAILED tests/regression/x"));

        let own = engine
            .render_fix("US-003", ErrorType::TestFailure, "1 failed")
            .expect("render");
        assert!(own.contains("own tests still fail"));
    }
}
