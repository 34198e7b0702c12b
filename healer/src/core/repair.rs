//! Repair instructions built from a failed attempt.
//!
//! Two shapes exist: one for programs that crash or exit non-zero, and one for
//! programs that exit cleanly but fail their own tests. Only the second forbids
//! touching the tests, so the two must never be mixed up.

use std::borrow::Cow;

use anyhow::{Context, Result};
use minijinja::{Environment, Value, context};

use crate::core::outcome::Outcome;

const RUNTIME_FAILURE_TEMPLATE: &str = include_str!("prompts/runtime_failure.md");
const TEST_FAILURE_TEMPLATE: &str = include_str!("prompts/test_failure.md");
const ENTRYPOINT_TEMPLATE: &str = include_str!("prompts/entrypoint.md");

/// Default per-stream byte budget for captured output embedded in a prompt.
pub const DEFAULT_PROMPT_OUTPUT_BUDGET: usize = 20_000;

/// Fixed replacement for stdout when the program died waiting for interactive input.
pub fn interactive_input_notice(entrypoint: &str) -> String {
    format!(
        "When run with {entrypoint}, the program must not require interactive input \
         and should use example values instead."
    )
}

/// Everything the builder needs from one classified attempt.
#[derive(Debug, Clone, Copy)]
pub struct RepairInputs<'a> {
    pub task: &'a str,
    pub outcome: Outcome,
    pub stdout: &'a str,
    pub stderr: &'a str,
}

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("runtime_failure", RUNTIME_FAILURE_TEMPLATE)
            .expect("runtime failure template should be valid");
        env.add_template("test_failure", TEST_FAILURE_TEMPLATE)
            .expect("test failure template should be valid");
        env.add_template("entrypoint", ENTRYPOINT_TEMPLATE)
            .expect("entrypoint template should be valid");
        Self { env }
    }

    fn render(&self, name: &str, ctx: Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))?;
        Ok(rendered)
    }
}

/// Instruction asking the generator for the entrypoint script only.
pub fn entrypoint_instruction(entrypoint: &str) -> Result<String> {
    PromptEngine::new().render("entrypoint", context! { entrypoint => entrypoint })
}

/// Builds repair instructions, clipping captured output to a byte budget.
#[derive(Debug, Clone)]
pub struct RepairPromptBuilder {
    output_budget_bytes: usize,
}

impl Default for RepairPromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_OUTPUT_BUDGET)
    }
}

impl RepairPromptBuilder {
    pub fn new(output_budget_bytes: usize) -> Self {
        Self {
            output_budget_bytes,
        }
    }

    /// Render the instruction for `inputs.outcome`, or `None` when nothing needs repair.
    pub fn build(&self, inputs: &RepairInputs<'_>) -> Result<Option<String>> {
        let template = match inputs.outcome {
            Outcome::RuntimeFailure => "runtime_failure",
            Outcome::TestFailure => "test_failure",
            Outcome::Success | Outcome::Timeout => return Ok(None),
        };
        let stdout = clip_output(inputs.stdout, self.output_budget_bytes);
        let stderr = clip_output(inputs.stderr, self.output_budget_bytes);
        let prompt = PromptEngine::new().render(
            template,
            context! {
                task => inputs.task.trim(),
                stdout => stdout.trim_end(),
                stderr => stderr.trim_end(),
            },
        )?;
        Ok(Some(prompt))
    }
}

/// Keep the head and tail of over-long output; the error is usually at the end.
pub fn clip_output(text: &str, budget: usize) -> Cow<'_, str> {
    if text.len() <= budget {
        return Cow::Borrowed(text);
    }
    let head_len = budget / 3;
    let tail_len = budget - head_len;
    let head_end = floor_boundary(text, head_len);
    let tail_start = ceil_boundary(text, text.len() - tail_len);
    let omitted = tail_start - head_end;
    Cow::Owned(format!(
        "{}\n[... {omitted} bytes omitted ...]\n{}",
        &text[..head_end],
        &text[tail_start..]
    ))
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
