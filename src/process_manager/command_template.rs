// External tool command templates with {placeholder} substitution
use crate::error::{JobError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Program plus argument tokens; `{input}`, `{output}`, `{config}` and
/// `{iterations}` are replaced inside each token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl TryFrom<Vec<String>> for CommandTemplate {
    type Error = JobError;

    fn try_from(tokens: Vec<String>) -> Result<Self> {
        let mut tokens = tokens.into_iter();
        let program = tokens
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| JobError::config("command template is empty"))?;
        Ok(Self {
            program,
            args: tokens.collect(),
        })
    }
}

impl From<CommandTemplate> for Vec<String> {
    fn from(template: CommandTemplate) -> Self {
        std::iter::once(template.program).chain(template.args).collect()
    }
}

impl CommandTemplate {
    pub fn from_tokens(tokens: &[&str]) -> Self {
        let mut tokens = tokens.iter().map(|t| t.to_string());
        Self {
            program: tokens.next().unwrap_or_default(),
            args: tokens.collect(),
        }
    }

    /// Accepts a JSON array of strings or a whitespace-separated command line
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let tokens: Vec<String> = if value.starts_with('[') {
            serde_json::from_str(value)
                .map_err(|e| JobError::Config(format!("invalid command array {:?}: {}", value, e)))?
        } else {
            value.split_whitespace().map(str::to_string).collect()
        };
        Self::try_from(tokens)
    }

    pub fn render(&self, vars: &StageVars<'_>) -> RenderedCommand {
        RenderedCommand {
            program: vars.substitute(&self.program),
            args: self.args.iter().map(|arg| vars.substitute(arg)).collect(),
        }
    }
}

/// Values bound to the template placeholders for one stage invocation
#[derive(Debug, Clone)]
pub struct StageVars<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub config: Option<&'a Path>,
    pub iterations: u32,
}

impl StageVars<'_> {
    fn substitute(&self, token: &str) -> String {
        let mut rendered = token
            .replace("{input}", &self.input.to_string_lossy())
            .replace("{output}", &self.output.to_string_lossy())
            .replace("{iterations}", &self.iterations.to_string());
        if let Some(config) = self.config {
            rendered = rendered.replace("{config}", &config.to_string_lossy());
        }
        rendered
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RenderedCommand {
    /// Literal command line recorded on the job
    pub fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
