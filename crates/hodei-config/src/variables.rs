//! `${...}` interpolation used for step environment resolution and
//! condition-tree expression evaluation (spec.md §4.8).
//!
//! Supported namespaces:
//! - `${env.VAR_NAME}` — current effective environment at the point of
//!   interpolation (merge order: worker process env, job env, enclosing
//!   `withEnv` blocks, per-step overrides — see `VariableContext::merge`).
//! - `${params.NAME}` — job submission parameters.
//! - `${name}` — custom/free variables set by the caller.
//! - `${timestamp}` / `${date}` / `${datetime}` — wall-clock helpers.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// The effective variable set visible to one step: environment, job
/// parameters, and any custom values an interpreter stage wants to expose
/// (e.g. the current branch/tag for `Condition::Branch`/`Condition::Tag`).
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub env: HashMap<String, String>,
    pub params: HashMap<String, String>,
    pub custom: HashMap<String, String>,
}

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate `env` from the current process environment -- the base
    /// layer of the merge order described in spec.md §4.8.
    pub fn populate_process_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    /// Produces a child context with `overrides` layered on top of `env`,
    /// innermost wins, as required for nested `withEnv` blocks and per-step
    /// overrides. Does not mutate `self`.
    pub fn merge(&self, overrides: &HashMap<String, String>) -> Self {
        let mut env = self.env.clone();
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            env,
            params: self.params.clone(),
            custom: self.custom.clone(),
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();
        match parts.as_slice() {
            ["env", name] => self.env.get(*name).cloned(),
            ["params", name] => self.params.get(*name).cloned(),
            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),
            ["datetime"] => Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            [name] => self.custom.get(*name).cloned(),
            _ => None,
        }
    }

    /// Interpolates all `${...}` occurrences in `input`. Unknown variables
    /// are left untouched so a typo is visible in the rendered command
    /// rather than silently becoming an empty string.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{var_name}}}"))
            })
            .to_string()
    }

    pub fn interpolate_map(&self, map: &HashMap<String, String>) -> HashMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }

    /// Evaluates a `Condition::Expression` leaf: interpolate then treat the
    /// result as truthy unless it is empty, `"false"`, or `"0"`.
    pub fn eval_truthy(&self, expr: &str) -> bool {
        let rendered = self.interpolate(expr).trim().to_lowercase();
        !(rendered.is_empty() || rendered == "false" || rendered == "0")
    }
}

/// Fluent builder, mirroring the construction style already used for
/// `Job`/`Worker` elsewhere in the workspace.
#[derive(Default)]
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.params.insert(key.into(), value.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.custom.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_env_interpolation() {
        let ctx = VariableContextBuilder::new()
            .with_env("NAME", "world")
            .build();
        assert_eq!(ctx.interpolate("hello ${env.NAME}"), "hello world");
    }

    #[test]
    fn unknown_variable_preserved() {
        let ctx = VariableContext::new();
        assert_eq!(ctx.interpolate("${unknown.var}"), "${unknown.var}");
    }

    #[test]
    fn merge_lets_innermost_withenv_win() {
        let base = VariableContextBuilder::new().with_env("X", "outer").build();
        let mut inner_overrides = HashMap::new();
        inner_overrides.insert("X".to_string(), "inner".to_string());
        let merged = base.merge(&inner_overrides);
        assert_eq!(merged.interpolate("${env.X}"), "inner");
    }

    #[test]
    fn params_namespace_resolves() {
        let ctx = VariableContextBuilder::new()
            .with_param("version", "1.2.3")
            .build();
        assert_eq!(ctx.interpolate("v${params.version}"), "v1.2.3");
    }

    #[test]
    fn truthy_expression_evaluation() {
        let ctx = VariableContextBuilder::new().with_custom("flag", "true").build();
        assert!(ctx.eval_truthy("${flag}"));
        assert!(!ctx.eval_truthy("${missing}"));
    }

    #[test]
    fn nested_braces_in_json_survive() {
        let ctx = VariableContextBuilder::new().with_custom("sha", "abc123").build();
        let result = ctx.interpolate(r#"{"sha": "${sha}"}"#);
        assert_eq!(result, r#"{"sha": "abc123"}"#);
    }
}
