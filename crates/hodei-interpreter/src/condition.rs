//! Evaluates a stage's `when` condition tree against the current variable
//! context (spec.md §4.8). `Branch`/`Tag` read from the `custom` namespace
//! under the `branch`/`tag` keys the caller is expected to populate before
//! interpretation starts; an absent value evaluates false rather than
//! erroring, since not every job has a meaningful branch/tag.

use hodei_config::variables::VariableContext;
use hodei_core::pipeline::Condition;

pub fn evaluate(condition: &Condition, ctx: &VariableContext) -> bool {
    match condition {
        Condition::Branch(expected) => ctx.custom.get("branch").map(|b| b == expected).unwrap_or(false),
        Condition::Tag(expected) => ctx.custom.get("tag").map(|t| t == expected).unwrap_or(false),
        Condition::Env { key, value } => ctx.env.get(key).map(|v| v == value).unwrap_or(false),
        Condition::Expression(expr) => ctx.eval_truthy(expr),
        Condition::AllOf(children) => children.iter().all(|c| evaluate(c, ctx)),
        Condition::AnyOf(children) => children.iter().any(|c| evaluate(c, ctx)),
        Condition::Not(inner) => !evaluate(inner, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodei_config::variables::VariableContextBuilder;

    #[test]
    fn branch_matches_custom_namespace() {
        let ctx = VariableContextBuilder::new().with_custom("branch", "main").build();
        assert!(evaluate(&Condition::Branch("main".to_string()), &ctx));
        assert!(!evaluate(&Condition::Branch("dev".to_string()), &ctx));
    }

    #[test]
    fn all_of_requires_every_child_true() {
        let ctx = VariableContextBuilder::new().with_env("CI", "true").build();
        let cond = Condition::AllOf(vec![
            Condition::Env { key: "CI".to_string(), value: "true".to_string() },
            Condition::Expression("${env.CI}".to_string()),
        ]);
        assert!(evaluate(&cond, &ctx));
    }

    #[test]
    fn not_inverts_inner_result() {
        let ctx = VariableContext::new();
        let cond = Condition::Not(Box::new(Condition::Branch("main".to_string())));
        assert!(evaluate(&cond, &ctx));
    }

    #[test]
    fn any_of_short_circuits_true() {
        let ctx = VariableContext::new();
        let cond = Condition::AnyOf(vec![
            Condition::Branch("main".to_string()),
            Condition::Tag("v1".to_string()),
        ]);
        assert!(!evaluate(&cond, &ctx));
    }
}
