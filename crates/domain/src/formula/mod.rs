mod ast;
mod evaluator;
mod lexer;
mod parser;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::FormulaError;
use evaluator::Env;

/// Checks that `expr` parses under the sandboxed grammar. Does not
/// guarantee every identifier resolves or every function call
/// succeeds at runtime; `evaluate`/`evaluate_with_env` is what catches
/// unknown-identifier and arity errors against a concrete environment.
pub fn validate(expr: &str) -> Result<(), FormulaError> {
    parser::parse(expr).map(|_| ())
}

/// Evaluates `expr` against a single scalar, bound as `val`, `value`
/// and `x`.
pub fn evaluate(expr: &str, value: f64) -> Result<f64, FormulaError> {
    let ast = parser::parse(expr)?;
    let env = Env::single(value);
    evaluator::evaluate(&ast, &env.as_env())
}

/// Evaluates `expr` against an arbitrary identifier environment, used
/// by automation rule conditions and target formulas where both plain
/// sensor values and `stat_<sensor>_<fn>_<window>` stats-cache entries
/// are in scope.
pub fn evaluate_with_env(expr: &str, vars: &HashMap<String, f64>) -> Result<f64, FormulaError> {
    let ast = parser::parse(expr)?;
    let env = evaluator::Env::from_map(vars);
    evaluator::evaluate(&ast, &env)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaTestResult {
    pub valid: bool,
    pub result: Option<f64>,
    pub error: Option<String>,
}

/// Backing implementation for the `test-formula` one-shot operation:
/// validates and evaluates `expr` against a sample value, reporting
/// success or the failure reason rather than propagating an error.
pub fn test_formula(expr: &str, sample: f64) -> FormulaTestResult {
    match evaluate(expr, sample) {
        Ok(result) => FormulaTestResult {
            valid: true,
            result: Some(result),
            error: None,
        },
        Err(err) => FormulaTestResult {
            valid: false,
            result: None,
            error: Some(err.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_plain_arithmetic() {
        assert!(validate("val * 2 + 1").is_ok());
    }

    #[test]
    fn validate_rejects_sandbox_escape_attempt() {
        assert!(validate("__import__('os').system('ls')").is_err());
    }

    #[test]
    fn evaluate_distinguishes_division_by_zero() {
        assert_eq!(evaluate("val / 0", 5.0), Err(FormulaError::DivisionByZero));
    }

    #[test]
    fn test_formula_reports_failure_without_propagating() {
        let result = test_formula("val / 0", 1.0);
        assert!(!result.valid);
        assert!(result.result.is_none());
        assert!(result.error.is_some());
    }

    #[test]
    fn test_formula_reports_success() {
        let result = test_formula("val * 1.8 + 32", 100.0);
        assert!(result.valid);
        assert_eq!(result.result, Some(212.0));
    }

    #[test]
    fn evaluate_with_env_supports_stats_identifiers() {
        let mut vars = HashMap::new();
        vars.insert("stat_temp1_max_1h".to_string(), 30.0);
        assert_eq!(
            evaluate_with_env("stat_temp1_max_1h - 5", &vars).unwrap(),
            25.0
        );
    }
}
