use std::collections::HashMap;

use super::ast::{BinOp, Expr};
use super::parser::ALLOWED_FUNCTIONS;
use crate::error::FormulaError;

/// Read-only binding environment for a single evaluation. `val`,
/// `value` and `x` are aliases for the same scalar in single-variable
/// mode; multi-variable mode (automation conditions/targets) binds
/// whatever identifiers the caller supplies, typically
/// `stat_<sensor>_<fn>_<window>` keys alongside plain sensor values.
pub struct Env<'a> {
    vars: &'a HashMap<String, f64>,
}

impl<'a> Env<'a> {
    pub fn single(value: f64) -> OwnedEnv {
        let mut vars = HashMap::new();
        vars.insert("val".to_string(), value);
        vars.insert("value".to_string(), value);
        vars.insert("x".to_string(), value);
        OwnedEnv { vars }
    }

    pub fn from_map(vars: &'a HashMap<String, f64>) -> Self {
        Env { vars }
    }

    fn lookup(&self, name: &str) -> Result<f64, FormulaError> {
        match name {
            "pi" => return Ok(std::f64::consts::PI),
            "e" => return Ok(std::f64::consts::E),
            _ => {}
        }
        self.vars
            .get(name)
            .copied()
            .ok_or_else(|| FormulaError::Runtime(format!("unknown identifier '{name}'")))
    }
}

/// Owns the backing map so callers can build an environment and hand
/// out a borrow to `evaluate`.
pub struct OwnedEnv {
    vars: HashMap<String, f64>,
}

impl OwnedEnv {
    pub fn as_env(&self) -> Env<'_> {
        Env { vars: &self.vars }
    }
}

pub fn evaluate(expr: &Expr, env: &Env) -> Result<f64, FormulaError> {
    let result = eval_inner(expr, env)?;
    if result.is_nan() {
        return Err(FormulaError::Runtime("result is NaN".into()));
    }
    Ok(result)
}

fn eval_inner(expr: &Expr, env: &Env) -> Result<f64, FormulaError> {
    match expr {
        Expr::Num(n) => Ok(*n),
        Expr::Var(name) => env.lookup(name),
        Expr::Neg(inner) => Ok(-eval_inner(inner, env)?),
        Expr::BinOp(op, lhs, rhs) => {
            let l = eval_inner(lhs, env)?;
            let r = eval_inner(rhs, env)?;
            apply_binop(*op, l, r)
        }
        Expr::Call(name, args) => {
            let values = args
                .iter()
                .map(|a| eval_inner(a, env))
                .collect::<Result<Vec<_>, _>>()?;
            apply_call(name, &values)
        }
    }
}

fn apply_binop(op: BinOp, l: f64, r: f64) -> Result<f64, FormulaError> {
    match op {
        BinOp::Add => Ok(l + r),
        BinOp::Sub => Ok(l - r),
        BinOp::Mul => Ok(l * r),
        BinOp::Div => {
            if r == 0.0 {
                Err(FormulaError::DivisionByZero)
            } else {
                Ok(l / r)
            }
        }
        BinOp::Rem => {
            if r == 0.0 {
                Err(FormulaError::DivisionByZero)
            } else {
                Ok(l % r)
            }
        }
        BinOp::Pow => Ok(l.powf(r)),
    }
}

fn apply_call(name: &str, args: &[f64]) -> Result<f64, FormulaError> {
    if !ALLOWED_FUNCTIONS.contains(&name) {
        return Err(FormulaError::Runtime(format!("unknown function '{name}'")));
    }

    fn arity1(name: &str, args: &[f64]) -> Result<f64, FormulaError> {
        match args {
            [v] => Ok(*v),
            _ => Err(FormulaError::Runtime(format!(
                "{name} expects exactly 1 argument"
            ))),
        }
    }

    match name {
        "abs" | "fabs" => arity1(name, args).map(f64::abs),
        "round" => arity1(name, args).map(|v| v.round()),
        "floor" => arity1(name, args).map(|v| v.floor()),
        "ceil" => arity1(name, args).map(|v| v.ceil()),
        "sqrt" => {
            let v = arity1(name, args)?;
            if v < 0.0 {
                return Err(FormulaError::Runtime("sqrt of negative number".into()));
            }
            Ok(v.sqrt())
        }
        "log" => {
            let v = arity1(name, args)?;
            if v <= 0.0 {
                return Err(FormulaError::Runtime("log of non-positive number".into()));
            }
            Ok(v.ln())
        }
        "log10" => {
            let v = arity1(name, args)?;
            if v <= 0.0 {
                return Err(FormulaError::Runtime("log10 of non-positive number".into()));
            }
            Ok(v.log10())
        }
        "log2" => {
            let v = arity1(name, args)?;
            if v <= 0.0 {
                return Err(FormulaError::Runtime("log2 of non-positive number".into()));
            }
            Ok(v.log2())
        }
        "exp" => arity1(name, args).map(f64::exp),
        "sin" => arity1(name, args).map(f64::sin),
        "cos" => arity1(name, args).map(f64::cos),
        "tan" => arity1(name, args).map(f64::tan),
        "asin" => arity1(name, args).map(f64::asin),
        "acos" => arity1(name, args).map(f64::acos),
        "atan" => arity1(name, args).map(f64::atan),
        "degrees" => arity1(name, args).map(|v| v.to_degrees()),
        "radians" => arity1(name, args).map(|v| v.to_radians()),
        "int" => arity1(name, args).map(|v| v.trunc()),
        "float" => arity1(name, args),
        "bool" => arity1(name, args).map(|v| if v != 0.0 { 1.0 } else { 0.0 }),
        "len" => arity1(name, args).map(|_| 1.0),
        "atan2" => match args {
            [y, x] => Ok(y.atan2(*x)),
            _ => Err(FormulaError::Runtime("atan2 expects 2 arguments".into())),
        },
        "pow" => match args {
            [base, exp] => Ok(base.powf(*exp)),
            _ => Err(FormulaError::Runtime("pow expects 2 arguments".into())),
        },
        "min" => args
            .iter()
            .copied()
            .reduce(f64::min)
            .ok_or_else(|| FormulaError::Runtime("min expects at least 1 argument".into())),
        "max" => args
            .iter()
            .copied()
            .reduce(f64::max)
            .ok_or_else(|| FormulaError::Runtime("max expects at least 1 argument".into())),
        "sum" => Ok(args.iter().sum()),
        _ => unreachable!("function '{name}' is allow-listed but not implemented"),
    }
}
