//! Postfix expression evaluation for rates, delays and timings.
//!
//! Expressions arrive as a postfix token stream (the infix parser lives in
//! the API layer, outside this crate). An [`Expression`] whose tokens contain
//! no parameter reference is folded to a constant at construction, so the hot
//! path of rate resolution is usually a single load.
//!
//! Evaluation is total for well-formed streams: division or modulus by zero
//! and out-of-range parameter indices fail with [`Error::Eval`], and i64
//! overflow saturates and is reported as [`Error::EvalOverflow`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One token of a postfix expression stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprToken {
    /// Literal operand.
    Value(i64),
    /// Operand read from the parameter table at evaluation time.
    Param(usize),
    /// Operator or function applied to the top of the operand stack.
    Op(ExprOp),
}

/// Operators and functions understood by the evaluator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Neg,
    Log,
    Exp,
    Cos,
    Sin,
    Abs,
    Min,
    Max,
    Floor,
    Ceil,
}

impl ExprOp {
    fn arity(self) -> usize {
        match self {
            ExprOp::Add
            | ExprOp::Sub
            | ExprOp::Mul
            | ExprOp::Div
            | ExprOp::Mod
            | ExprOp::Pow
            | ExprOp::Min
            | ExprOp::Max => 2,
            ExprOp::Neg
            | ExprOp::Log
            | ExprOp::Exp
            | ExprOp::Cos
            | ExprOp::Sin
            | ExprOp::Abs
            | ExprOp::Floor
            | ExprOp::Ceil => 1,
        }
    }
}

/// A symbolic integer expression, pre-folded when it has no parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    /// Constant value, either given directly or folded from tokens.
    Value(i64),
    /// Postfix token stream referencing at least one parameter.
    Dynamic(Vec<ExprToken>),
}

impl Expression {
    /// Build an expression from a postfix token stream.
    ///
    /// Streams without parameter references are evaluated once here and
    /// stored as a constant. A malformed parameter-free stream surfaces its
    /// evaluation error immediately.
    pub fn new(tokens: Vec<ExprToken>) -> Result<Self> {
        let has_params = tokens.iter().any(|t| matches!(t, ExprToken::Param(_)));
        if has_params {
            Ok(Expression::Dynamic(tokens))
        } else {
            Ok(Expression::Value(eval_postfix(&tokens, &|_| None)?))
        }
    }

    /// Evaluate against a parameter lookup.
    ///
    /// `lookup` returns `None` for indices it does not know, which fails the
    /// evaluation with [`Error::Eval`].
    pub fn value(&self, lookup: &dyn Fn(usize) -> Option<i64>) -> Result<i64> {
        match self {
            Expression::Value(v) => Ok(*v),
            Expression::Dynamic(tokens) => eval_postfix(tokens, lookup),
        }
    }

    /// True if the expression depends on at least one parameter.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Expression::Dynamic(_))
    }

    /// Parameter indices this expression reads.
    pub fn param_indices(&self) -> Vec<usize> {
        match self {
            Expression::Value(_) => Vec::new(),
            Expression::Dynamic(tokens) => tokens
                .iter()
                .filter_map(|t| match t {
                    ExprToken::Param(ix) => Some(*ix),
                    _ => None,
                })
                .collect(),
        }
    }
}

impl From<i64> for Expression {
    fn from(v: i64) -> Self {
        Expression::Value(v)
    }
}

fn checked(op: ExprOp, a: i64, b: i64) -> Result<i64> {
    let (value, overflow, saturated) = match op {
        ExprOp::Add => {
            let (v, o) = a.overflowing_add(b);
            (v, o, a.saturating_add(b))
        }
        ExprOp::Sub => {
            let (v, o) = a.overflowing_sub(b);
            (v, o, a.saturating_sub(b))
        }
        ExprOp::Mul => {
            let (v, o) = a.overflowing_mul(b);
            (v, o, a.saturating_mul(b))
        }
        ExprOp::Div => {
            if b == 0 {
                return Err(Error::Eval("division by zero".into()));
            }
            (a / b, false, a / b)
        }
        ExprOp::Mod => {
            if b == 0 {
                return Err(Error::Eval("modulus by zero".into()));
            }
            (a % b, false, a % b)
        }
        ExprOp::Pow => {
            if b < 0 {
                return Err(Error::Eval("negative exponent".into()));
            }
            let exp = u32::try_from(b).map_err(|_| Error::Eval("exponent out of range".into()))?;
            let v = a.checked_pow(exp);
            (v.unwrap_or(0), v.is_none(), a.saturating_pow(exp))
        }
        ExprOp::Min => (a.min(b), false, a.min(b)),
        ExprOp::Max => (a.max(b), false, a.max(b)),
        _ => unreachable!("unary operator in binary dispatch"),
    };
    if overflow {
        Err(Error::EvalOverflow { saturated })
    } else {
        Ok(value)
    }
}

fn unary(op: ExprOp, a: i64) -> Result<i64> {
    match op {
        ExprOp::Neg => {
            if a == i64::MIN {
                Err(Error::EvalOverflow { saturated: i64::MAX })
            } else {
                Ok(-a)
            }
        }
        ExprOp::Abs => {
            if a == i64::MIN {
                Err(Error::EvalOverflow { saturated: i64::MAX })
            } else {
                Ok(a.abs())
            }
        }
        // Transcendental functions go through f64 and round to nearest.
        ExprOp::Log => {
            if a <= 0 {
                Err(Error::Eval("log of non-positive value".into()))
            } else {
                Ok((a as f64).ln().round() as i64)
            }
        }
        ExprOp::Exp => Ok((a as f64).exp().round() as i64),
        ExprOp::Cos => Ok((a as f64).cos().round() as i64),
        ExprOp::Sin => Ok((a as f64).sin().round() as i64),
        ExprOp::Floor | ExprOp::Ceil => Ok(a),
        _ => unreachable!("binary operator in unary dispatch"),
    }
}

fn eval_postfix(tokens: &[ExprToken], lookup: &dyn Fn(usize) -> Option<i64>) -> Result<i64> {
    let mut stack: Vec<i64> = Vec::with_capacity(8);
    for token in tokens {
        match token {
            ExprToken::Value(v) => stack.push(*v),
            ExprToken::Param(ix) => {
                let v = lookup(*ix).ok_or_else(|| Error::Eval(format!("unknown parameter index {ix}")))?;
                stack.push(v);
            }
            ExprToken::Op(op) => {
                if stack.len() < op.arity() {
                    return Err(Error::Eval("malformed postfix stream".into()));
                }
                let result = if op.arity() == 2 {
                    let b = stack.pop().expect("operand checked");
                    let a = stack.pop().expect("operand checked");
                    checked(*op, a, b)?
                } else {
                    let a = stack.pop().expect("operand checked");
                    unary(*op, a)?
                };
                stack.push(result);
            }
        }
    }
    if stack.len() != 1 {
        return Err(Error::Eval("postfix stream leaves extra operands".into()));
    }
    Ok(stack[0])
}
