use anyhow::Result;
use tokenloom::expr::{ExprOp, ExprToken, Expression};
use tokenloom::Error;

fn no_params(_: usize) -> Option<i64> {
    None
}

#[test]
fn constant_streams_fold_at_construction() -> Result<()> {
    // 4 3 + 2 *  ->  (4 + 3) * 2
    let expr = Expression::new(vec![
        ExprToken::Value(4),
        ExprToken::Value(3),
        ExprToken::Op(ExprOp::Add),
        ExprToken::Value(2),
        ExprToken::Op(ExprOp::Mul),
    ])?;
    assert_eq!(expr, Expression::Value(14));
    assert!(!expr.is_dynamic());
    Ok(())
}

#[test]
fn parameterized_streams_evaluate_against_lookup() -> Result<()> {
    // p0 2 * p1 +
    let expr = Expression::new(vec![
        ExprToken::Param(0),
        ExprToken::Value(2),
        ExprToken::Op(ExprOp::Mul),
        ExprToken::Param(1),
        ExprToken::Op(ExprOp::Add),
    ])?;
    assert!(expr.is_dynamic());
    assert_eq!(expr.value(&|ix| [5, 7].get(ix).copied())?, 17);
    assert_eq!(expr.param_indices(), vec![0, 1]);
    Ok(())
}

#[test]
fn unknown_parameter_index_is_an_eval_error() -> Result<()> {
    let expr = Expression::new(vec![ExprToken::Param(3)])?;
    assert!(matches!(expr.value(&no_params), Err(Error::Eval(_))));
    Ok(())
}

#[test]
fn division_and_modulus_by_zero_fail() {
    for op in [ExprOp::Div, ExprOp::Mod] {
        let result = Expression::new(vec![
            ExprToken::Value(10),
            ExprToken::Value(0),
            ExprToken::Op(op),
        ]);
        assert!(matches!(result, Err(Error::Eval(_))));
    }
}

#[test]
fn overflow_saturates_and_reports() {
    let result = Expression::new(vec![
        ExprToken::Value(i64::MAX),
        ExprToken::Value(1),
        ExprToken::Op(ExprOp::Add),
    ]);
    assert!(matches!(result, Err(Error::EvalOverflow { saturated: i64::MAX })));
}

#[test]
fn unary_and_function_operators() -> Result<()> {
    let neg = Expression::new(vec![ExprToken::Value(9), ExprToken::Op(ExprOp::Neg)])?;
    assert_eq!(neg, Expression::Value(-9));
    let abs = Expression::new(vec![ExprToken::Value(-4), ExprToken::Op(ExprOp::Abs)])?;
    assert_eq!(abs, Expression::Value(4));
    let min = Expression::new(vec![
        ExprToken::Value(3),
        ExprToken::Value(8),
        ExprToken::Op(ExprOp::Min),
    ])?;
    assert_eq!(min, Expression::Value(3));
    let max = Expression::new(vec![
        ExprToken::Value(3),
        ExprToken::Value(8),
        ExprToken::Op(ExprOp::Max),
    ])?;
    assert_eq!(max, Expression::Value(8));
    // exp(log(x)) rounds back for moderate x
    let roundtrip = Expression::new(vec![
        ExprToken::Value(1),
        ExprToken::Op(ExprOp::Exp),
    ])?;
    assert_eq!(roundtrip, Expression::Value(3)); // e rounded
    Ok(())
}

#[test]
fn malformed_streams_are_rejected() {
    assert!(matches!(
        Expression::new(vec![ExprToken::Op(ExprOp::Add)]),
        Err(Error::Eval(_))
    ));
    assert!(matches!(
        Expression::new(vec![ExprToken::Value(1), ExprToken::Value(2)]),
        Err(Error::Eval(_))
    ));
}

#[test]
fn power_operator_checks_domain() -> Result<()> {
    let pow = Expression::new(vec![
        ExprToken::Value(2),
        ExprToken::Value(10),
        ExprToken::Op(ExprOp::Pow),
    ])?;
    assert_eq!(pow, Expression::Value(1024));
    assert!(matches!(
        Expression::new(vec![
            ExprToken::Value(2),
            ExprToken::Value(-1),
            ExprToken::Op(ExprOp::Pow),
        ]),
        Err(Error::Eval(_))
    ));
    Ok(())
}
