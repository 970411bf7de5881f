//! Row predicates for `filter` cleaning steps, evaluated with `evalexpr`.
//!
//! Each column is bound twice: under its normalized snake-case name and
//! positionally as `c0`, `c1`, ... Missing cells bind as the empty tuple
//! `()`. `row_number` is bound 1-based.

use chrono::NaiveDate;
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, Function, HashMapContext,
    Value as EvalValue, build_operator_tree, Node,
};

use crate::{
    data::{Value, normalize_column_name, parse_naive_date, value_to_evalexpr},
    error::ReconcileError,
    table::Table,
};

fn register_functions(context: &mut HashMapContext) -> Result<(), evalexpr::EvalexprError> {
    context.set_function(
        "is_missing".into(),
        Function::new(|argument| Ok(EvalValue::Boolean(matches!(argument, EvalValue::Empty)))),
    )?;

    context.set_function(
        "date_diff_days".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 2, "date_diff_days")?;
            let end = parse_date_arg(&args[0])?;
            let start = parse_date_arg(&args[1])?;
            Ok(EvalValue::Int((end - start).num_days()))
        }),
    )?;

    Ok(())
}

fn expect_args(
    arguments: &EvalValue,
    expected: usize,
    name: &str,
) -> Result<Vec<EvalValue>, evalexpr::EvalexprError> {
    match arguments {
        EvalValue::Tuple(values) => {
            if values.len() != expected {
                return Err(evalexpr::EvalexprError::wrong_function_argument_amount(
                    values.len(),
                    expected,
                ));
            }
            Ok(values.clone())
        }
        _ => Err(eval_error(&format!(
            "{name} expects {expected} arguments provided as a tuple"
        ))),
    }
}

fn eval_error(message: &str) -> evalexpr::EvalexprError {
    evalexpr::EvalexprError::CustomMessage(message.to_string())
}

fn parse_date_arg(value: &EvalValue) -> Result<NaiveDate, evalexpr::EvalexprError> {
    match value {
        EvalValue::String(raw) => {
            parse_naive_date(raw).ok_or_else(|| eval_error(&format!("'{raw}' is not a date")))
        }
        other => Err(eval_error(&format!("Expected date string, got {other:?}"))),
    }
}

/// A parsed expression plus the base context holding helper functions.
pub struct RowPredicate {
    expression: String,
    tree: Node,
    headers: Vec<String>,
    base: HashMapContext,
}

impl RowPredicate {
    /// Parses `expression` and checks it once with every column bound to
    /// `()`, so arity mistakes and unknown names fail before any row is read.
    pub fn compile(expression: &str, table: &Table) -> Result<Self, ReconcileError> {
        let invalid = |err: evalexpr::EvalexprError| ReconcileError::InvalidExpression {
            expression: expression.to_string(),
            message: err.to_string(),
        };
        let tree = build_operator_tree(expression).map_err(invalid)?;
        let mut base = HashMapContext::new();
        register_functions(&mut base).map_err(invalid)?;
        let predicate = Self {
            expression: expression.to_string(),
            tree,
            headers: table
                .columns()
                .iter()
                .map(|c| normalize_column_name(c.name()))
                .collect(),
            base,
        };

        let empty_row = vec![None; predicate.headers.len()];
        let context = predicate.bind(&empty_row, 1).map_err(invalid)?;
        if let Err(err) = predicate.tree.eval_with_context(&context) {
            if is_structural(&err) {
                return Err(invalid(err));
            }
        }
        Ok(predicate)
    }

    pub fn evaluate(&self, row: &[Option<Value>], row_number: usize) -> Result<bool, ReconcileError> {
        let invalid = |err: evalexpr::EvalexprError| ReconcileError::InvalidExpression {
            expression: self.expression.clone(),
            message: format!("row {row_number}: {err}"),
        };
        let context = self.bind(row, row_number).map_err(invalid)?;
        let result = self.tree.eval_with_context(&context).map_err(invalid)?;
        Ok(eval_value_truthy(result))
    }

    fn bind(
        &self,
        row: &[Option<Value>],
        row_number: usize,
    ) -> Result<HashMapContext, evalexpr::EvalexprError> {
        let mut context = self.base.clone();
        for (idx, (header, cell)) in self.headers.iter().zip(row).enumerate() {
            let value = cell
                .as_ref()
                .map(value_to_evalexpr)
                .unwrap_or(EvalValue::Empty);
            context.set_value(header.clone(), value.clone())?;
            context.set_value(format!("c{idx}"), value)?;
        }
        context.set_value("row_number".to_string(), EvalValue::Int(row_number as i64))?;
        Ok(context)
    }
}

/// Errors that no row values can avoid. Type mismatches against `()` are
/// left for evaluation time.
fn is_structural(err: &evalexpr::EvalexprError) -> bool {
    use evalexpr::EvalexprError::*;
    matches!(
        err,
        WrongOperatorArgumentAmount { .. }
            | AppendedToLeafNode
            | PrecedenceViolation
            | VariableIdentifierNotFound(_)
            | FunctionIdentifierNotFound(_)
            | UnmatchedLBrace
            | UnmatchedRBrace
            | UnmatchedDoubleQuote
            | MissingOperatorOutsideOfBrace
            | UnmatchedPartialToken { .. }
            | IllegalEscapeSequence(_)
    )
}

pub fn eval_value_truthy(value: EvalValue) -> bool {
    match value {
        EvalValue::Boolean(b) => b,
        EvalValue::Int(i) => i != 0,
        EvalValue::Float(f) => f != 0.0,
        EvalValue::String(s) => !s.is_empty(),
        EvalValue::Tuple(values) => values.into_iter().any(eval_value_truthy),
        EvalValue::Empty => false,
    }
}
