// ============================================================================
// Expression evaluation
// ============================================================================
//
// SQL three-valued logic: comparisons involving NULL yield NULL, and a
// WHERE clause keeps a row only when its predicate is exactly TRUE.
//
// ============================================================================

use super::query::run_query;
use crate::core::{DbError, Result, Row, Value};
use crate::parser::adapter::is_now_function;
use crate::parser::ast::{BinaryOp, Expr};
use crate::storage::{DatabaseState, MemoryDatabase};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Column names and values of the row an expression is evaluated against.
#[derive(Clone, Copy)]
pub struct RowScope<'r> {
    pub columns: &'r [String],
    pub row: &'r [Value],
}

impl<'r> RowScope<'r> {
    pub fn new(columns: &'r [String], row: &'r [Value]) -> Self {
        Self { columns, row }
    }

    fn lookup(&self, name: &str) -> Result<&'r Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|idx| &self.row[idx])
            .ok_or_else(|| DbError::query(format!("column \"{name}\" does not exist")))
    }
}

pub struct Evaluator<'a> {
    pub(crate) state: &'a DatabaseState,
    pub(crate) db: &'a MemoryDatabase,
    params: &'a [Value],
    now: DateTime<Utc>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        state: &'a DatabaseState,
        db: &'a MemoryDatabase,
        params: &'a [Value],
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state,
            db,
            params,
            now,
        }
    }

    pub fn eval(&self, expr: &Expr, scope: Option<RowScope<'_>>) -> Result<Value> {
        match expr {
            Expr::Column(name) => match scope {
                Some(scope) => Ok(scope.lookup(name)?.clone()),
                None => Err(DbError::query(format!("column \"{name}\" does not exist"))),
            },
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Param(n) => self.param(*n),
            Expr::BinaryOp { left, op, right } => {
                let l = self.eval(left, scope)?;
                // short-circuit on a decided boolean
                match (op, l.is_null(), l.as_bool()) {
                    (BinaryOp::And, false, false) => return Ok(Value::Boolean(false)),
                    (BinaryOp::Or, false, true) => return Ok(Value::Boolean(true)),
                    _ => {}
                }
                let r = self.eval(right, scope)?;
                apply_binary(*op, l, r)
            }
            Expr::Not(inner) => match self.eval(inner, scope)? {
                Value::Null => Ok(Value::Null),
                value => Ok(Value::Boolean(!value.as_bool())),
            },
            Expr::Negate(inner) => match self.eval(inner, scope)? {
                Value::Null => Ok(Value::Null),
                Value::Integer(i) => Ok(Value::Integer(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(DbError::query(format!(
                    "operator does not exist: - {}",
                    other.type_name()
                ))),
            },
            Expr::IsNull { expr, negated } => {
                let is_null = self.eval(expr, scope)?.is_null();
                Ok(Value::Boolean(is_null != *negated))
            }
            Expr::In { expr, list, negated } => {
                let needle = self.eval(expr, scope)?;
                let mut candidates = Vec::with_capacity(list.len());
                for item in list {
                    match self.eval(item, scope)? {
                        Value::List(values) => candidates.extend(values),
                        value => candidates.push(value),
                    }
                }
                in_list(needle, &candidates, *negated)
            }
            Expr::Function { name, args } => {
                if expr.is_aggregate() {
                    return Err(DbError::query(format!(
                        "aggregate function {name} is not allowed here"
                    )));
                }
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg, scope))
                    .collect::<Result<Vec<_>>>()?;
                self.apply_function(name, values)
            }
            Expr::Wildcard => Err(DbError::query("\"*\" is not allowed here")),
            Expr::Subquery(query) => {
                let result = run_query(query, self)?;
                if result.columns.len() != 1 {
                    return Err(DbError::query("subquery must return only one column"));
                }
                match result.rows.len() {
                    0 => Ok(Value::Null),
                    1 => Ok(result.rows[0][0].clone()),
                    _ => Err(DbError::query(
                        "more than one row returned by a subquery used as an expression",
                    )),
                }
            }
        }
    }

    /// WHERE semantics: only TRUE keeps the row.
    pub fn matches(&self, predicate: Option<&Expr>, scope: RowScope<'_>) -> Result<bool> {
        match predicate {
            None => Ok(true),
            Some(expr) => Ok(matches!(self.eval(expr, Some(scope))?, Value::Boolean(true))),
        }
    }

    /// Evaluates an expression containing aggregates over a group of rows.
    pub fn eval_aggregate(&self, expr: &Expr, columns: &[String], rows: &[Row]) -> Result<Value> {
        match expr {
            Expr::Function { name, args } if matches!(name.as_str(), "count" | "max" | "min" | "sum") => {
                let arg = args.first();
                if name == "count" && matches!(arg, Some(Expr::Wildcard) | None) {
                    return Ok(Value::Integer(rows.len() as i64));
                }
                let arg = arg.ok_or_else(|| {
                    DbError::query(format!("function {name}() requires an argument"))
                })?;
                let mut values = Vec::with_capacity(rows.len());
                for row in rows {
                    let value = self.eval(arg, Some(RowScope::new(columns, row)))?;
                    if !value.is_null() {
                        values.push(value);
                    }
                }
                aggregate(name, values)
            }
            Expr::Function { name, args } => {
                let values = args
                    .iter()
                    .map(|arg| self.eval_aggregate(arg, columns, rows))
                    .collect::<Result<Vec<_>>>()?;
                self.apply_function(name, values)
            }
            Expr::BinaryOp { left, op, right } => apply_binary(
                *op,
                self.eval_aggregate(left, columns, rows)?,
                self.eval_aggregate(right, columns, rows)?,
            ),
            Expr::Not(inner) => match self.eval_aggregate(inner, columns, rows)? {
                Value::Null => Ok(Value::Null),
                value => Ok(Value::Boolean(!value.as_bool())),
            },
            Expr::Column(name) => Err(DbError::query(format!(
                "column \"{name}\" must appear in the GROUP BY clause or be used in an aggregate function"
            ))),
            other => self.eval(other, None),
        }
    }

    fn param(&self, n: usize) -> Result<Value> {
        n.checked_sub(1)
            .and_then(|idx| self.params.get(idx))
            .cloned()
            .ok_or_else(|| DbError::query(format!("there is no parameter ${n}")))
    }

    fn apply_function(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        match name {
            n if is_now_function(n) => Ok(Value::Timestamp(self.now)),
            "coalesce" => Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null)),
            "lower" | "upper" => match args.as_slice() {
                [Value::Null] => Ok(Value::Null),
                [Value::Text(s)] if name == "lower" => Ok(Value::Text(s.to_lowercase())),
                [Value::Text(s)] => Ok(Value::Text(s.to_uppercase())),
                _ => Err(DbError::query(format!("function {name} expects one text argument"))),
            },
            "length" => match args.as_slice() {
                [Value::Null] => Ok(Value::Null),
                [Value::Text(s)] => Ok(Value::Integer(s.chars().count() as i64)),
                _ => Err(DbError::query("function length expects one text argument")),
            },
            other => Err(DbError::query(format!("function {other} does not exist"))),
        }
    }
}

fn aggregate(name: &str, values: Vec<Value>) -> Result<Value> {
    match name {
        "count" => Ok(Value::Integer(values.len() as i64)),
        "max" | "min" => {
            let mut best: Option<Value> = None;
            for value in values {
                best = Some(match best {
                    None => value,
                    Some(current) => {
                        let ord = value.compare(&current)?;
                        let better = if name == "max" {
                            ord == Ordering::Greater
                        } else {
                            ord == Ordering::Less
                        };
                        if better { value } else { current }
                    }
                });
            }
            Ok(best.unwrap_or(Value::Null))
        }
        "sum" => {
            let mut iter = values.into_iter();
            let Some(first) = iter.next() else {
                return Ok(Value::Null);
            };
            iter.try_fold(first, |acc, value| apply_binary(BinaryOp::Add, acc, value))
        }
        other => Err(DbError::query(format!("unknown aggregate {other}"))),
    }
}

fn in_list(needle: Value, candidates: &[Value], negated: bool) -> Result<Value> {
    if needle.is_null() {
        return Ok(Value::Null);
    }
    let mut saw_null = false;
    for candidate in candidates {
        if candidate.is_null() {
            saw_null = true;
            continue;
        }
        if needle.compare(candidate)? == Ordering::Equal {
            return Ok(Value::Boolean(!negated));
        }
    }
    if saw_null {
        Ok(Value::Null)
    } else {
        Ok(Value::Boolean(negated))
    }
}

pub(crate) fn apply_binary(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    match op {
        BinaryOp::And => Ok(match (l.is_null(), r.is_null()) {
            _ if (!l.is_null() && !l.as_bool()) || (!r.is_null() && !r.as_bool()) => {
                Value::Boolean(false)
            }
            (false, false) => Value::Boolean(true),
            _ => Value::Null,
        }),
        BinaryOp::Or => Ok(match (l.is_null(), r.is_null()) {
            _ if (!l.is_null() && l.as_bool()) || (!r.is_null() && r.as_bool()) => {
                Value::Boolean(true)
            }
            (false, false) => Value::Boolean(false),
            _ => Value::Null,
        }),
        _ if l.is_null() || r.is_null() => Ok(Value::Null),
        BinaryOp::Eq => Ok(Value::Boolean(l.compare(&r)? == Ordering::Equal)),
        BinaryOp::NotEq => Ok(Value::Boolean(l.compare(&r)? != Ordering::Equal)),
        BinaryOp::Lt => Ok(Value::Boolean(l.compare(&r)? == Ordering::Less)),
        BinaryOp::LtEq => Ok(Value::Boolean(l.compare(&r)? != Ordering::Greater)),
        BinaryOp::Gt => Ok(Value::Boolean(l.compare(&r)? == Ordering::Greater)),
        BinaryOp::GtEq => Ok(Value::Boolean(l.compare(&r)? != Ordering::Less)),
        BinaryOp::Concat => Ok(Value::Text(format!("{l}{r}"))),
        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => {
            arithmetic(op, l, r)
        }
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    match (&l, &r) {
        (Value::Integer(a), Value::Integer(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                _ => {
                    if b == 0 {
                        return Err(DbError::query("division by zero"));
                    }
                    a.checked_div(b)
                }
            };
            result
                .map(Value::Integer)
                .ok_or_else(|| DbError::query("integer out of range"))
        }
        _ => {
            let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
                return Err(DbError::query(format!(
                    "operator does not exist: {} {:?} {}",
                    l.type_name(),
                    op,
                    r.type_name()
                )));
            };
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                _ => {
                    if b == 0.0 {
                        return Err(DbError::query("division by zero"));
                    }
                    a / b
                }
            };
            Ok(Value::Float(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_valued_logic() {
        let t = Value::Boolean(true);
        let f = Value::Boolean(false);
        assert_eq!(apply_binary(BinaryOp::And, Value::Null, f.clone()).unwrap(), f);
        assert_eq!(apply_binary(BinaryOp::And, Value::Null, t.clone()).unwrap(), Value::Null);
        assert_eq!(apply_binary(BinaryOp::Or, Value::Null, t.clone()).unwrap(), t);
        assert_eq!(
            apply_binary(BinaryOp::Eq, Value::Null, Value::Integer(1)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_in_list_with_nulls() {
        let list = [Value::Integer(1), Value::Null];
        assert_eq!(in_list(Value::Integer(1), &list, false).unwrap(), Value::Boolean(true));
        assert_eq!(in_list(Value::Integer(2), &list, false).unwrap(), Value::Null);
        assert_eq!(
            in_list(Value::Integer(2), &[Value::Integer(1)], true).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_aggregates() {
        let values = vec![Value::Integer(3), Value::Integer(7), Value::Integer(5)];
        assert_eq!(aggregate("max", values.clone()).unwrap(), Value::Integer(7));
        assert_eq!(aggregate("min", values.clone()).unwrap(), Value::Integer(3));
        assert_eq!(aggregate("sum", values).unwrap(), Value::Integer(15));
        assert_eq!(aggregate("max", Vec::new()).unwrap(), Value::Null);
    }

    #[test]
    fn test_division_by_zero() {
        assert!(apply_binary(BinaryOp::Divide, Value::Integer(1), Value::Integer(0)).is_err());
    }
}
