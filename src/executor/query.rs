// ============================================================================
// SELECT execution
// ============================================================================
//
// scan (table or catalog relation) -> filter -> aggregate | sort -> slice
// -> project
//
// ============================================================================

use super::eval::{Evaluator, RowScope};
use super::{ExecutionContext, Executor};
use crate::core::{DbError, Result, Row, Value};
use crate::parser::ast::{Expr, OrderByExpr, QueryStmt, SelectItem, Statement};
use crate::result::QueryResult;
use crate::storage::introspection::catalog_relation;
use std::cmp::Ordering;

pub struct QueryExecutor;

impl Executor for QueryExecutor {
    fn name(&self) -> &'static str {
        "SELECT"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Query(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Query(query) = stmt else {
            unreachable!();
        };
        let snapshot = ctx.tx.state().clone();
        run_query(query, &ctx.evaluator(&snapshot))
    }
}

/// Runs a query against the evaluator's state. Also used for scalar subqueries.
pub(crate) fn run_query(query: &QueryStmt, ev: &Evaluator<'_>) -> Result<QueryResult> {
    let (columns, rows) = scan(query.from.as_deref(), ev)?;

    let mut filtered = Vec::with_capacity(rows.len());
    for row in rows {
        if ev.matches(query.selection.as_ref(), RowScope::new(&columns, &row))? {
            filtered.push(row);
        }
    }

    let aggregate = query.projection.iter().any(|item| match item {
        SelectItem::Expr { expr, .. } => expr.is_aggregate(),
        SelectItem::Wildcard => false,
    });

    let output_columns = output_columns(&query.projection, &columns);

    if aggregate {
        let mut row = Vec::with_capacity(query.projection.len());
        for item in &query.projection {
            match item {
                SelectItem::Wildcard => {
                    return Err(DbError::query("\"*\" cannot be mixed with aggregates"));
                }
                SelectItem::Expr { expr, .. } => {
                    row.push(ev.eval_aggregate(expr, &columns, &filtered)?)
                }
            }
        }
        let rows = if query.offset.unwrap_or(0) > 0 || query.limit == Some(0) {
            Vec::new()
        } else {
            vec![row]
        };
        return Ok(QueryResult::new(output_columns, rows));
    }

    let sorted = sort(filtered, &query.order_by, &query.projection, &columns, ev)?;

    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(usize::MAX);

    let mut out = Vec::new();
    for row in sorted.into_iter().skip(offset).take(limit) {
        out.push(project(&query.projection, &columns, &row, ev)?);
    }
    Ok(QueryResult::new(output_columns, out))
}

fn scan(from: Option<&str>, ev: &Evaluator<'_>) -> Result<(Vec<String>, Vec<Row>)> {
    let Some(name) = from else {
        // SELECT without FROM yields a single empty row
        return Ok((Vec::new(), vec![Vec::new()]));
    };
    if let Some(relation) = catalog_relation(name, ev.state, ev.db) {
        return Ok((relation.columns, relation.rows));
    }
    let table = ev.state.require_table(name)?;
    let rows = table.rows().map(|(_, row)| row.clone()).collect();
    Ok((table.schema().column_names(), rows))
}

fn output_columns(projection: &[SelectItem], columns: &[String]) -> Vec<String> {
    let mut names = Vec::new();
    for item in projection {
        match item {
            SelectItem::Wildcard => names.extend(columns.iter().cloned()),
            SelectItem::Expr { alias: Some(alias), .. } => names.push(alias.clone()),
            SelectItem::Expr { expr, .. } => names.push(expr.output_name()),
        }
    }
    names
}

pub(crate) fn project(
    projection: &[SelectItem],
    columns: &[String],
    row: &[Value],
    ev: &Evaluator<'_>,
) -> Result<Row> {
    let scope = RowScope::new(columns, row);
    let mut out = Vec::with_capacity(projection.len());
    for item in projection {
        match item {
            SelectItem::Wildcard => out.extend(row.iter().cloned()),
            SelectItem::Expr { expr, .. } => out.push(ev.eval(expr, Some(scope))?),
        }
    }
    Ok(out)
}

/// ORDER BY keys may name a source column, an output alias or a 1-based
/// output position.
fn order_key<'q>(
    order: &'q OrderByExpr,
    projection: &'q [SelectItem],
    columns: &[String],
) -> &'q Expr {
    match &order.expr {
        Expr::Column(name) if !columns.contains(name) => projection
            .iter()
            .find_map(|item| match item {
                SelectItem::Expr { expr, alias: Some(alias) } if alias == name => Some(expr),
                _ => None,
            })
            .unwrap_or(&order.expr),
        Expr::Literal(Value::Integer(pos)) if *pos >= 1 => {
            match projection.get(*pos as usize - 1) {
                Some(SelectItem::Expr { expr, .. }) => expr,
                _ => &order.expr,
            }
        }
        other => other,
    }
}

fn sort(
    rows: Vec<Row>,
    order_by: &[OrderByExpr],
    projection: &[SelectItem],
    columns: &[String],
    ev: &Evaluator<'_>,
) -> Result<Vec<Row>> {
    if order_by.is_empty() {
        return Ok(rows);
    }

    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows {
        let scope = RowScope::new(columns, &row);
        let keys = order_by
            .iter()
            .map(|order| ev.eval(order_key(order, projection, columns), Some(scope)))
            .collect::<Result<Vec<_>>>()?;
        keyed.push((keys, row));
    }

    keyed.sort_by(|(a, _), (b, _)| {
        for (i, order) in order_by.iter().enumerate() {
            // NULLs sort last ascending, first descending
            let ord = match (a[i].is_null(), b[i].is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => a[i].compare(&b[i]).unwrap_or(Ordering::Equal),
            };
            let ord = if order.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}
