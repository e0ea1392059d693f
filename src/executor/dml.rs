use super::eval::RowScope;
use super::integrity::{check_row, default_value};
use super::query::project;
use super::{ExecutionContext, Executor};
use crate::core::{DbError, Result, Row};
use crate::parser::ast::{Expr, InsertStmt, SelectItem, Statement};
use crate::result::QueryResult;
use crate::transaction::Change;

pub struct InsertExecutor;

impl Executor for InsertExecutor {
    fn name(&self) -> &'static str {
        "INSERT"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Insert(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Insert(insert) = stmt else {
            unreachable!();
        };
        ctx.tx.check_writable("INSERT")?;

        let rows = self.build_rows(insert, ctx)?;
        let count = rows.len();
        let mut returned = Vec::new();

        for row in rows {
            // checked against the working copy so rows of the same statement collide
            let current = ctx.tx.state().clone();
            let ev = ctx.evaluator(&current);
            let table = current.require_table(&insert.table_name)?;
            check_row(&current, table, &row, None, &ev)?;

            if !insert.returning.is_empty() {
                let columns = table.schema().column_names();
                returned.push(project(&insert.returning, &columns, &row, &ev)?);
            }

            let row_id = ctx.db.next_row_id();
            ctx.tx.apply(Change::InsertRow {
                table: insert.table_name.clone(),
                row_id,
                row,
            })?;
        }

        if insert.returning.is_empty() {
            return Ok(QueryResult::affected(count));
        }
        let snapshot = ctx.tx.state().clone();
        let columns = snapshot.require_table(&insert.table_name)?.schema().column_names();
        let names = returning_names(insert, &columns);
        Ok(QueryResult::new(names, returned))
    }
}

impl InsertExecutor {
    fn build_rows(&self, insert: &InsertStmt, ctx: &ExecutionContext<'_>) -> Result<Vec<Row>> {
        let snapshot = ctx.tx.state().clone();
        let ev = ctx.evaluator(&snapshot);
        let now = ctx.tx.started_at();
        let table = snapshot.require_table(&insert.table_name)?;
        let schema = table.schema();

        let targets: Vec<usize> = match &insert.columns {
            Some(names) => names
                .iter()
                .map(|name| schema.require_column(name))
                .collect::<Result<_>>()?,
            None => (0..schema.columns().len()).collect(),
        };

        let value_rows: Vec<&[Expr]> = if insert.values.is_empty() {
            vec![&[][..]]
        } else {
            insert.values.iter().map(Vec::as_slice).collect()
        };

        let mut rows = Vec::with_capacity(value_rows.len());
        for exprs in value_rows {
            if !exprs.is_empty() && exprs.len() != targets.len() {
                return Err(DbError::query(format!(
                    "INSERT has {} expressions but {} target columns",
                    exprs.len(),
                    targets.len()
                )));
            }
            let mut provided = vec![None; schema.columns().len()];
            for (expr, &idx) in exprs.iter().zip(&targets) {
                provided[idx] = Some(ev.eval(expr, None)?);
            }
            let mut row = Vec::with_capacity(schema.columns().len());
            for (column, value) in schema.columns().iter().zip(provided) {
                let value = match value {
                    Some(value) => column.data_type.coerce(value)?,
                    None => default_value(column.default.as_ref(), &ev, now),
                };
                row.push(value);
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

fn returning_names(insert: &InsertStmt, columns: &[String]) -> Vec<String> {
    let mut names = Vec::new();
    for item in &insert.returning {
        match item {
            SelectItem::Wildcard => names.extend(columns.iter().cloned()),
            SelectItem::Expr { alias: Some(alias), .. } => names.push(alias.clone()),
            SelectItem::Expr { expr, .. } => names.push(expr.output_name()),
        }
    }
    names
}

pub struct UpdateExecutor;

impl Executor for UpdateExecutor {
    fn name(&self) -> &'static str {
        "UPDATE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Update(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Update(update) = stmt else {
            unreachable!();
        };
        ctx.tx.check_writable("UPDATE")?;

        let snapshot = ctx.tx.state().clone();
        let ev = ctx.evaluator(&snapshot);
        let table = snapshot.require_table(&update.table_name)?;
        let schema = table.schema();
        let columns = schema.column_names();

        let targets = update
            .assignments
            .iter()
            .map(|a| schema.require_column(&a.column))
            .collect::<Result<Vec<_>>>()?;

        let mut changes = Vec::new();
        for (row_id, row) in table.rows() {
            let scope = RowScope::new(&columns, row);
            if !ev.matches(update.selection.as_ref(), scope)? {
                continue;
            }
            let mut new_row = row.clone();
            for (assignment, &idx) in update.assignments.iter().zip(&targets) {
                let value = ev.eval(&assignment.value, Some(scope))?;
                new_row[idx] = schema.columns()[idx].data_type.coerce(value)?;
            }
            changes.push((row_id, new_row));
        }

        let count = changes.len();
        for (row_id, row) in changes {
            let current = ctx.tx.state().clone();
            let table = current.require_table(&update.table_name)?;
            check_row(&current, table, &row, Some(row_id), &ev)?;
            ctx.tx.apply(Change::UpdateRow {
                table: update.table_name.clone(),
                row_id,
                row,
            })?;
        }
        Ok(QueryResult::affected(count))
    }
}

pub struct DeleteExecutor;

impl Executor for DeleteExecutor {
    fn name(&self) -> &'static str {
        "DELETE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Delete(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Delete(delete) = stmt else {
            unreachable!();
        };
        ctx.tx.check_writable("DELETE")?;

        let snapshot = ctx.tx.state().clone();
        let ev = ctx.evaluator(&snapshot);
        let table = snapshot.require_table(&delete.table_name)?;
        let columns = table.schema().column_names();

        let mut doomed = Vec::new();
        for (row_id, row) in table.rows() {
            if ev.matches(delete.selection.as_ref(), RowScope::new(&columns, row))? {
                doomed.push(row_id);
            }
        }

        let count = doomed.len();
        for row_id in doomed {
            ctx.tx.apply(Change::DeleteRow {
                table: delete.table_name.clone(),
                row_id,
            })?;
        }
        Ok(QueryResult::affected(count))
    }
}
