use super::eval::{Evaluator, RowScope};
use crate::core::{ColumnDefault, DbError, Result, Row, Value};
use crate::storage::{ConstraintDef, ConstraintKind, DatabaseState, Table};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Value a column takes when a statement does not provide one.
pub(super) fn default_value(
    default: Option<&ColumnDefault>,
    ev: &Evaluator<'_>,
    now: DateTime<Utc>,
) -> Value {
    match default {
        None => Value::Null,
        Some(ColumnDefault::Sequence(seq)) => Value::Integer(ev.db.nextval(seq)),
        Some(ColumnDefault::Now) => Value::Timestamp(now),
        Some(ColumnDefault::Literal(value)) => value.clone(),
    }
}

/// Checks a new version of a row of `table` against every constraint:
/// column types and NOT NULL, uniqueness, CHECK and foreign keys.
pub(super) fn check_row(
    state: &DatabaseState,
    table: &Table,
    row: &Row,
    skip: Option<u64>,
    ev: &Evaluator<'_>,
) -> Result<()> {
    table.validate_row(row)?;
    table.check_unique(row, &state.unique_constraint_sets(table), skip)?;

    let columns = table.schema().column_names();
    for constraint in state.table_constraints(table.schema().name()) {
        match &constraint.kind {
            ConstraintKind::Check { expr, .. } => {
                // NULL passes a CHECK
                if let Value::Boolean(false) = ev.eval(expr, Some(RowScope::new(&columns, row)))? {
                    return Err(DbError::query(format!(
                        "new row for relation \"{}\" violates check constraint \"{}\"",
                        table.schema().name(),
                        constraint.name
                    )));
                }
            }
            ConstraintKind::ForeignKey { column, .. } => {
                let idx = table.schema().require_column(column)?;
                if !references_exist(state, constraint, std::iter::once(&row[idx]))? {
                    return Err(fk_violation(constraint));
                }
            }
            ConstraintKind::Unique { .. } => {}
        }
    }
    Ok(())
}

/// Whether every non-null value appears in the column a foreign key references.
pub(super) fn references_exist<'v>(
    state: &DatabaseState,
    constraint: &ConstraintDef,
    values: impl IntoIterator<Item = &'v Value>,
) -> Result<bool> {
    let ConstraintKind::ForeignKey {
        foreign_table,
        foreign_column,
        ..
    } = &constraint.kind
    else {
        return Ok(true);
    };
    let target = state.require_table(foreign_table)?;
    let target_idx = target.schema().require_column(foreign_column)?;
    for value in values {
        if value.is_null() {
            continue;
        }
        let mut found = false;
        for candidate in target.column_values(target_idx) {
            if !candidate.is_null() && value.compare(candidate)? == Ordering::Equal {
                found = true;
                break;
            }
        }
        if !found {
            return Ok(false);
        }
    }
    Ok(true)
}

pub(super) fn fk_violation(constraint: &ConstraintDef) -> DbError {
    DbError::query(format!(
        "insert or update on table \"{}\" violates foreign key constraint \"{}\"",
        constraint.table, constraint.name
    ))
}
