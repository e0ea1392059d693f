use super::eval::RowScope;
use super::integrity::{fk_violation, references_exist};
use super::{ExecutionContext, Executor};
use crate::core::{ColumnDefault, DbError, Result, Value};
use crate::parser::ast::{
    AlterTableOperation, AlterTableStmt, ConstraintKindSpec, ConstraintSpec, CreateIndexStmt,
    Statement,
};
use crate::result::QueryResult;
use crate::storage::{ConstraintDef, ConstraintKind, IndexDef, TableSchema};
use crate::transaction::Change;

pub struct CreateTableExecutor;

impl Executor for CreateTableExecutor {
    fn name(&self) -> &'static str {
        "CREATE_TABLE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::CreateTable(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::CreateTable(create) = stmt else {
            unreachable!();
        };
        ctx.tx.check_writable("CREATE TABLE")?;

        if ctx.tx.state().table(&create.table_name).is_some() && create.if_not_exists {
            return Ok(QueryResult::empty());
        }
        let schema = TableSchema::new(create.table_name.clone(), create.columns.clone())?;
        ctx.tx.apply(Change::CreateTable { schema })?;
        Ok(QueryResult::empty())
    }
}

pub struct DropTableExecutor;

impl Executor for DropTableExecutor {
    fn name(&self) -> &'static str {
        "DROP_TABLE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::DropTable(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::DropTable(drop) = stmt else {
            unreachable!();
        };
        ctx.tx.check_writable("DROP TABLE")?;

        if ctx.tx.state().table(&drop.name).is_none() && drop.if_exists {
            return Ok(QueryResult::empty());
        }
        ctx.tx.apply(Change::DropTable {
            name: drop.name.clone(),
        })?;
        Ok(QueryResult::empty())
    }
}

pub struct AlterTableExecutor;

impl Executor for AlterTableExecutor {
    fn name(&self) -> &'static str {
        "ALTER_TABLE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::AlterTable(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::AlterTable(alter) = stmt else {
            unreachable!();
        };
        ctx.tx.check_writable("ALTER TABLE")?;
        ctx.tx.state().require_table(&alter.table_name)?;

        match &alter.operation {
            AlterTableOperation::AddColumn(column) => self.add_column(alter, column, ctx),
            AlterTableOperation::RenameColumn { old_name, new_name } => {
                ctx.tx.apply(Change::RenameColumn {
                    table: alter.table_name.clone(),
                    old_name: old_name.clone(),
                    new_name: new_name.clone(),
                })
            }
            AlterTableOperation::SetNotNull { column, not_null } => {
                self.set_not_null(alter, column, *not_null, ctx)
            }
            AlterTableOperation::AddConstraint(spec) => self.add_constraint(alter, spec, ctx),
            AlterTableOperation::DropConstraint { name, if_exists } => {
                if ctx.tx.state().constraint(&alter.table_name, name).is_none() && *if_exists {
                    return Ok(QueryResult::empty());
                }
                ctx.tx.apply(Change::DropConstraint {
                    table: alter.table_name.clone(),
                    name: name.clone(),
                })
            }
        }?;
        Ok(QueryResult::empty())
    }
}

impl AlterTableExecutor {
    fn add_column(
        &self,
        alter: &AlterTableStmt,
        column: &crate::core::Column,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        let fill = match &column.default {
            Some(ColumnDefault::Literal(value)) => column.data_type.coerce(value.clone())?,
            Some(ColumnDefault::Now) => Value::Timestamp(ctx.tx.started_at()),
            _ => Value::Null,
        };
        let table = ctx.tx.state().require_table(&alter.table_name)?;
        if fill.is_null() && !column.nullable && !table.is_empty() {
            return Err(DbError::query(format!(
                "column \"{}\" of relation \"{}\" contains null values",
                column.name, alter.table_name
            )));
        }
        ctx.tx.apply(Change::AddColumn {
            table: alter.table_name.clone(),
            column: column.clone(),
            fill,
        })
    }

    fn set_not_null(
        &self,
        alter: &AlterTableStmt,
        column: &str,
        not_null: bool,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        let table = ctx.tx.state().require_table(&alter.table_name)?;
        let idx = table.schema().require_column(column)?;
        if not_null && table.column_values(idx).any(Value::is_null) {
            return Err(DbError::query(format!(
                "column \"{column}\" of relation \"{}\" contains null values",
                alter.table_name
            )));
        }
        ctx.tx.apply(Change::SetNotNull {
            table: alter.table_name.clone(),
            column: column.to_string(),
            not_null,
        })
    }

    fn add_constraint(
        &self,
        alter: &AlterTableStmt,
        spec: &ConstraintSpec,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        let table_name = &alter.table_name;
        let (default_name, kind) = match &spec.kind {
            ConstraintKindSpec::ForeignKey {
                column,
                foreign_table,
                foreign_column,
                on_delete,
            } => (
                format!("{table_name}_{column}_fkey"),
                ConstraintKind::ForeignKey {
                    column: column.clone(),
                    foreign_table: foreign_table.clone(),
                    foreign_column: foreign_column.clone(),
                    on_delete: on_delete.clone(),
                },
            ),
            ConstraintKindSpec::Unique { columns } => (
                format!("{table_name}_{}_key", columns.join("_")),
                ConstraintKind::Unique {
                    columns: columns.clone(),
                },
            ),
            ConstraintKindSpec::Check { expr, definition } => (
                format!("{table_name}_check"),
                ConstraintKind::Check {
                    expr: expr.clone(),
                    definition: definition.clone(),
                },
            ),
        };
        let constraint = ConstraintDef {
            name: spec.name.clone().unwrap_or(default_name),
            table: table_name.clone(),
            kind,
        };

        let snapshot = ctx.tx.state().clone();
        let table = snapshot.require_table(table_name)?;
        match &constraint.kind {
            ConstraintKind::ForeignKey { column, .. } => {
                let idx = table.schema().require_column(column)?;
                if !references_exist(&snapshot, &constraint, table.column_values(idx))? {
                    return Err(fk_violation(&constraint));
                }
            }
            ConstraintKind::Unique { columns } => {
                let set = columns
                    .iter()
                    .map(|col| table.schema().require_column(col))
                    .collect::<Result<Vec<_>>>()?;
                for (id, row) in table.rows() {
                    table
                        .check_unique(row, std::slice::from_ref(&set), Some(id))
                        .map_err(|_| {
                            DbError::query(format!(
                                "could not create unique index \"{}\"",
                                constraint.name
                            ))
                        })?;
                }
            }
            ConstraintKind::Check { expr, .. } => {
                let ev = ctx.evaluator(&snapshot);
                let columns = table.schema().column_names();
                for (_, row) in table.rows() {
                    if let Value::Boolean(false) = ev.eval(expr, Some(RowScope::new(&columns, row)))? {
                        return Err(DbError::query(format!(
                            "check constraint \"{}\" of relation \"{table_name}\" is violated by some row",
                            constraint.name
                        )));
                    }
                }
            }
        }
        ctx.tx.apply(Change::AddConstraint(constraint))
    }
}

pub struct CreateIndexExecutor;

impl Executor for CreateIndexExecutor {
    fn name(&self) -> &'static str {
        "CREATE_INDEX"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::CreateIndex(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::CreateIndex(create) = stmt else {
            unreachable!();
        };
        ctx.tx.check_writable("CREATE INDEX")?;

        if ctx.tx.state().index(&create.index_name).is_some() && create.if_not_exists {
            return Ok(QueryResult::empty());
        }
        self.validate(create, ctx)?;
        ctx.tx.apply(Change::CreateIndex(IndexDef {
            name: create.index_name.clone(),
            table: create.table_name.clone(),
            columns: create.columns.clone(),
            unique: create.unique,
            definition: create.definition.clone(),
        }))?;
        Ok(QueryResult::empty())
    }
}

/// Extension providing an operator class.
fn operator_class_extension(class: &str) -> Option<&'static str> {
    match class {
        "gin_trgm_ops" | "gist_trgm_ops" => Some("pg_trgm"),
        _ => None,
    }
}

impl CreateIndexExecutor {
    fn validate(&self, create: &CreateIndexStmt, ctx: &ExecutionContext<'_>) -> Result<()> {
        for class in &create.operator_classes {
            let available = operator_class_extension(class)
                .is_some_and(|extension| ctx.db.extensions().iter().any(|e| e == extension));
            if !available {
                return Err(DbError::query(format!(
                    "operator class \"{class}\" does not exist for access method \"{}\"",
                    create.method
                )));
            }
        }
        let table = ctx.tx.state().require_table(&create.table_name)?;
        let set = create
            .columns
            .iter()
            .map(|col| table.schema().require_column(col))
            .collect::<Result<Vec<_>>>()?;
        // partial unique indexes are not enforced
        if create.unique && create.predicate.is_none() {
            for (id, row) in table.rows() {
                table
                    .check_unique(row, std::slice::from_ref(&set), Some(id))
                    .map_err(|_| {
                        DbError::query(format!(
                            "could not create unique index \"{}\"",
                            create.index_name
                        ))
                    })?;
            }
        }
        Ok(())
    }
}

pub struct DropIndexExecutor;

impl Executor for DropIndexExecutor {
    fn name(&self) -> &'static str {
        "DROP_INDEX"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::DropIndex(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::DropIndex(drop) = stmt else {
            unreachable!();
        };
        ctx.tx.check_writable("DROP INDEX")?;

        if ctx.tx.state().index(&drop.name).is_none() && drop.if_exists {
            return Ok(QueryResult::empty());
        }
        ctx.tx.apply(Change::DropIndex {
            name: drop.name.clone(),
        })?;
        Ok(QueryResult::empty())
    }
}
