// ============================================================================
// Catalog relations
// ============================================================================
//
// Read-only relations materialized from the database state, named after the
// PostgreSQL catalogs they stand for. `pg_constraint` is flattened: one row
// per constrained column, with the referenced table and column inlined.
//
// ============================================================================

use super::{ConstraintKind, DatabaseState, MemoryDatabase};
use crate::core::{Row, Value};

pub struct Relation {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Relation {
    fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }
}

pub fn is_catalog_relation(name: &str) -> bool {
    matches!(
        name,
        "information_schema.tables"
            | "information_schema.columns"
            | "pg_indexes"
            | "pg_constraint"
            | "pg_extension"
    )
}

pub fn catalog_relation(
    name: &str,
    state: &DatabaseState,
    db: &MemoryDatabase,
) -> Option<Relation> {
    let relation = match name {
        "information_schema.tables" => {
            let mut rel = Relation::new(&["table_name", "table_schema", "table_type"]);
            for table in state.tables() {
                rel.rows.push(vec![
                    Value::from(table.schema().name()),
                    Value::from("public"),
                    Value::from("BASE TABLE"),
                ]);
            }
            rel
        }
        "information_schema.columns" => {
            let mut rel = Relation::new(&[
                "table_name",
                "column_name",
                "data_type",
                "is_nullable",
                "column_default",
                "ordinal_position",
            ]);
            for table in state.tables() {
                for (pos, col) in table.schema().columns().iter().enumerate() {
                    rel.rows.push(vec![
                        Value::from(table.schema().name()),
                        Value::from(col.name.as_str()),
                        Value::from(col.data_type.sql_name()),
                        Value::from(if col.nullable { "YES" } else { "NO" }),
                        Value::from(col.default_sql()),
                        Value::Integer(pos as i64 + 1),
                    ]);
                }
            }
            rel
        }
        "pg_indexes" => {
            let mut rel = Relation::new(&["schemaname", "tablename", "indexname", "indexdef"]);
            for index in state.indexes() {
                rel.rows.push(vec![
                    Value::from("public"),
                    Value::from(index.table.as_str()),
                    Value::from(index.name.as_str()),
                    Value::from(index.definition.as_str()),
                ]);
            }
            rel
        }
        "pg_constraint" => {
            let mut rel = Relation::new(&[
                "conname",
                "contype",
                "relname",
                "attname",
                "confrelname",
                "confattname",
                "confdeltype",
                "condef",
            ]);
            for constraint in state.constraints() {
                let base = |attname: Value, confrel: Value, confatt: Value| {
                    vec![
                        Value::from(constraint.name.as_str()),
                        Value::from(constraint.contype()),
                        Value::from(constraint.table.as_str()),
                        attname,
                        confrel,
                        confatt,
                        Value::from(constraint.confdeltype()),
                        Value::from(constraint.definition()),
                    ]
                };
                match &constraint.kind {
                    ConstraintKind::ForeignKey {
                        column,
                        foreign_table,
                        foreign_column,
                        ..
                    } => rel.rows.push(base(
                        Value::from(column.as_str()),
                        Value::from(foreign_table.as_str()),
                        Value::from(foreign_column.as_str()),
                    )),
                    ConstraintKind::Unique { columns } => {
                        for column in columns {
                            rel.rows
                                .push(base(Value::from(column.as_str()), Value::Null, Value::Null));
                        }
                    }
                    ConstraintKind::Check { .. } => {
                        rel.rows.push(base(Value::Null, Value::Null, Value::Null))
                    }
                }
            }
            rel
        }
        "pg_extension" => {
            let mut rel = Relation::new(&["extname"]);
            for ext in db.extensions() {
                rel.rows.push(vec![Value::Text(ext)]);
            }
            rel
        }
        _ => return None,
    };
    Some(relation)
}
