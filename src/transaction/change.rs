// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Command pattern: every effect of a statement is recorded as a Change.
// The working copy of a transaction applies changes immediately; COMMIT
// replays the log on top of the latest committed state, so concurrent
// transactions on disjoint rows both survive.
//
// ============================================================================

use crate::core::{Column, Row, Value};
use crate::storage::{ConstraintDef, IndexDef, TableSchema};

#[derive(Debug, Clone)]
pub enum Change {
    CreateTable { schema: TableSchema },
    DropTable { name: String },
    AddColumn { table: String, column: Column, fill: Value },
    RenameColumn { table: String, old_name: String, new_name: String },
    SetNotNull { table: String, column: String, not_null: bool },
    CreateIndex(IndexDef),
    DropIndex { name: String },
    AddConstraint(ConstraintDef),
    DropConstraint { table: String, name: String },
    InsertRow { table: String, row_id: u64, row: Row },
    UpdateRow { table: String, row_id: u64, row: Row },
    DeleteRow { table: String, row_id: u64 },
}

impl Change {
    /// Table affected by this change (indexes report the indexed table).
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Change::CreateTable { schema } => Some(schema.name()),
            Change::DropTable { name } => Some(name),
            Change::AddColumn { table, .. }
            | Change::RenameColumn { table, .. }
            | Change::SetNotNull { table, .. }
            | Change::DropConstraint { table, .. }
            | Change::InsertRow { table, .. }
            | Change::UpdateRow { table, .. }
            | Change::DeleteRow { table, .. } => Some(table),
            Change::CreateIndex(index) => Some(&index.table),
            Change::AddConstraint(constraint) => Some(&constraint.table),
            Change::DropIndex { .. } => None,
        }
    }

    pub fn is_ddl(&self) -> bool {
        !self.is_dml()
    }

    pub fn is_dml(&self) -> bool {
        matches!(
            self,
            Change::InsertRow { .. } | Change::UpdateRow { .. } | Change::DeleteRow { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;

    #[test]
    fn test_change_classification() {
        let insert = Change::InsertRow {
            table: "users".into(),
            row_id: 1,
            row: vec![Value::Integer(1)],
        };
        assert!(insert.is_dml());
        assert_eq!(insert.table_name(), Some("users"));

        let schema = TableSchema::new("t", vec![Column::new("id", DataType::Integer)]).unwrap();
        let create = Change::CreateTable { schema };
        assert!(create.is_ddl());
        assert_eq!(create.table_name(), Some("t"));
        assert_eq!(Change::DropIndex { name: "i".into() }.table_name(), None);
    }
}
