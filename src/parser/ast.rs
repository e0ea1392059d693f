use crate::core::{Column, Value};

/// Root statement type
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Begin,
    Commit,
    Rollback,
    Savepoint(String),
    ReleaseSavepoint(String),
    RollbackToSavepoint(String),
    SetReadOnly(bool),

    CreateTable(CreateTableStmt),
    DropTable(DropStmt),
    AlterTable(AlterTableStmt),
    CreateIndex(CreateIndexStmt),
    DropIndex(DropStmt),

    Insert(InsertStmt),
    Query(QueryStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
}

impl Statement {
    pub fn is_transaction_control(&self) -> bool {
        matches!(
            self,
            Self::Begin
                | Self::Commit
                | Self::Rollback
                | Self::Savepoint(_)
                | Self::ReleaseSavepoint(_)
                | Self::RollbackToSavepoint(_)
                | Self::SetReadOnly(_)
        )
    }

    pub fn is_ddl(&self) -> bool {
        matches!(
            self,
            Self::CreateTable(_)
                | Self::DropTable(_)
                | Self::AlterTable(_)
                | Self::CreateIndex(_)
                | Self::DropIndex(_)
        )
    }

    pub fn is_write(&self) -> bool {
        self.is_ddl() || matches!(self, Self::Insert(_) | Self::Update(_) | Self::Delete(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStmt {
    pub table_name: String,
    pub columns: Vec<Column>,
    pub if_not_exists: bool,
}

/// DROP TABLE / DROP INDEX
#[derive(Debug, Clone, PartialEq)]
pub struct DropStmt {
    pub name: String,
    pub if_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterTableStmt {
    pub table_name: String,
    pub operation: AlterTableOperation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterTableOperation {
    AddColumn(Column),
    RenameColumn { old_name: String, new_name: String },
    SetNotNull { column: String, not_null: bool },
    AddConstraint(ConstraintSpec),
    DropConstraint { name: String, if_exists: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSpec {
    /// `None` lets the engine derive the usual `<table>_<column>_fkey` / `_key` name.
    pub name: Option<String>,
    pub kind: ConstraintKindSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintKindSpec {
    ForeignKey {
        column: String,
        foreign_table: String,
        foreign_column: String,
        on_delete: String,
    },
    Unique { columns: Vec<String> },
    Check { expr: Expr, definition: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexStmt {
    pub index_name: String,
    pub table_name: String,
    pub columns: Vec<String>,
    /// Access method, `btree` unless given with `USING`.
    pub method: String,
    /// Operator classes named next to the columns.
    pub operator_classes: Vec<String>,
    pub unique: bool,
    pub if_not_exists: bool,
    pub predicate: Option<Expr>,
    /// Statement text, reported as `pg_indexes.indexdef`.
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table_name: String,
    pub columns: Option<Vec<String>>,
    /// Empty for `DEFAULT VALUES`.
    pub values: Vec<Vec<Expr>>,
    pub returning: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryStmt {
    pub projection: Vec<SelectItem>,
    pub from: Option<String>,
    pub selection: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table_name: String,
    pub assignments: Vec<Assignment>,
    pub selection: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table_name: String,
    pub selection: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Wildcard,
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Value),
    /// `$n` placeholder, 1-based
    Param(usize),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Wildcard,
    Subquery(Box<QueryStmt>),
}

impl Expr {
    /// Name a projected expression gets when it has no alias.
    pub fn output_name(&self) -> String {
        match self {
            Self::Column(name) => name.clone(),
            Self::Function { name, .. } => name.clone(),
            Self::Subquery(query) => query
                .projection
                .first()
                .and_then(|item| match item {
                    SelectItem::Expr { alias: Some(alias), .. } => Some(alias.clone()),
                    SelectItem::Expr { expr, .. } => Some(expr.output_name()),
                    SelectItem::Wildcard => None,
                })
                .unwrap_or_else(|| "?column?".to_string()),
            _ => "?column?".to_string(),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        match self {
            Self::Function { name, args } => {
                matches!(name.as_str(), "count" | "max" | "min" | "sum")
                    || args.iter().any(Expr::is_aggregate)
            }
            Self::BinaryOp { left, right, .. } => left.is_aggregate() || right.is_aggregate(),
            Self::Not(inner) | Self::Negate(inner) => inner.is_aggregate(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Concat,
}
