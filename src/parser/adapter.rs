// ============================================================================
// src/parser/adapter.rs - sqlparser AST -> engine statements
// ============================================================================

use super::ast::*;
use super::control::{parse_control, unquote};
use crate::core::{Column, ColumnDefault, DataType, DbError, Result, Value};
use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

pub struct SqlParserAdapter {
    dialect: PostgreSqlDialect,
}

impl SqlParserAdapter {
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
        }
    }

    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>> {
        if let Some(stmt) = parse_control(sql, |body| self.parse_expr(body))? {
            return Ok(vec![stmt]);
        }

        let external_stmts = Parser::parse_sql(&self.dialect, sql)?;
        if external_stmts.is_empty() {
            return Err(DbError::query("can't execute an empty query"));
        }

        external_stmts
            .into_iter()
            .map(|stmt| self.convert_statement(stmt))
            .collect()
    }

    /// Parses a standalone expression (CHECK constraint bodies).
    pub fn parse_expr(&self, text: &str) -> Result<Expr> {
        let expr = Parser::new(&self.dialect).try_with_sql(text)?.parse_expr()?;
        self.convert_expr(expr)
    }

    fn convert_statement(&self, stmt: sql_ast::Statement) -> Result<Statement> {
        let text = stmt.to_string();
        match stmt {
            sql_ast::Statement::CreateTable(create) => {
                Ok(Statement::CreateTable(self.convert_create_table(create)?))
            }
            sql_ast::Statement::CreateIndex(ci) => {
                Ok(Statement::CreateIndex(self.convert_create_index(&ci, text)?))
            }
            sql_ast::Statement::AlterTable { name, operations, .. } => {
                let mut operations = operations.into_iter();
                let (Some(operation), None) = (operations.next(), operations.next()) else {
                    return Err(DbError::query(
                        "ALTER TABLE supports exactly one operation per statement",
                    ));
                };
                Ok(Statement::AlterTable(self.convert_alter_table(name, operation)?))
            }
            sql_ast::Statement::Drop { object_type, names, if_exists, .. } => {
                let [name] = names.as_slice() else {
                    return Err(DbError::query("only single object DROP supported"));
                };
                let drop = DropStmt {
                    name: object_name(name),
                    if_exists,
                };
                match object_type {
                    sql_ast::ObjectType::Table => Ok(Statement::DropTable(drop)),
                    sql_ast::ObjectType::Index => Ok(Statement::DropIndex(drop)),
                    other => Err(DbError::query(format!("DROP {other} not supported"))),
                }
            }
            sql_ast::Statement::Insert(insert) => {
                Ok(Statement::Insert(self.convert_insert(insert)?))
            }
            sql_ast::Statement::Query(query) => {
                Ok(Statement::Query(self.convert_query(*query)?))
            }
            sql_ast::Statement::Delete(delete) => {
                Ok(Statement::Delete(self.convert_delete(delete)?))
            }
            sql_ast::Statement::Update { table, assignments, selection, .. } => {
                Ok(Statement::Update(self.convert_update(table, assignments, selection)?))
            }
            _ => Err(DbError::query(format!("unsupported statement: {text}"))),
        }
    }

    fn convert_create_table(&self, create: sql_ast::CreateTable) -> Result<CreateTableStmt> {
        let table_name = object_name(&create.name);
        let columns = create
            .columns
            .into_iter()
            .map(|col| self.convert_column_def(&table_name, col))
            .collect::<Result<Vec<_>>>()?;

        Ok(CreateTableStmt {
            table_name,
            columns,
            if_not_exists: create.if_not_exists,
        })
    }

    fn convert_column_def(&self, table: &str, col: sql_ast::ColumnDef) -> Result<Column> {
        let name = col.name.value;
        let (data_type, serial) = convert_data_type(&col.data_type)?;
        let mut column = Column::new(name.clone(), data_type);
        if serial {
            column = column
                .not_null()
                .with_default(ColumnDefault::Sequence(format!("{table}_{name}_seq")));
        }

        for opt in col.options {
            let rendered = opt.option.to_string().to_ascii_uppercase();
            match opt.option {
                sql_ast::ColumnOption::NotNull => column.nullable = false,
                sql_ast::ColumnOption::Null => column.nullable = true,
                sql_ast::ColumnOption::Default(expr) => {
                    column.default = Some(self.convert_default(expr)?);
                }
                _ if rendered.starts_with("PRIMARY KEY") => column = column.primary_key(),
                _ if rendered == "UNIQUE" => column.unique = true,
                _ => {
                    return Err(DbError::query(format!(
                        "unsupported column option: {rendered}"
                    )));
                }
            }
        }

        Ok(column)
    }

    fn convert_default(&self, expr: sql_ast::Expr) -> Result<ColumnDefault> {
        match self.convert_expr(expr)? {
            Expr::Function { name, .. } if is_now_function(&name) => Ok(ColumnDefault::Now),
            Expr::Literal(value) => Ok(ColumnDefault::Literal(value)),
            Expr::Negate(inner) => match *inner {
                Expr::Literal(Value::Integer(i)) => Ok(ColumnDefault::Literal(Value::Integer(-i))),
                Expr::Literal(Value::Float(f)) => Ok(ColumnDefault::Literal(Value::Float(-f))),
                other => Err(DbError::query(format!("unsupported default: {other:?}"))),
            },
            other => Err(DbError::query(format!("unsupported default: {other:?}"))),
        }
    }

    fn convert_create_index(
        &self,
        ci: &sql_ast::CreateIndex,
        definition: String,
    ) -> Result<CreateIndexStmt> {
        let index_name = match &ci.name {
            Some(n) => object_name(n),
            None => return Err(DbError::query("index name is required")),
        };

        let columns = ci
            .columns
            .iter()
            .map(|col| match &col.column.expr {
                sql_ast::Expr::Identifier(ident) => Ok(ident.value.clone()),
                other => Err(DbError::query(format!(
                    "index column must be an identifier, got {other}"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        let predicate = ci
            .predicate
            .clone()
            .map(|expr| self.convert_expr(expr))
            .transpose()?;

        let method = ci
            .using
            .as_ref()
            .map_or_else(|| "btree".to_string(), |using| using.to_string().to_ascii_lowercase());
        let operator_classes = ci
            .columns
            .iter()
            .filter_map(|col| col.operator_class.as_ref().map(|class| class.value.clone()))
            .collect();

        Ok(CreateIndexStmt {
            index_name,
            table_name: object_name(&ci.table_name),
            columns,
            method,
            operator_classes,
            unique: ci.unique,
            if_not_exists: ci.if_not_exists,
            predicate,
            definition,
        })
    }

    fn convert_alter_table(
        &self,
        name: sql_ast::ObjectName,
        operation: sql_ast::AlterTableOperation,
    ) -> Result<AlterTableStmt> {
        let table_name = object_name(&name);
        let operation = match operation {
            sql_ast::AlterTableOperation::AddColumn { column_def, .. } => {
                AlterTableOperation::AddColumn(self.convert_column_def(&table_name, column_def)?)
            }
            sql_ast::AlterTableOperation::RenameColumn { old_column_name, new_column_name } => {
                AlterTableOperation::RenameColumn {
                    old_name: old_column_name.value,
                    new_name: new_column_name.value,
                }
            }
            other => {
                return Err(DbError::query(format!(
                    "unsupported ALTER TABLE operation: {other}"
                )));
            }
        };

        Ok(AlterTableStmt {
            table_name,
            operation,
        })
    }

    fn convert_insert(&self, insert: sql_ast::Insert) -> Result<InsertStmt> {
        let table_name = unquote(&insert.table.to_string());

        let columns = if insert.columns.is_empty() {
            None
        } else {
            Some(insert.columns.into_iter().map(|id| id.value).collect())
        };

        let values = match insert.source {
            Some(source) => {
                let sql_ast::SetExpr::Values(vals) = *source.body else {
                    return Err(DbError::query("only VALUES clause supported in INSERT"));
                };
                vals.rows
                    .into_iter()
                    .map(|row| {
                        row.into_iter()
                            .map(|expr| self.convert_expr(expr))
                            .collect::<Result<Vec<_>>>()
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            // DEFAULT VALUES
            None => Vec::new(),
        };

        let returning = insert
            .returning
            .unwrap_or_default()
            .into_iter()
            .map(|item| self.convert_select_item(item))
            .collect::<Result<Vec<_>>>()?;

        Ok(InsertStmt {
            table_name,
            columns,
            values,
            returning,
        })
    }

    fn convert_query(&self, query: sql_ast::Query) -> Result<QueryStmt> {
        let sql_ast::SetExpr::Select(select) = *query.body else {
            return Err(DbError::query("only plain SELECT queries supported"));
        };
        let select = *select;

        let projection = select
            .projection
            .into_iter()
            .map(|item| self.convert_select_item(item))
            .collect::<Result<Vec<_>>>()?;

        let from = match select.from.as_slice() {
            [] => None,
            [table] if table.joins.is_empty() => match &table.relation {
                sql_ast::TableFactor::Table { name, .. } => Some(object_name(name)),
                _ => return Err(DbError::query("complex table references not supported")),
            },
            _ => return Err(DbError::query("joins are not supported")),
        };

        if let sql_ast::GroupByExpr::Expressions(exprs, _) = &select.group_by
            && !exprs.is_empty()
        {
            return Err(DbError::query("GROUP BY is not supported"));
        }

        let selection = select
            .selection
            .map(|expr| self.convert_expr(expr))
            .transpose()?;

        let order_by = self.convert_order_by(query.order_by)?;
        let (limit, offset) = self.convert_limit_clause(&query.limit_clause)?;

        Ok(QueryStmt {
            projection,
            from,
            selection,
            order_by,
            limit,
            offset,
        })
    }

    fn convert_order_by(&self, order_by: Option<sql_ast::OrderBy>) -> Result<Vec<OrderByExpr>> {
        let Some(order_by) = order_by else {
            return Ok(Vec::new());
        };

        match order_by.kind {
            sql_ast::OrderByKind::Expressions(exprs) => exprs
                .into_iter()
                .map(|order| {
                    Ok(OrderByExpr {
                        descending: order.options.asc.map(|asc| !asc).unwrap_or(false),
                        expr: self.convert_expr(order.expr)?,
                    })
                })
                .collect(),
            sql_ast::OrderByKind::All(_) => Err(DbError::query("ORDER BY ALL not supported")),
        }
    }

    fn convert_limit_clause(
        &self,
        limit_clause: &Option<sql_ast::LimitClause>,
    ) -> Result<(Option<usize>, Option<usize>)> {
        let Some(clause) = limit_clause else {
            return Ok((None, None));
        };

        match clause {
            sql_ast::LimitClause::LimitOffset { limit, offset, .. } => {
                let limit = limit.as_ref().map(extract_number).transpose()?;
                let offset = offset.as_ref().map(|o| extract_number(&o.value)).transpose()?;
                Ok((limit, offset))
            }
            sql_ast::LimitClause::OffsetCommaLimit { offset, limit } => {
                Ok((Some(extract_number(limit)?), Some(extract_number(offset)?)))
            }
        }
    }

    fn convert_delete(&self, delete: sql_ast::Delete) -> Result<DeleteStmt> {
        let tables = match delete.from {
            sql_ast::FromTable::WithFromKeyword(tables) => tables,
            sql_ast::FromTable::WithoutKeyword(tables) => tables,
        };
        let table_name = match tables.first().map(|t| &t.relation) {
            Some(sql_ast::TableFactor::Table { name, .. }) => object_name(name),
            _ => return Err(DbError::query("DELETE requires a plain table")),
        };

        let selection = delete
            .selection
            .map(|expr| self.convert_expr(expr))
            .transpose()?;

        Ok(DeleteStmt {
            table_name,
            selection,
        })
    }

    fn convert_update(
        &self,
        table: sql_ast::TableWithJoins,
        assignments: Vec<sql_ast::Assignment>,
        selection: Option<sql_ast::Expr>,
    ) -> Result<UpdateStmt> {
        let table_name = match table.relation {
            sql_ast::TableFactor::Table { name, .. } => object_name(&name),
            _ => return Err(DbError::query("UPDATE requires a plain table")),
        };

        let assignments = assignments
            .into_iter()
            .map(|assign| {
                let column = match assign.target {
                    sql_ast::AssignmentTarget::ColumnName(col_name) if col_name.0.len() == 1 => {
                        unquote(&col_name.0[0].to_string())
                    }
                    _ => return Err(DbError::query("only simple column names supported in UPDATE")),
                };
                Ok(Assignment {
                    column,
                    value: self.convert_expr(assign.value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let selection = selection
            .map(|expr| self.convert_expr(expr))
            .transpose()?;

        Ok(UpdateStmt {
            table_name,
            assignments,
            selection,
        })
    }

    fn convert_select_item(&self, item: sql_ast::SelectItem) -> Result<SelectItem> {
        match item {
            sql_ast::SelectItem::Wildcard(_) => Ok(SelectItem::Wildcard),
            sql_ast::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::Expr {
                expr: self.convert_expr(expr)?,
                alias: None,
            }),
            sql_ast::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem::Expr {
                expr: self.convert_expr(expr)?,
                alias: Some(alias.value),
            }),
            _ => Err(DbError::query("unsupported select item")),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn convert_expr(&self, expr: sql_ast::Expr) -> Result<Expr> {
        match expr {
            sql_ast::Expr::Identifier(ident) => Ok(Expr::Column(ident.value)),
            sql_ast::Expr::CompoundIdentifier(idents) => idents
                .into_iter()
                .last()
                .map(|ident| Expr::Column(ident.value))
                .ok_or_else(|| DbError::query("empty identifier")),
            sql_ast::Expr::Value(val) => self.convert_value(val.value),
            sql_ast::Expr::Nested(inner) => self.convert_expr(*inner),
            sql_ast::Expr::Cast { expr, .. } => self.convert_expr(*expr),
            sql_ast::Expr::BinaryOp { left, op, right } => Ok(Expr::BinaryOp {
                left: Box::new(self.convert_expr(*left)?),
                op: convert_binary_op(&op)?,
                right: Box::new(self.convert_expr(*right)?),
            }),
            sql_ast::Expr::UnaryOp { op, expr } => {
                let inner = Box::new(self.convert_expr(*expr)?);
                match op {
                    sql_ast::UnaryOperator::Not => Ok(Expr::Not(inner)),
                    sql_ast::UnaryOperator::Minus => Ok(Expr::Negate(inner)),
                    sql_ast::UnaryOperator::Plus => Ok(*inner),
                    other => Err(DbError::query(format!("unsupported operator {other}"))),
                }
            }
            sql_ast::Expr::IsNull(e) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(*e)?),
                negated: false,
            }),
            sql_ast::Expr::IsNotNull(e) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(*e)?),
                negated: true,
            }),
            sql_ast::Expr::InList { expr, list, negated } => Ok(Expr::In {
                expr: Box::new(self.convert_expr(*expr)?),
                list: list
                    .into_iter()
                    .map(|e| self.convert_expr(e))
                    .collect::<Result<Vec<_>>>()?,
                negated,
            }),
            sql_ast::Expr::Subquery(query) => {
                Ok(Expr::Subquery(Box::new(self.convert_query(*query)?)))
            }
            sql_ast::Expr::Function(func) => {
                let name = func.name.to_string().to_ascii_lowercase();
                let args = if let sql_ast::FunctionArguments::List(arg_list) = func.args {
                    arg_list
                        .args
                        .into_iter()
                        .map(|arg| match arg {
                            sql_ast::FunctionArg::Unnamed(sql_ast::FunctionArgExpr::Expr(e)) => {
                                self.convert_expr(e)
                            }
                            sql_ast::FunctionArg::Unnamed(sql_ast::FunctionArgExpr::Wildcard) => {
                                Ok(Expr::Wildcard)
                            }
                            _ => Err(DbError::query(
                                "only unnamed expression arguments supported in functions",
                            )),
                        })
                        .collect::<Result<Vec<_>>>()?
                } else {
                    Vec::new()
                };
                Ok(Expr::Function { name, args })
            }
            other => Err(DbError::query(format!("unsupported expression: {other}"))),
        }
    }

    fn convert_value(&self, val: sql_ast::Value) -> Result<Expr> {
        let value = match val {
            sql_ast::Value::Number(n, _) => {
                if let Ok(i) = n.parse::<i64>() {
                    Value::Integer(i)
                } else if let Ok(f) = n.parse::<f64>() {
                    Value::Float(f)
                } else {
                    return Err(DbError::query(format!("invalid number: {n}")));
                }
            }
            sql_ast::Value::SingleQuotedString(s) => Value::Text(s),
            sql_ast::Value::Boolean(b) => Value::Boolean(b),
            sql_ast::Value::Null => Value::Null,
            sql_ast::Value::Placeholder(p) => {
                let index = p
                    .strip_prefix('$')
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|n| *n > 0)
                    .ok_or_else(|| DbError::query(format!("unsupported placeholder {p}")))?;
                return Ok(Expr::Param(index));
            }
            other => return Err(DbError::query(format!("unsupported value: {other}"))),
        };
        Ok(Expr::Literal(value))
    }
}

impl Default for SqlParserAdapter {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn is_now_function(name: &str) -> bool {
    matches!(name, "now" | "current_timestamp" | "localtimestamp")
}

/// Dotted, unquoted relation name; the `public.` schema is implicit.
fn object_name(name: &sql_ast::ObjectName) -> String {
    let parts: Vec<String> = name
        .0
        .iter()
        .map(|part| part.to_string().trim_matches('"').to_string())
        .collect();
    let joined = parts.join(".");
    joined
        .strip_prefix("public.")
        .map(str::to_string)
        .unwrap_or(joined)
}

fn convert_data_type(dt: &sql_ast::DataType) -> Result<(DataType, bool)> {
    let rendered = dt.to_string().to_ascii_uppercase();
    let base = rendered.split('(').next().unwrap_or_default().trim();
    let converted = match base {
        "SERIAL" | "BIGSERIAL" | "SMALLSERIAL" => (DataType::Integer, true),
        "INT" | "INTEGER" | "INT2" | "INT4" | "INT8" | "BIGINT" | "SMALLINT" => {
            (DataType::Integer, false)
        }
        "FLOAT" | "FLOAT4" | "FLOAT8" | "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "NUMERIC"
        | "DECIMAL" => (DataType::Float, false),
        "VARCHAR" | "CHARACTER VARYING" | "CHAR" | "CHARACTER" | "TEXT" | "STRING" | "JSON"
        | "JSONB" => (DataType::Text, false),
        "BOOLEAN" | "BOOL" => (DataType::Boolean, false),
        "DATE" => (DataType::Timestamp, false),
        other if other.starts_with("TIMESTAMP") => (DataType::Timestamp, false),
        other => return Err(DbError::query(format!("unsupported data type: {other}"))),
    };
    Ok(converted)
}

fn convert_binary_op(op: &sql_ast::BinaryOperator) -> Result<BinaryOp> {
    use sql_ast::BinaryOperator as SqlOp;

    match op {
        SqlOp::Plus => Ok(BinaryOp::Add),
        SqlOp::Minus => Ok(BinaryOp::Subtract),
        SqlOp::Multiply => Ok(BinaryOp::Multiply),
        SqlOp::Divide => Ok(BinaryOp::Divide),
        SqlOp::Eq => Ok(BinaryOp::Eq),
        SqlOp::NotEq => Ok(BinaryOp::NotEq),
        SqlOp::Lt => Ok(BinaryOp::Lt),
        SqlOp::LtEq => Ok(BinaryOp::LtEq),
        SqlOp::Gt => Ok(BinaryOp::Gt),
        SqlOp::GtEq => Ok(BinaryOp::GtEq),
        SqlOp::And => Ok(BinaryOp::And),
        SqlOp::Or => Ok(BinaryOp::Or),
        SqlOp::StringConcat => Ok(BinaryOp::Concat),
        other => Err(DbError::query(format!("unsupported operator: {other}"))),
    }
}

fn extract_number(expr: &sql_ast::Expr) -> Result<usize> {
    match expr {
        sql_ast::Expr::Value(value_with_span) => match &value_with_span.value {
            sql_ast::Value::Number(n, _) => n
                .parse::<usize>()
                .map_err(|_| DbError::query(format!("invalid LIMIT/OFFSET value: {n}"))),
            other => Err(DbError::query(format!("only numeric LIMIT supported, got {other}"))),
        },
        other => Err(DbError::query(format!("only numeric LIMIT supported, got {other}"))),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(sql: &str) -> Statement {
        let mut stmts = SqlParserAdapter::new().parse(sql).unwrap();
        assert_eq!(stmts.len(), 1);
        stmts.remove(0)
    }

    #[test]
    fn test_parse_serial_table() {
        let Statement::CreateTable(create) = parse_one(
            r#"CREATE TABLE "orm_signaling_registry" (id SERIAL PRIMARY KEY, date TIMESTAMP DEFAULT now())"#,
        ) else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(create.table_name, "orm_signaling_registry");
        let id = &create.columns[0];
        assert!(id.primary_key);
        assert_eq!(
            id.default,
            Some(ColumnDefault::Sequence("orm_signaling_registry_id_seq".into()))
        );
        assert_eq!(create.columns[1].data_type, DataType::Timestamp);
        assert_eq!(create.columns[1].default, Some(ColumnDefault::Now));
    }

    #[test]
    fn test_parse_scalar_subqueries() {
        let Statement::Query(query) =
            parse_one(r#"SELECT (SELECT max(id) FROM "a"), (SELECT max(id) FROM "b")"#)
        else {
            panic!("expected SELECT");
        };
        assert!(query.from.is_none());
        assert_eq!(query.projection.len(), 2);
        let SelectItem::Expr { expr: Expr::Subquery(sub), .. } = &query.projection[0] else {
            panic!("expected sub-query");
        };
        assert_eq!(sub.from.as_deref(), Some("a"));
    }

    #[test]
    fn test_parse_placeholders_and_in() {
        let Statement::Query(query) =
            parse_one("SELECT indexname FROM pg_indexes WHERE indexname IN ($1) LIMIT 5")
        else {
            panic!("expected SELECT");
        };
        assert_eq!(query.limit, Some(5));
        let Some(Expr::In { list, .. }) = &query.selection else {
            panic!("expected IN");
        };
        assert_eq!(list, &vec![Expr::Param(1)]);
    }

    #[test]
    fn test_parse_qualified_relation() {
        let Statement::Query(query) =
            parse_one("SELECT table_name FROM information_schema.tables")
        else {
            panic!("expected SELECT");
        };
        assert_eq!(query.from.as_deref(), Some("information_schema.tables"));
    }

    #[test]
    fn test_parse_insert_default_values() {
        let Statement::Insert(insert) =
            parse_one(r#"INSERT INTO "orm_signaling_assets" DEFAULT VALUES"#)
        else {
            panic!("expected INSERT");
        };
        assert_eq!(insert.table_name, "orm_signaling_assets");
        assert!(insert.values.is_empty());
        assert!(insert.columns.is_none());
    }

    #[test]
    fn test_parse_gin_index_with_operator_class() {
        let Statement::CreateIndex(index) = parse_one(
            r#"CREATE INDEX IF NOT EXISTS "res_partner__name_index" ON "res_partner" USING gin ("name" gin_trgm_ops)"#,
        ) else {
            panic!("expected CREATE INDEX");
        };
        assert_eq!(index.columns, vec!["name".to_string()]);
        assert_eq!(index.method, "gin");
        assert_eq!(index.operator_classes, vec!["gin_trgm_ops".to_string()]);

        let Statement::CreateIndex(plain) = parse_one(r#"CREATE INDEX "t_a" ON "t" ("a")"#) else {
            panic!("expected CREATE INDEX");
        };
        assert_eq!(plain.method, "btree");
        assert!(plain.operator_classes.is_empty());
    }

    #[test]
    fn test_parse_check_expression() {
        let expr = SqlParserAdapter::new().parse_expr("qty >= 0").unwrap();
        assert!(matches!(expr, Expr::BinaryOp { op: BinaryOp::GtEq, .. }));
    }

    #[test]
    fn test_syntax_error_is_query_error() {
        let err = SqlParserAdapter::new().parse("SELEC 1").unwrap_err();
        assert!(matches!(err, DbError::Query(_)));
    }
}
