// ============================================================================
// Transaction control and constraint DDL recognizer
// ============================================================================
//
// These statement shapes are matched before handing the text to sqlparser:
// transaction control has no interesting structure, and the constraint forms
// of ALTER TABLE are easier to recognize directly than through the generic
// AST.
//
// ============================================================================

use super::ast::{AlterTableOperation, AlterTableStmt, ConstraintKindSpec, ConstraintSpec, Statement};
use crate::core::Result;
use lazy_static::lazy_static;
use regex::Regex;

const IDENT: &str = r#"("[^"]+"|[A-Za-z_][A-Za-z0-9_.$]*)"#;

lazy_static! {
    static ref BEGIN: Regex =
        Regex::new(r"(?i)^\s*(BEGIN|START)(\s+(TRANSACTION|WORK))?\s*;?\s*$").unwrap();
    static ref COMMIT: Regex =
        Regex::new(r"(?i)^\s*(COMMIT|END)(\s+(TRANSACTION|WORK))?\s*;?\s*$").unwrap();
    static ref ROLLBACK: Regex =
        Regex::new(r"(?i)^\s*(ROLLBACK|ABORT)(\s+(TRANSACTION|WORK))?\s*;?\s*$").unwrap();
    static ref SAVEPOINT: Regex =
        Regex::new(&format!(r"(?i)^\s*SAVEPOINT\s+{IDENT}\s*;?\s*$")).unwrap();
    static ref RELEASE: Regex =
        Regex::new(&format!(r"(?i)^\s*RELEASE\s+(SAVEPOINT\s+)?{IDENT}\s*;?\s*$")).unwrap();
    static ref ROLLBACK_TO: Regex = Regex::new(&format!(
        r"(?i)^\s*ROLLBACK\s+(TRANSACTION\s+|WORK\s+)?TO\s+(SAVEPOINT\s+)?{IDENT}\s*;?\s*$"
    ))
    .unwrap();
    static ref SET_READONLY: Regex = Regex::new(
        r"(?i)^\s*SET\s+(SESSION\s+CHARACTERISTICS\s+AS\s+)?TRANSACTION\s+READ\s+(ONLY|WRITE)\s*;?\s*$"
    )
    .unwrap();
    static ref ADD_FOREIGN_KEY: Regex = Regex::new(&format!(
        r"(?i)^\s*ALTER\s+TABLE\s+{IDENT}\s+ADD\s+(CONSTRAINT\s+{IDENT}\s+)?FOREIGN\s+KEY\s*\(\s*{IDENT}\s*\)\s*REFERENCES\s+{IDENT}\s*\(\s*{IDENT}\s*\)(\s+ON\s+DELETE\s+(CASCADE|RESTRICT|NO\s+ACTION|SET\s+NULL|SET\s+DEFAULT))?\s*;?\s*$"
    ))
    .unwrap();
    static ref ADD_UNIQUE: Regex = Regex::new(&format!(
        r"(?i)^\s*ALTER\s+TABLE\s+{IDENT}\s+ADD\s+(CONSTRAINT\s+{IDENT}\s+)?UNIQUE\s*\(([^)]*)\)\s*;?\s*$"
    ))
    .unwrap();
    static ref ADD_CHECK: Regex = Regex::new(&format!(
        r"(?i)^\s*ALTER\s+TABLE\s+{IDENT}\s+ADD\s+(CONSTRAINT\s+{IDENT}\s+)?CHECK\s*\((.*)\)\s*;?\s*$"
    ))
    .unwrap();
    static ref DROP_CONSTRAINT: Regex = Regex::new(&format!(
        r"(?i)^\s*ALTER\s+TABLE\s+{IDENT}\s+DROP\s+CONSTRAINT\s+(IF\s+EXISTS\s+)?{IDENT}\s*;?\s*$"
    ))
    .unwrap();
    static ref ALTER_NOT_NULL: Regex = Regex::new(&format!(
        r"(?i)^\s*ALTER\s+TABLE\s+{IDENT}\s+ALTER\s+(COLUMN\s+)?{IDENT}\s+(SET|DROP)\s+NOT\s+NULL\s*;?\s*$"
    ))
    .unwrap();
}

/// Removes the double quotes of a quoted identifier.
pub fn unquote(ident: &str) -> String {
    let trimmed = ident.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.strip_prefix("public.").unwrap_or(unquoted).to_string()
}

/// Recognizes the statements handled outside sqlparser.
///
/// `parse_check` turns the body of a CHECK constraint into an expression.
pub fn parse_control(
    sql: &str,
    parse_check: impl Fn(&str) -> Result<super::ast::Expr>,
) -> Result<Option<Statement>> {
    if BEGIN.is_match(sql) {
        return Ok(Some(Statement::Begin));
    }
    if COMMIT.is_match(sql) {
        return Ok(Some(Statement::Commit));
    }
    if let Some(caps) = ROLLBACK_TO.captures(sql) {
        return Ok(Some(Statement::RollbackToSavepoint(unquote(&caps[3]))));
    }
    if ROLLBACK.is_match(sql) {
        return Ok(Some(Statement::Rollback));
    }
    if let Some(caps) = SAVEPOINT.captures(sql) {
        return Ok(Some(Statement::Savepoint(unquote(&caps[1]))));
    }
    if let Some(caps) = RELEASE.captures(sql) {
        return Ok(Some(Statement::ReleaseSavepoint(unquote(&caps[2]))));
    }
    if let Some(caps) = SET_READONLY.captures(sql) {
        return Ok(Some(Statement::SetReadOnly(
            caps[2].eq_ignore_ascii_case("only"),
        )));
    }

    if let Some(caps) = ADD_FOREIGN_KEY.captures(sql) {
        let on_delete = caps
            .get(8)
            .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_else(|| "NO ACTION".to_string())
            .to_ascii_uppercase();
        return Ok(Some(alter(
            &caps[1],
            AlterTableOperation::AddConstraint(ConstraintSpec {
                name: caps.get(3).map(|m| unquote(m.as_str())),
                kind: ConstraintKindSpec::ForeignKey {
                    column: unquote(&caps[4]),
                    foreign_table: unquote(&caps[5]),
                    foreign_column: unquote(&caps[6]),
                    on_delete,
                },
            }),
        )));
    }
    if let Some(caps) = ADD_UNIQUE.captures(sql) {
        let columns = caps[4]
            .split(',')
            .map(unquote)
            .filter(|c| !c.is_empty())
            .collect();
        return Ok(Some(alter(
            &caps[1],
            AlterTableOperation::AddConstraint(ConstraintSpec {
                name: caps.get(3).map(|m| unquote(m.as_str())),
                kind: ConstraintKindSpec::Unique { columns },
            }),
        )));
    }
    if let Some(caps) = ADD_CHECK.captures(sql) {
        let definition = caps[4].trim().to_string();
        let expr = parse_check(&definition)?;
        return Ok(Some(alter(
            &caps[1],
            AlterTableOperation::AddConstraint(ConstraintSpec {
                name: caps.get(3).map(|m| unquote(m.as_str())),
                kind: ConstraintKindSpec::Check { expr, definition },
            }),
        )));
    }
    if let Some(caps) = DROP_CONSTRAINT.captures(sql) {
        return Ok(Some(alter(
            &caps[1],
            AlterTableOperation::DropConstraint {
                name: unquote(&caps[3]),
                if_exists: caps.get(2).is_some(),
            },
        )));
    }
    if let Some(caps) = ALTER_NOT_NULL.captures(sql) {
        return Ok(Some(alter(
            &caps[1],
            AlterTableOperation::SetNotNull {
                column: unquote(&caps[3]),
                not_null: caps[4].eq_ignore_ascii_case("set"),
            },
        )));
    }

    Ok(None)
}

fn alter(table: &str, operation: AlterTableOperation) -> Statement {
    Statement::AlterTable(AlterTableStmt {
        table_name: unquote(table),
        operation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Expr;

    fn no_check(_: &str) -> Result<Expr> {
        Ok(Expr::Literal(crate::core::Value::Boolean(true)))
    }

    #[test]
    fn test_transaction_control() {
        assert_eq!(parse_control("BEGIN", no_check).unwrap(), Some(Statement::Begin));
        assert_eq!(parse_control("commit;", no_check).unwrap(), Some(Statement::Commit));
        assert_eq!(
            parse_control("SAVEPOINT \"sp_1\"", no_check).unwrap(),
            Some(Statement::Savepoint("sp_1".into()))
        );
        assert_eq!(
            parse_control("ROLLBACK TO SAVEPOINT sp_1", no_check).unwrap(),
            Some(Statement::RollbackToSavepoint("sp_1".into()))
        );
        assert_eq!(
            parse_control("RELEASE SAVEPOINT sp_1", no_check).unwrap(),
            Some(Statement::ReleaseSavepoint("sp_1".into()))
        );
        assert_eq!(parse_control("SELECT 1", no_check).unwrap(), None);
    }

    #[test]
    fn test_unnamed_foreign_key() {
        let stmt = parse_control(
            r#"ALTER TABLE "sale_order" ADD FOREIGN KEY ("partner_id") REFERENCES "res_partner"("id") ON DELETE set null"#,
            no_check,
        )
        .unwrap()
        .unwrap();
        let Statement::AlterTable(alter) = stmt else {
            panic!("expected ALTER TABLE");
        };
        assert_eq!(alter.table_name, "sale_order");
        assert_eq!(
            alter.operation,
            AlterTableOperation::AddConstraint(ConstraintSpec {
                name: None,
                kind: ConstraintKindSpec::ForeignKey {
                    column: "partner_id".into(),
                    foreign_table: "res_partner".into(),
                    foreign_column: "id".into(),
                    on_delete: "SET NULL".into(),
                },
            })
        );
    }

    #[test]
    fn test_unique_and_not_null() {
        let Some(Statement::AlterTable(alter)) = parse_control(
            r#"ALTER TABLE "t" ADD CONSTRAINT "t_code_uniq" UNIQUE ("code", "company_id")"#,
            no_check,
        )
        .unwrap() else {
            panic!("expected ALTER TABLE");
        };
        assert_eq!(
            alter.operation,
            AlterTableOperation::AddConstraint(ConstraintSpec {
                name: Some("t_code_uniq".into()),
                kind: ConstraintKindSpec::Unique {
                    columns: vec!["code".into(), "company_id".into()]
                },
            })
        );

        let Some(Statement::AlterTable(alter)) =
            parse_control(r#"ALTER TABLE "t" ALTER COLUMN "name" SET NOT NULL"#, no_check).unwrap()
        else {
            panic!("expected ALTER TABLE");
        };
        assert_eq!(
            alter.operation,
            AlterTableOperation::SetNotNull {
                column: "name".into(),
                not_null: true
            }
        );
    }
}
