// ============================================================================
// Table setup from field declarations
// ============================================================================

use super::Registry;
use super::field::{Field, FieldType};
use super::model::Model;
use super::reconcile::ForeignKey;
use crate::core::{Params, Result, Value};
use crate::cursor::BaseCursor;
use crate::storage::catalog::delete_action_code;
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use uuid::Uuid;

/// Longest identifier accepted by the database.
pub const IDENTIFIER_MAX: usize = 63;

/// `name`, shortened with a hash suffix when too long to be an identifier.
pub fn make_identifier(name: &str) -> String {
    if name.len() <= IDENTIFIER_MAX {
        return name.to_string();
    }
    let hash = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).simple().to_string();
    let mut cut = IDENTIFIER_MAX - 9;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{}", &name[..cut], &hash[..8])
}

pub fn make_index_name(table: &str, column: &str) -> String {
    make_identifier(&format!("{table}__{column}_index"))
}

pub fn make_foreign_key_name(table: &str, column: &str) -> String {
    make_identifier(&format!("{table}_{column}_fkey"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub data_type: String,
    pub nullable: bool,
}

/// Tables of `tables` that exist.
pub fn existing_tables(cr: &mut dyn BaseCursor, tables: &[String]) -> Result<IndexSet<String>> {
    if tables.is_empty() {
        return Ok(IndexSet::new());
    }
    let result = cr.execute(
        "SELECT table_name FROM information_schema.tables WHERE table_name IN %s",
        &Params::from([Value::from(tables.to_vec())]),
    )?;
    Ok(result
        .rows
        .into_iter()
        .filter_map(|row| row.into_iter().next().and_then(|v| v.as_str().map(str::to_string)))
        .collect())
}

pub fn table_exists(cr: &mut dyn BaseCursor, table: &str) -> Result<bool> {
    Ok(!existing_tables(cr, &[table.to_string()])?.is_empty())
}

pub fn table_columns(cr: &mut dyn BaseCursor, table: &str) -> Result<IndexMap<String, ColumnInfo>> {
    let result = cr.execute(
        "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
         WHERE table_name = %s ORDER BY ordinal_position",
        &Params::from([table]),
    )?;
    let mut columns = IndexMap::new();
    for row in result.rows {
        if let [Value::Text(name), Value::Text(data_type), Value::Text(nullable)] = row.as_slice() {
            columns.insert(
                name.clone(),
                ColumnInfo {
                    data_type: data_type.clone(),
                    nullable: nullable == "YES",
                },
            );
        }
    }
    Ok(columns)
}

pub fn create_model_table(cr: &mut dyn BaseCursor, table: &str) -> Result<()> {
    cr.execute(
        &format!("CREATE TABLE \"{table}\" (id SERIAL PRIMARY KEY)"),
        &Params::None,
    )?;
    log::debug!(target: "ormregistry::schema", "Table {table:?}: created");
    Ok(())
}

pub fn create_column(
    cr: &mut dyn BaseCursor,
    table: &str,
    column: &str,
    sql_type: &str,
) -> Result<()> {
    cr.execute(
        &format!("ALTER TABLE \"{table}\" ADD COLUMN \"{column}\" {sql_type}"),
        &Params::None,
    )?;
    log::debug!(target: "ormregistry::schema", "Table {table:?}: added column {column:?} of type {sql_type}");
    Ok(())
}

pub fn rename_column(cr: &mut dyn BaseCursor, table: &str, old: &str, new: &str) -> Result<()> {
    cr.execute(
        &format!("ALTER TABLE \"{table}\" RENAME COLUMN \"{old}\" TO \"{new}\""),
        &Params::None,
    )?;
    log::debug!(target: "ormregistry::schema", "Table {table:?}: renamed column {old:?} to {new:?}");
    Ok(())
}

pub fn set_not_null(
    cr: &mut dyn BaseCursor,
    table: &str,
    column: &str,
    not_null: bool,
) -> Result<()> {
    let action = if not_null { "SET" } else { "DROP" };
    cr.execute(
        &format!("ALTER TABLE \"{table}\" ALTER COLUMN \"{column}\" {action} NOT NULL"),
        &Params::None,
    )?;
    log::debug!(target: "ormregistry::schema", "Table {table:?}: column {column:?}: {action} NOT NULL");
    Ok(())
}

/// Definition of the constraint `name` on `table`, if it exists.
pub fn constraint_definition(
    cr: &mut dyn BaseCursor,
    table: &str,
    name: &str,
) -> Result<Option<String>> {
    let result = cr.execute(
        "SELECT condef FROM pg_constraint WHERE relname = %s AND conname = %s",
        &Params::from([table, name]),
    )?;
    Ok(result
        .first()
        .and_then(|row| row.first())
        .and_then(|v| v.as_str().map(str::to_string)))
}

pub fn add_constraint(
    cr: &mut dyn BaseCursor,
    table: &str,
    name: &str,
    definition: &str,
) -> Result<()> {
    cr.execute(
        &format!("ALTER TABLE \"{table}\" ADD CONSTRAINT \"{name}\" {definition}"),
        &Params::None,
    )?;
    log::debug!(target: "ormregistry::schema", "Table {table:?}: added constraint {name:?} as {definition}");
    Ok(())
}

pub fn drop_constraint(cr: &mut dyn BaseCursor, table: &str, name: &str) -> Result<()> {
    cr.execute(
        &format!("ALTER TABLE \"{table}\" DROP CONSTRAINT IF EXISTS \"{name}\""),
        &Params::None,
    )?;
    log::debug!(target: "ormregistry::schema", "Table {table:?}: dropped constraint {name:?}");
    Ok(())
}

/// Adds a foreign key and returns its name.
pub fn add_foreign_key(
    cr: &mut dyn BaseCursor,
    table1: &str,
    column1: &str,
    table2: &str,
    column2: &str,
    ondelete: &str,
) -> Result<String> {
    let name = make_foreign_key_name(table1, column1);
    let ondelete = ondelete.to_ascii_uppercase();
    cr.execute(
        &format!(
            "ALTER TABLE \"{table1}\" ADD CONSTRAINT \"{name}\" FOREIGN KEY (\"{column1}\") \
             REFERENCES \"{table2}\" (\"{column2}\") ON DELETE {ondelete}"
        ),
        &Params::None,
    )?;
    log::debug!(
        target: "ormregistry::schema",
        "Table {table1:?}: added foreign key {column1:?} references {table2:?}({column2:?}) ON DELETE {ondelete}"
    );
    Ok(name)
}

pub fn create_index(
    cr: &mut dyn BaseCursor,
    name: &str,
    table: &str,
    expressions: &[String],
    method: &str,
    unique: bool,
    predicate: Option<&str>,
) -> Result<()> {
    let unique = if unique { "UNIQUE " } else { "" };
    let expressions = expressions.join(", ");
    let predicate = predicate.map(|p| format!(" WHERE {p}")).unwrap_or_default();
    cr.execute(
        &format!(
            "CREATE {unique}INDEX IF NOT EXISTS \"{name}\" ON \"{table}\" USING {method} ({expressions}){predicate}"
        ),
        &Params::None,
    )?;
    log::debug!(target: "ormregistry::schema", "Table {table:?}: created index {name:?} ({expressions})");
    Ok(())
}

/// Delete action code as reported by the catalog.
pub fn confdeltype(ondelete: &str) -> &'static str {
    delete_action_code(ondelete)
}

/// First free `<column>_moved<N>` name.
fn moved_name(columns: &IndexMap<String, ColumnInfo>, column: &str) -> String {
    (0..)
        .map(|i| format!("{column}_moved{i}"))
        .find(|name| !columns.contains_key(name))
        .unwrap_or_else(|| format!("{column}_moved"))
}

impl Registry {
    /// Creates or updates the table of `model` to match its stored fields.
    /// Foreign keys are only declared here; they are reconciled by
    /// `check_foreign_keys`.
    pub(crate) fn auto_init(&self, cr: &mut dyn BaseCursor, model: &Model) -> Result<()> {
        if !model.has_table() {
            return Ok(());
        }
        let table = model.table.as_str();
        let module = model.modules.last().cloned().unwrap_or_default();

        let must_create = !table_exists(cr, table)?;
        if must_create {
            create_model_table(cr, table)?;
        }
        let mut columns = table_columns(cr, table)?;

        for field in model.fields.values() {
            let Some((sql_type, data_type)) = field.column_type() else {
                if field.ftype == FieldType::Many2many && field.store {
                    self.init_relation_table(cr, model, field)?;
                }
                continue;
            };
            if field.name == "id" {
                continue;
            }
            let name = field.name.as_str();

            match columns.get(name) {
                Some(info) if info.data_type != data_type.sql_name() => {
                    let moved = moved_name(&columns, name);
                    rename_column(cr, table, name, &moved)?;
                    create_column(cr, table, name, sql_type)?;
                    log::warn!(
                        target: "ormregistry::schema",
                        "Table {table:?}: column {name:?} changed type to {sql_type}, old column kept as {moved:?}"
                    );
                    columns = table_columns(cr, table)?;
                }
                Some(_) => {}
                None => {
                    create_column(cr, table, name, sql_type)?;
                    columns = table_columns(cr, table)?;
                }
            }

            let nullable = columns.get(name).is_none_or(|info| info.nullable);
            if field.required && nullable {
                let (table, column) = (table.to_string(), name.to_string());
                self.post_constraint(
                    cr,
                    &format!("not null {table}.{column}"),
                    Arc::new(move |cr: &mut dyn BaseCursor| set_not_null(cr, &table, &column, true)),
                )?;
            } else if !field.required && !nullable {
                set_not_null(cr, table, name, false)?;
            }

            if field.ftype == FieldType::Many2one
                && let Some(comodel) = field
                    .comodel_name
                    .as_deref()
                    .and_then(|name| self.graph().model(name).cloned())
                && comodel.has_table()
            {
                self.add_foreign_key(
                    ForeignKey::new(table, name, &comodel.table, "id", field.ondelete_action())
                        .owner(&model.name, &module),
                    true,
                );
            }
        }

        for constraint in &model.sql_constraints {
            let conname = make_identifier(&format!("{table}_{}", constraint.name));
            let (table, definition) = (table.to_string(), constraint.definition.clone());
            let name = conname.clone();
            self.post_constraint(
                cr,
                &format!("constraint {conname}"),
                Arc::new(move |cr: &mut dyn BaseCursor| {
                    match constraint_definition(cr, &table, &name)? {
                        Some(existing) if normalize(&existing) == normalize(&definition) => Ok(()),
                        Some(_) => {
                            drop_constraint(cr, &table, &name)?;
                            add_constraint(cr, &table, &name, &definition)
                        }
                        None => add_constraint(cr, &table, &name, &definition),
                    }
                }),
            )?;
        }

        if must_create {
            log::info!(target: "ormregistry::schema", "Model {}: table {table:?} created", model.name);
        }
        Ok(())
    }

    fn init_relation_table(
        &self,
        cr: &mut dyn BaseCursor,
        model: &Model,
        field: &Field,
    ) -> Result<()> {
        let (Some(relation), Some(comodel_name)) = (&field.relation, &field.comodel_name) else {
            return Ok(());
        };
        let graph = self.graph();
        let Some(comodel) = graph.model(comodel_name) else {
            return Ok(());
        };
        if !comodel.has_table() || table_exists(cr, relation)? {
            return Ok(());
        }
        let column1 = format!("{}_id", model.table);
        let column2 = format!("{}_id", comodel.table);
        cr.execute(
            &format!(
                "CREATE TABLE \"{relation}\" (\"{column1}\" INT4 NOT NULL, \"{column2}\" INT4 NOT NULL)"
            ),
            &Params::None,
        )?;
        add_constraint(
            cr,
            relation,
            &make_identifier(&format!("{relation}_pair_key")),
            &format!("UNIQUE (\"{column1}\", \"{column2}\")"),
        )?;
        let module = field.modules.last().cloned().unwrap_or_default();
        for (column, target) in [(&column1, &model.table), (&column2, &comodel.table)] {
            self.add_foreign_key(
                ForeignKey::new(relation, column, target, "id", "cascade").owner(&model.name, &module),
                true,
            );
        }
        log::debug!(target: "ormregistry::schema", "Create table {relation:?}: m2m relation between {:?} and {:?}", model.table, comodel.table);
        Ok(())
    }
}

fn normalize(definition: &str) -> String {
    definition
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '"')
        .collect::<String>()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_names() {
        assert_eq!(make_index_name("res_partner", "name"), "res_partner__name_index");
        let long = make_index_name(&"x".repeat(60), "column");
        assert_eq!(long.len(), IDENTIFIER_MAX);
        assert_eq!(long, make_index_name(&"x".repeat(60), "column"));
        assert_ne!(long, make_index_name(&"x".repeat(60), "other_column"));
    }

    #[test]
    fn test_moved_name_skips_taken() {
        let mut columns = IndexMap::new();
        let info = ColumnInfo {
            data_type: "integer".into(),
            nullable: true,
        };
        columns.insert("amount".to_string(), info.clone());
        columns.insert("amount_moved0".to_string(), info);
        assert_eq!(moved_name(&columns, "amount"), "amount_moved1");
    }

    #[test]
    fn test_normalize_definitions() {
        assert_eq!(normalize("UNIQUE (\"login\")"), normalize("unique(login)"));
    }
}
