// ============================================================================
// Metadata reflection
// ============================================================================
//
// Models, fields, selection values, constraints and inheritance links are
// mirrored into `ir_*` tables. Reflection is a diff: missing rows are
// inserted, changed rows are updated, identical rows are left alone.
//
// ============================================================================

use super::Registry;
use super::model::Model;
use crate::core::{Params, Result, Value};
use crate::cursor::BaseCursor;

const REFLECTION_TABLES: [(&str, &str); 5] = [
    (
        "ir_model",
        "id SERIAL PRIMARY KEY, model VARCHAR NOT NULL, name VARCHAR, state VARCHAR, \
         transient BOOLEAN, modules TEXT",
    ),
    (
        "ir_model_fields",
        "id SERIAL PRIMARY KEY, model VARCHAR NOT NULL, name VARCHAR NOT NULL, ttype VARCHAR, \
         relation VARCHAR, relation_field VARCHAR, relation_table VARCHAR, field_description VARCHAR, \
         required BOOLEAN, store BOOLEAN, indexed BOOLEAN, compute TEXT, depends TEXT, related VARCHAR, \
         on_delete VARCHAR, state VARCHAR, modules TEXT",
    ),
    (
        "ir_model_fields_selection",
        "id SERIAL PRIMARY KEY, model VARCHAR NOT NULL, field VARCHAR NOT NULL, code VARCHAR NOT NULL, \
         name VARCHAR, seq INT4",
    ),
    (
        "ir_model_constraint",
        "id SERIAL PRIMARY KEY, name VARCHAR NOT NULL, model VARCHAR, constraint_type VARCHAR, \
         definition TEXT, message TEXT, module VARCHAR",
    ),
    (
        "ir_model_inherit",
        "id SERIAL PRIMARY KEY, model VARCHAR NOT NULL, parent VARCHAR NOT NULL, parent_field VARCHAR",
    ),
];

/// What reflecting one row did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowChange {
    Inserted,
    Updated,
    Unchanged,
}

/// Makes the row identified by `keys` of `table` hold `values`.
fn reflect_row(
    cr: &mut dyn BaseCursor,
    table: &str,
    keys: &[(&str, Value)],
    values: &[(&str, Value)],
) -> Result<RowChange> {
    let condition = keys
        .iter()
        .map(|(column, _)| format!("{column} = %s"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let key_values: Vec<Value> = keys.iter().map(|(_, v)| v.clone()).collect();
    let columns = values
        .iter()
        .map(|(column, _)| *column)
        .collect::<Vec<_>>()
        .join(", ");

    let existing = cr.execute(
        &format!("SELECT id, {columns} FROM {table} WHERE {condition}"),
        &Params::from(key_values),
    )?;
    let Some(row) = existing.first() else {
        let all: Vec<&(&str, Value)> = keys.iter().chain(values).collect();
        let names = all.iter().map(|(c, _)| *c).collect::<Vec<_>>().join(", ");
        let placeholders = vec!["%s"; all.len()].join(", ");
        cr.execute(
            &format!("INSERT INTO {table} ({names}) VALUES ({placeholders})"),
            &Params::from(all.into_iter().map(|(_, v)| v.clone()).collect::<Vec<_>>()),
        )?;
        return Ok(RowChange::Inserted);
    };

    let unchanged = row[1..].iter().zip(values).all(|(old, (_, new))| old == new);
    if unchanged {
        return Ok(RowChange::Unchanged);
    }
    let id = row[0].clone();
    let assignments = values
        .iter()
        .map(|(column, _)| format!("{column} = %s"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut params: Vec<Value> = values.iter().map(|(_, v)| v.clone()).collect();
    params.push(id);
    cr.execute(
        &format!("UPDATE {table} SET {assignments} WHERE id = %s"),
        &Params::from(params),
    )?;
    Ok(RowChange::Updated)
}

fn text(value: Option<&str>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

impl Registry {
    fn ensure_reflection_tables(&self, cr: &mut dyn BaseCursor) -> Result<()> {
        let tables: Vec<String> = REFLECTION_TABLES.iter().map(|(t, _)| t.to_string()).collect();
        let existing = super::schema::existing_tables(cr, &tables)?;
        for (table, columns) in REFLECTION_TABLES.iter().filter(|(t, _)| !existing.contains(*t)) {
            cr.execute(&format!("CREATE TABLE {table} ({columns})"), &Params::None)?;
        }
        Ok(())
    }

    /// Reflects `models` and everything they declare.
    pub fn reflect_models(
        &self,
        cr: &mut dyn BaseCursor,
        models: &[&Model],
        module: &str,
    ) -> Result<()> {
        self.ensure_reflection_tables(cr)?;
        let mut changes = 0usize;
        let mut count = |change: RowChange| {
            if change != RowChange::Unchanged {
                changes += 1;
            }
        };

        let graph = self.graph();
        for model in models {
            count(reflect_row(
                cr,
                "ir_model",
                &[("model", Value::from(model.name.as_str()))],
                &[
                    ("name", Value::from(model.description.as_str())),
                    ("state", Value::from("base")),
                    ("transient", Value::Boolean(model.is_transient())),
                    ("modules", Value::from(model.modules.join(", "))),
                ],
            )?);

            for field in model.fields.values() {
                let depends = graph
                    .field_depends
                    .get(&field.id())
                    .map(|paths| paths.join(","))
                    .unwrap_or_default();
                count(reflect_row(
                    cr,
                    "ir_model_fields",
                    &[
                        ("model", Value::from(model.name.as_str())),
                        ("name", Value::from(field.name.as_str())),
                    ],
                    &[
                        ("ttype", Value::from(field.ftype.name())),
                        ("relation", text(field.comodel_name.as_deref())),
                        ("relation_field", text(field.inverse_name.as_deref())),
                        ("relation_table", text(field.relation.as_deref())),
                        ("field_description", text(field.string.as_deref().or(Some(field.name.as_str())))),
                        ("required", Value::Boolean(field.required)),
                        ("store", Value::Boolean(field.store)),
                        ("indexed", Value::Boolean(field.index.is_some())),
                        ("compute", text(field.compute.as_deref())),
                        ("depends", Value::from(depends)),
                        ("related", text(field.related.as_deref())),
                        ("on_delete", text(field.ondelete.as_deref())),
                        ("state", Value::from(if field.manual { "manual" } else { "base" })),
                        ("modules", Value::from(field.modules.join(", "))),
                    ],
                )?);

                for (sequence, (value, label)) in field.selection.iter().enumerate() {
                    count(reflect_row(
                        cr,
                        "ir_model_fields_selection",
                        &[
                            ("model", Value::from(model.name.as_str())),
                            ("field", Value::from(field.name.as_str())),
                            ("code", Value::from(value.as_str())),
                        ],
                        &[
                            ("name", Value::from(label.as_str())),
                            ("seq", Value::Integer(sequence as i64)),
                        ],
                    )?);
                }
            }

            for constraint in &model.sql_constraints {
                let name =
                    super::schema::make_identifier(&format!("{}_{}", model.table, constraint.name));
                count(reflect_row(
                    cr,
                    "ir_model_constraint",
                    &[("name", Value::from(name))],
                    &[
                        ("model", Value::from(model.name.as_str())),
                        ("constraint_type", Value::from("u")),
                        ("definition", Value::from(constraint.definition.as_str())),
                        ("message", Value::from(constraint.message.as_str())),
                        ("module", Value::from(module)),
                    ],
                )?);
            }

            let parents = model
                .inherit
                .iter()
                .map(|parent| (parent, None))
                .chain(model.inherits.iter().map(|(parent, link)| (parent, Some(link.as_str()))));
            for (parent, link) in parents {
                count(reflect_row(
                    cr,
                    "ir_model_inherit",
                    &[
                        ("model", Value::from(model.name.as_str())),
                        ("parent", Value::from(parent.as_str())),
                    ],
                    &[("parent_field", text(link))],
                )?);
            }
        }

        log::debug!(
            target: "ormregistry::registry",
            "reflected {} models of module {module:?}: {changes} rows changed",
            models.len()
        );
        Ok(())
    }

    /// Reflects one constraint created outside of the model declarations,
    /// e.g. a foreign key.
    pub fn reflect_constraint(
        &self,
        cr: &mut dyn BaseCursor,
        model: &str,
        name: &str,
        constraint_type: &str,
        message: Option<&str>,
        module: &str,
    ) -> Result<RowChange> {
        self.ensure_reflection_tables(cr)?;
        reflect_row(
            cr,
            "ir_model_constraint",
            &[("name", Value::from(name))],
            &[
                ("model", Value::from(model)),
                ("constraint_type", Value::from(constraint_type)),
                ("definition", Value::Null),
                ("message", text(message)),
                ("module", Value::from(module)),
            ],
        )
    }
}
