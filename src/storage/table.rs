use super::TableSchema;
use crate::core::{DbError, Result, Row, Value};
use im::OrdMap;

/// Rows of one table, keyed by a hidden row id.
///
/// Backed by a persistent map so a transaction snapshot is a cheap clone.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: OrdMap<u64, Row>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: OrdMap::new(),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub(crate) fn schema_mut(&mut self) -> &mut TableSchema {
        &mut self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = (u64, &Row)> {
        self.rows.iter().map(|(id, row)| (*id, row))
    }

    pub fn get(&self, row_id: u64) -> Option<&Row> {
        self.rows.get(&row_id)
    }

    pub fn validate_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.schema.columns().len() {
            return Err(DbError::query(format!(
                "row has {} values, table \"{}\" has {} columns",
                row.len(),
                self.schema.name(),
                self.schema.columns().len()
            )));
        }
        for (col, value) in self.schema.columns().iter().zip(row) {
            col.validate(value)?;
        }
        Ok(())
    }

    /// Checks primary key / UNIQUE columns plus the extra unique column sets
    /// given by table constraints. `skip` is the row being replaced.
    pub fn check_unique(&self, row: &Row, extra: &[Vec<usize>], skip: Option<u64>) -> Result<()> {
        let mut sets = self.schema.unique_column_sets();
        sets.extend(extra.iter().cloned());

        for set in &sets {
            // NULLs never collide
            if set.iter().any(|&i| row[i].is_null()) {
                continue;
            }
            let clash = self.rows.iter().any(|(id, other)| {
                Some(*id) != skip && set.iter().all(|&i| other[i] == row[i])
            });
            if clash {
                let cols: Vec<&str> = set
                    .iter()
                    .map(|&i| self.schema.columns()[i].name.as_str())
                    .collect();
                return Err(DbError::query(format!(
                    "duplicate key value violates unique constraint on \"{}\" ({})",
                    self.schema.name(),
                    cols.join(", ")
                )));
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, row_id: u64, row: Row) {
        self.rows.insert(row_id, row);
    }

    pub fn update(&mut self, row_id: u64, row: Row) -> Result<()> {
        if !self.rows.contains_key(&row_id) {
            return Err(DbError::query(format!(
                "row {row_id} of \"{}\" vanished",
                self.schema.name()
            )));
        }
        self.rows.insert(row_id, row);
        Ok(())
    }

    pub fn delete(&mut self, row_id: u64) -> Option<Row> {
        self.rows.remove(&row_id)
    }

    /// Appends a column, filling existing rows with `fill`.
    pub fn add_column(&mut self, column: crate::core::Column, fill: Value) {
        self.schema.columns_mut().push(column);
        self.rows = self
            .rows
            .iter()
            .map(|(id, row)| {
                let mut row = row.clone();
                row.push(fill.clone());
                (*id, row)
            })
            .collect();
    }

    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.values().map(move |row| &row[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};

    fn table() -> Table {
        let schema = TableSchema::new(
            "users",
            vec![
                Column::new("id", DataType::Integer).primary_key(),
                Column::new("name", DataType::Text),
            ],
        )
        .unwrap();
        Table::new(schema)
    }

    #[test]
    fn test_primary_key_uniqueness() {
        let mut t = table();
        let row = vec![Value::Integer(1), Value::from("a")];
        t.check_unique(&row, &[], None).unwrap();
        t.insert(1, row.clone());
        assert!(t.check_unique(&row, &[], None).is_err());
        // updating the row in place is fine
        t.check_unique(&row, &[], Some(1)).unwrap();
    }

    #[test]
    fn test_add_column_fills_rows() {
        let mut t = table();
        t.insert(1, vec![Value::Integer(1), Value::from("a")]);
        t.add_column(Column::new("active", DataType::Boolean), Value::Null);
        assert_eq!(t.get(1).unwrap().len(), 3);
        assert_eq!(t.schema().columns().len(), 3);
    }
}
