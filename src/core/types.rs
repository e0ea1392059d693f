use super::{DataType, DbError, Result, Value};
use serde::{Deserialize, Serialize};

pub type Row = Vec<Value>;

/// Default applied to a column when an INSERT does not provide it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnDefault {
    /// `SERIAL`: next value of the named sequence.
    Sequence(String),
    /// `DEFAULT now()`
    Now,
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default: Option<ColumnDefault>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(DbError::query(format!(
                    "null value in column \"{}\" violates not-null constraint",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(DbError::query(format!(
                "column \"{}\" is of type {} but expression is of type {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }

    pub fn default_sql(&self) -> Option<String> {
        self.default.as_ref().map(|default| match default {
            ColumnDefault::Sequence(seq) => format!("nextval('{seq}'::regclass)"),
            ColumnDefault::Now => "now()".to_string(),
            ColumnDefault::Literal(value) => value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_null_validation() {
        let col = Column::new("name", DataType::Text).not_null();
        assert!(col.validate(&Value::Null).is_err());
        assert!(col.validate(&Value::Text("x".into())).is_ok());
        assert!(col.validate(&Value::Integer(1)).is_err());
    }

    #[test]
    fn test_primary_key_implies_not_null() {
        let col = Column::new("id", DataType::Integer).primary_key();
        assert!(!col.nullable);
        assert!(col.primary_key);
    }
}
