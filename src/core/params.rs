// ============================================================================
// Statement parameters
// ============================================================================
//
// Parameters are either a fixed-size sequence or a mapping; a bare scalar is
// not representable. Queries may use psycopg-style placeholders (`%s`,
// `%(name)s`, `%%` for a literal percent sign) or native `$n` placeholders.
//
// ============================================================================

use super::{DbError, Result, Value};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(BTreeMap<String, Value>),
}

impl Params {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::None => true,
            Self::Positional(values) => values.is_empty(),
            Self::Named(map) => map.is_empty(),
        }
    }

    /// Rewrites psycopg placeholders into `$n` and returns the values in
    /// placeholder order.
    pub fn bind(&self, sql: &str) -> Result<(String, Vec<Value>)> {
        if matches!(self, Self::None) {
            return Ok((sql.to_string(), Vec::new()));
        }

        let mut out = String::with_capacity(sql.len());
        let mut values: Vec<Value> = Vec::new();
        let mut named_slots: HashMap<String, usize> = HashMap::new();
        let mut positional_used = 0usize;
        let mut quote: Option<char> = None;
        let mut chars = sql.chars().peekable();

        while let Some(c) = chars.next() {
            if let Some(q) = quote {
                out.push(c);
                if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '\'' | '"' => {
                    quote = Some(c);
                    out.push(c);
                }
                '%' => match chars.next() {
                    Some('%') => out.push('%'),
                    Some('s') => {
                        let Self::Positional(given) = self else {
                            return Err(DbError::query(
                                "positional placeholder used with named parameters",
                            ));
                        };
                        let value = given.get(positional_used).cloned().ok_or_else(|| {
                            DbError::query("not enough arguments for format string")
                        })?;
                        positional_used += 1;
                        let list = matches!(value, Value::List(_));
                        values.push(value);
                        out.push_str(&placeholder(values.len(), list));
                    }
                    Some('(') => {
                        let Self::Named(given) = self else {
                            return Err(DbError::query(
                                "named placeholder used with positional parameters",
                            ));
                        };
                        let mut name = String::new();
                        loop {
                            match chars.next() {
                                Some(')') => break,
                                Some(ch) => name.push(ch),
                                None => {
                                    return Err(DbError::query("incomplete placeholder: '%('"));
                                }
                            }
                        }
                        if chars.next() != Some('s') {
                            return Err(DbError::query(format!(
                                "format not supported for placeholder '%({name})'"
                            )));
                        }
                        let slot = match named_slots.get(&name) {
                            Some(slot) => *slot,
                            None => {
                                let value = given.get(&name).cloned().ok_or_else(|| {
                                    DbError::KeyNotFound(format!("query parameter '{name}'"))
                                })?;
                                values.push(value);
                                named_slots.insert(name, values.len());
                                values.len()
                            }
                        };
                        let list = matches!(values[slot - 1], Value::List(_));
                        out.push_str(&placeholder(slot, list));
                    }
                    other => {
                        return Err(DbError::query(format!(
                            "unsupported format character {other:?} in query"
                        )));
                    }
                },
                _ => out.push(c),
            }
        }

        match self {
            Self::Positional(given) if positional_used == 0 => {
                // native `$n` placeholders
                Ok((out, given.clone()))
            }
            Self::Positional(given) if positional_used < given.len() => Err(DbError::query(
                "not all arguments converted during string formatting",
            )),
            _ => Ok((out, values)),
        }
    }
}

/// A list value binds as a parenthesized group so that `IN %s` reads as
/// `IN ($n)`; the evaluator expands the list inside the group.
fn placeholder(slot: usize, list: bool) -> String {
    if list {
        format!("(${slot})")
    } else {
        format!("${slot}")
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Self::None
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl<V: Into<Value>, const N: usize> From<[V; N]> for Params {
    fn from(values: [V; N]) -> Self {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Params {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Named(map)
    }
}

impl From<HashMap<String, Value>> for Params {
    fn from(map: HashMap<String, Value>) -> Self {
        Self::Named(map.into_iter().collect())
    }
}

/// Builds [`Params`]: `params![a, b]` for positional values,
/// `params!{"name" => a}` for named ones.
#[macro_export]
macro_rules! params {
    () => {
        $crate::core::Params::None
    };
    ($($name:literal => $value:expr),+ $(,)?) => {{
        let mut map = ::std::collections::BTreeMap::new();
        $(map.insert(::std::string::String::from($name), $crate::core::Value::from($value));)+
        $crate::core::Params::Named(map)
    }};
    ($($value:expr),+ $(,)?) => {
        $crate::core::Params::Positional(vec![$($crate::core::Value::from($value)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_binding() {
        let params = Params::from([Value::Integer(1), Value::from("x")]);
        let (sql, values) = params
            .bind("SELECT * FROM t WHERE a = %s AND b = %s")
            .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_named_binding_reuses_slot() {
        let params = crate::params! {"id" => 7i64};
        let (sql, values) = params
            .bind("SELECT %(id)s, %(id)s, '%s' WHERE x LIKE 'a%%'")
            .unwrap();
        assert_eq!(sql, "SELECT $1, $1, '%s' WHERE x LIKE 'a%%'");
        assert_eq!(values, vec![Value::Integer(7)]);
    }

    #[test]
    fn test_shape_errors() {
        let too_many = Params::from([1i64, 2]);
        assert!(too_many.bind("SELECT %s").is_err());
        let too_few = Params::from([1i64]);
        assert!(too_few.bind("SELECT %s, %s").is_err());
        let named = crate::params! {"a" => 1i64};
        assert!(named.bind("SELECT %s").is_err());
        assert!(matches!(
            named.bind("SELECT %(b)s"),
            Err(DbError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_list_binds_as_group() {
        let params = Params::from([
            Value::from(vec!["res_partner", "res_users"]),
            Value::from("BASE TABLE"),
        ]);
        let (sql, values) = params
            .bind("SELECT 1 WHERE table_name IN %s AND table_type = %s")
            .unwrap();
        assert_eq!(sql, "SELECT 1 WHERE table_name IN ($1) AND table_type = $2");
        assert_eq!(values.len(), 2);

        let named = crate::params! {"ids" => vec![1i64, 2, 3]};
        let (sql, _) = named
            .bind("SELECT 1 WHERE id IN %(ids)s OR parent IN %(ids)s")
            .unwrap();
        assert_eq!(sql, "SELECT 1 WHERE id IN ($1) OR parent IN ($1)");
    }

    #[test]
    fn test_native_placeholders_pass_through() {
        let params = Params::from([5i64]);
        let (sql, values) = params.bind("SELECT $1").unwrap();
        assert_eq!(sql, "SELECT $1");
        assert_eq!(values, vec![Value::Integer(5)]);
    }
}
