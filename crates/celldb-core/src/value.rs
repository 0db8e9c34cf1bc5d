use std::cmp::Ordering;
use std::fmt;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            CellValue::Null => false,
            CellValue::Bool(b) => *b,
            CellValue::Integer(i) => *i != 0,
            CellValue::Number(n) => *n != 0.0,
            CellValue::Text(s) => !s.is_empty(),
            CellValue::Blob(b) => !b.is_empty(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, CellValue::Integer(_) | CellValue::Number(_))
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self {
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Number(n) => Some(*n),
            CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Text(s) => s.trim().parse::<f64>().ok(),
            CellValue::Null | CellValue::Blob(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Null => "null",
            CellValue::Bool(_) => "boolean",
            CellValue::Integer(_) => "integer",
            CellValue::Number(_) => "number",
            CellValue::Text(_) => "string",
            CellValue::Blob(_) => "blob",
        }
    }

    /// SQL-style comparison; `None` when the values are not comparable.
    pub fn cmp_partial(&self, other: &CellValue) -> Option<Ordering> {
        match (self, other) {
            (CellValue::Null, CellValue::Null) => Some(Ordering::Equal),
            (CellValue::Null, _) | (_, CellValue::Null) => None,
            (CellValue::Integer(a), CellValue::Integer(b)) => Some(a.cmp(b)),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.to_f64().and_then(|x| b.to_f64().and_then(|y| x.partial_cmp(&y)))
            }
            (CellValue::Text(a), CellValue::Text(b)) => Some(a.cmp(b)),
            (CellValue::Bool(a), CellValue::Bool(b)) => Some(a.cmp(b)),
            (CellValue::Blob(a), CellValue::Blob(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used by ORDER BY: null < bool < numbers < strings < blobs.
    pub fn sort_cmp(&self, other: &CellValue) -> Ordering {
        fn rank(v: &CellValue) -> u8 {
            match v {
                CellValue::Null => 0,
                CellValue::Bool(_) => 1,
                CellValue::Integer(_) | CellValue::Number(_) => 2,
                CellValue::Text(_) => 3,
                CellValue::Blob(_) => 4,
            }
        }
        match rank(self).cmp(&rank(other)) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match (self, other) {
            (CellValue::Integer(a), CellValue::Integer(b)) => a.cmp(b),
            (a, b) if a.is_numeric() => {
                let x = a.to_f64().unwrap_or(f64::NAN);
                let y = b.to_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
            _ => self.cmp_partial(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Text form used for string concatenation, row names and CSV cells.
    pub fn to_display_string(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
            CellValue::Blob(b) => b.iter().map(|byte| format!("{byte:02x}")).collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
            CellValue::Integer(i) => serde_json::Value::Number((*i).into()),
            CellValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::Text(s) => serde_json::Value::String(s.clone()),
            CellValue::Blob(b) => serde_json::json!({ "blob": b }),
        }
    }

    /// Inverse of [`CellValue::to_json`]; nested arrays/objects are kept as JSON text.
    pub fn from_json(v: &serde_json::Value) -> CellValue {
        match v {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => CellValue::Integer(i),
                None => CellValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => CellValue::Text(s.clone()),
            serde_json::Value::Object(map) if map.len() == 1 => match map.get("blob") {
                Some(serde_json::Value::Array(bytes)) => {
                    let decoded: Option<Vec<u8>> = bytes
                        .iter()
                        .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                        .collect();
                    match decoded {
                        Some(bytes) => CellValue::Blob(bytes),
                        None => CellValue::Text(v.to_string()),
                    }
                }
                _ => CellValue::Text(v.to_string()),
            },
            other => CellValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Text(s) => write!(f, "'{s}'"),
            other => write!(f, "{}", other.to_display_string()),
        }
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Integer(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Integer(v.into())
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Number(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v)
    }
}

impl From<Vec<u8>> for CellValue {
    fn from(v: Vec<u8>) -> Self {
        CellValue::Blob(v)
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// One named value in a [`Row`], with the timestamp it was recorded at.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub value: CellValue,
    pub ts: Timestamp,
}

/// Sparse row: an ordered mapping of column name to value.
///
/// A column that was never set is *absent* (`get` returns `None`), which is
/// distinct from a column holding [`CellValue::Null`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<Column>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.column(name).map(|c| &c.value)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Sets `name`, replacing an existing value in place (keeps column order).
    pub fn set(&mut self, name: impl Into<String>, value: CellValue, ts: Timestamp) {
        let name = name.into();
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => {
                existing.value = value;
                existing.ts = ts;
            }
            None => self.columns.push(Column { name, value, ts }),
        }
    }

    /// Sets `name` only if it is absent; returns whether the value was stored.
    pub fn set_if_absent(&mut self, name: &str, value: CellValue, ts: Timestamp) -> bool {
        if self.contains(name) {
            return false;
        }
        self.columns.push(Column {
            name: name.to_string(),
            value,
            ts,
        });
        true
    }

    pub fn remove(&mut self, name: &str) -> Option<CellValue> {
        let idx = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(idx).value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Latest timestamp across all columns, or 0 for an empty row.
    pub fn latest_ts(&self) -> Timestamp {
        self.columns.iter().map(|c| c.ts).max().unwrap_or(0)
    }

    /// Builds a row from `(name, value)` pairs, all stamped with `ts`.
    pub fn from_pairs<I, K, V>(pairs: I, ts: Timestamp) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<CellValue>,
    {
        let mut row = Row::new();
        for (k, v) in pairs {
            row.set(k, v.into(), ts);
        }
        row
    }

    pub fn to_json_object(&self) -> serde_json::Value {
        let map = self
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.value.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl IntoIterator for Row {
    type Item = Column;
    type IntoIter = std::vec::IntoIter<Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_render_without_fraction() {
        assert_eq!(CellValue::Integer(10).to_json(), serde_json::json!(10));
        assert_eq!(CellValue::Number(2.5).to_json(), serde_json::json!(2.5));
        assert_eq!(CellValue::Number(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(CellValue::Number(10.0).to_display_string(), "10");
    }

    #[test]
    fn json_round_trip_keeps_integer_kind() {
        assert_eq!(
            CellValue::from_json(&serde_json::json!(6)),
            CellValue::Integer(6)
        );
        assert_eq!(
            CellValue::from_json(&serde_json::json!(0.5)),
            CellValue::Number(0.5)
        );
        assert_eq!(
            CellValue::from_json(&serde_json::json!({ "blob": [1, 2] })),
            CellValue::Blob(vec![1, 2])
        );
    }

    #[test]
    fn sort_order_is_total_across_types() {
        let mut vals = vec![
            CellValue::Text("b".into()),
            CellValue::Integer(3),
            CellValue::Null,
            CellValue::Number(2.5),
            CellValue::Bool(true),
        ];
        vals.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            vals,
            vec![
                CellValue::Null,
                CellValue::Bool(true),
                CellValue::Number(2.5),
                CellValue::Integer(3),
                CellValue::Text("b".into()),
            ]
        );
    }

    #[test]
    fn absent_differs_from_null() {
        let mut row = Row::new();
        row.set("a", CellValue::Null, 1);
        assert_eq!(row.get("a"), Some(&CellValue::Null));
        assert_eq!(row.get("b"), None);
        assert!(!row.set_if_absent("a", CellValue::Integer(1), 2));
        assert!(row.set_if_absent("b", CellValue::Integer(1), 2));
        assert_eq!(row.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(row.latest_ts(), 2);
    }
}
