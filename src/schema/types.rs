// src/schema/types.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::{fmt, str::FromStr};

/// Name of the system-generated row identifier field. Never a user column.
pub const ID_COLUMN: &str = "ID#";

/// Name under which an item's category is stored. Also never a user column.
pub const CATEGORY_FIELD: &str = "Category";

/// Whether `name` is taken by a system field.
pub fn is_reserved(name: &str) -> bool {
    name == ID_COLUMN || name == CATEGORY_FIELD
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
const DATE_OUT: &str = "%Y-%m-%d";

/// Declared type of a column. Each variant owns its default and coercion rule.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Boolean,
    Dropdown,
}

/// A single user-declared column.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    /// Allowed values for `dropdown` columns. Empty means unrestricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            options: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// Coerce `raw` to this column's type, naming the column on failure.
    pub fn coerce(&self, raw: &Value) -> Result<Value, String> {
        let value = self.ty.coerce(raw)?;
        if self.ty == ColumnType::Dropdown && !self.options.is_empty() {
            if let Value::String(s) = &value {
                if !s.is_empty() && !self.options.iter().any(|o| o == s) {
                    return Err(format!(
                        "`{}` is not one of {:?}",
                        s, self.options
                    ));
                }
            }
        }
        Ok(value)
    }
}

impl ColumnType {
    pub const ALL: [ColumnType; 5] = [
        ColumnType::Text,
        ColumnType::Number,
        ColumnType::Date,
        ColumnType::Boolean,
        ColumnType::Dropdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Date => "date",
            ColumnType::Boolean => "boolean",
            ColumnType::Dropdown => "dropdown",
        }
    }

    /// Value a row receives for this column when none was supplied.
    pub fn default_value(&self) -> Value {
        match self {
            ColumnType::Text | ColumnType::Dropdown => Value::String(String::new()),
            ColumnType::Number => number(0.0).unwrap_or(Value::Null),
            ColumnType::Date | ColumnType::Boolean => Value::Null,
        }
    }

    /// Strict coercion used when a caller supplies a value.
    ///
    /// Unambiguous scalars are converted (numeric string to number, "yes" to
    /// true, ...); anything else is rejected with a reason.
    pub fn coerce(&self, raw: &Value) -> Result<Value, String> {
        if is_blank(raw) {
            return Ok(self.default_value());
        }
        match (self, raw) {
            (ColumnType::Text | ColumnType::Dropdown, Value::String(_)) => Ok(raw.clone()),
            (ColumnType::Text | ColumnType::Dropdown, Value::Number(n)) => {
                Ok(Value::String(n.to_string()))
            }
            (ColumnType::Text | ColumnType::Dropdown, Value::Bool(b)) => {
                Ok(Value::String(b.to_string()))
            }

            (ColumnType::Number, Value::Number(n)) => n
                .as_f64()
                .and_then(number)
                .ok_or_else(|| format!("{} is not a finite number", n)),
            (ColumnType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(number)
                .ok_or_else(|| format!("`{}` is not a number", s)),

            (ColumnType::Date, Value::String(s)) => parse_date(s)
                .map(|d| Value::String(d.format(DATE_OUT).to_string()))
                .ok_or_else(|| format!("`{}` is not a YYYY-MM-DD date", s)),

            (ColumnType::Boolean, Value::Bool(_)) => Ok(raw.clone()),
            (ColumnType::Boolean, Value::String(s)) => parse_bool(s)
                .map(Value::Bool)
                .ok_or_else(|| format!("`{}` is not a boolean", s)),
            (ColumnType::Boolean, Value::Number(n)) => match n.as_f64() {
                Some(x) if x == 0.0 => Ok(Value::Bool(false)),
                Some(x) if x == 1.0 => Ok(Value::Bool(true)),
                _ => Err(format!("{} is not a boolean", n)),
            },

            (ty, other) => Err(format!("{} cannot hold {}", ty, kind(other))),
        }
    }

    /// Lenient decoding of a persisted text cell (CSV). Never fails: a cell
    /// that does not parse under the declared type is kept as text, which is
    /// what a reader sees after a retype until the row is rewritten.
    pub fn decode_cell(&self, cell: &str) -> Value {
        if cell.is_empty() {
            return match self {
                ColumnType::Date | ColumnType::Boolean => Value::Null,
                _ => Value::String(String::new()),
            };
        }
        match self {
            ColumnType::Number => cell
                .parse::<f64>()
                .ok()
                .and_then(number)
                .unwrap_or_else(|| Value::String(cell.to_string())),
            ColumnType::Boolean => parse_bool(cell)
                .map(Value::Bool)
                .unwrap_or_else(|| Value::String(cell.to_string())),
            ColumnType::Text | ColumnType::Date | ColumnType::Dropdown => {
                Value::String(cell.to_string())
            }
        }
    }

    /// Re-read a value that may have come from a text cell decoded under
    /// another type. Non-string values pass through untouched.
    pub fn redecode(&self, value: Value) -> Value {
        match value {
            Value::String(s) => self.decode_cell(&s),
            other => other,
        }
    }
}

/// Render a stored value as a text cell. `null` becomes the empty cell.
pub fn encode_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ColumnType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| {
                format!(
                    "unknown column type `{}` (expected one of text, number, date, boolean, dropdown)",
                    s
                )
            })
    }
}

fn number(x: f64) -> Option<Value> {
    Number::from_f64(x).map(Value::Number)
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
