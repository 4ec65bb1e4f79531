// src/rows/types.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Column name → value for one record.
pub type Values = BTreeMap<String, Value>;

/// One inventory record. The identifier is generated on insert and never
/// changes; it is stored under the reserved `ID#` field. `category` is empty
/// for items added outside any category.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Row {
    #[serde(rename = "ID#")]
    pub id: String,
    #[serde(rename = "Category", default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(flatten)]
    pub values: Values,
}

impl Row {
    pub fn new(id: impl Into<String>, values: Values) -> Self {
        Self {
            id: id.into(),
            category: String::new(),
            values,
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }
}
