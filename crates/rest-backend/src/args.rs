//! Tool argument shapes shared by the HTTP endpoints and the streaming dispatcher.

use crate::error::{BackendError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arguments of `supabase_select`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectArgs {
    pub table: String,
    /// Column projection. Defaults to `*`.
    #[serde(default = "default_projection")]
    pub select: String,
    /// Equality filters, applied in declaration order.
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_filters: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderBy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    /// Missing means descending.
    #[serde(default)]
    pub ascending: bool,
}

/// Arguments of `supabase_insert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertArgs {
    pub table: String,
    /// A JSON array of row objects, or a single row object.
    pub rows: Value,
    #[serde(default)]
    pub return_representation: bool,
}

fn default_projection() -> String {
    "*".to_string()
}

impl SelectArgs {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: default_projection(),
            match_filters: None,
            limit: None,
            order: None,
        }
    }

    /// Decode from an opaque tool-call argument object.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidArguments`] if `args` does not have the expected shape.
    pub fn from_value(args: Value) -> Result<Self> {
        decode_args(args)
    }
}

impl InsertArgs {
    /// Decode from an opaque tool-call argument object.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidArguments`] if `args` does not have the expected shape.
    pub fn from_value(args: Value) -> Result<Self> {
        decode_args(args)
    }

    /// Rows as the JSON array the data API expects.
    pub(crate) fn rows_array(&self) -> Result<Value> {
        match &self.rows {
            Value::Array(_) => Ok(self.rows.clone()),
            Value::Object(_) => Ok(Value::Array(vec![self.rows.clone()])),
            other => Err(BackendError::InvalidArguments(format!(
                "rows must be an array of objects, got {}",
                json_type_name(other)
            ))),
        }
    }
}

fn decode_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    let args = if args.is_null() {
        Value::Object(Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| BackendError::InvalidArguments(e.to_string()))
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
