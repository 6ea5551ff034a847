//! Operation documents.
//!
//! A document is JSON: either an array of root selections (one anonymous
//! operation) or an object mapping operation names to such arrays. A
//! selection is a field name or
//! `{"field": .., "alias": .., "args": {..}, "select": [..]}`. String
//! argument values of the form `"$name"` are bound to request variables.

use serde_json::{Map, Value};

use crate::error::{ResolveError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub field: String,
    pub alias: Option<String>,
    pub args: Map<String, Value>,
    pub select: Vec<Selection>,
}

impl Selection {
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            field: name.into(),
            alias: None,
            args: Map::new(),
            select: Vec::new(),
        }
    }

    /// Key under which the result appears in the response.
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field)
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::String(name) => Ok(Self::field(name.as_str())),
            Value::Object(map) => {
                let field = map
                    .get("field")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid("selection object needs a string \"field\""))?;
                let alias = match map.get("alias") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(alias)) => Some(alias.clone()),
                    Some(_) => return Err(invalid("\"alias\" must be a string")),
                };
                let args = match map.get("args") {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(args)) => args.clone(),
                    Some(_) => return Err(invalid("\"args\" must be an object")),
                };
                let select = match map.get("select") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(nested) => parse_selections(nested)?,
                };
                if let Some(unknown) = map
                    .keys()
                    .find(|k| !matches!(k.as_str(), "field" | "alias" | "args" | "select"))
                {
                    return Err(invalid(&format!("unknown selection key {unknown:?}")));
                }
                Ok(Self {
                    field: field.to_string(),
                    alias,
                    args,
                    select,
                })
            }
            other => Err(invalid(&format!("invalid selection {other}"))),
        }
    }

    fn bind(&self, variables: &Map<String, Value>) -> Self {
        Self {
            field: self.field.clone(),
            alias: self.alias.clone(),
            args: self
                .args
                .iter()
                .map(|(k, v)| (k.clone(), bind_value(v, variables)))
                .collect(),
            select: self.select.iter().map(|s| s.bind(variables)).collect(),
        }
    }
}

/// A parsed document holding one or more named operations.
#[derive(Debug, Clone)]
pub struct Document {
    operations: Vec<(Option<String>, Vec<Selection>)>,
}

impl Document {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| invalid(&format!("not valid JSON: {e}")))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let operations = match value {
            Value::Array(_) => vec![(None, parse_selections(value)?)],
            Value::Object(named) => named
                .iter()
                .map(|(name, body)| Ok((Some(name.clone()), parse_selections(body)?)))
                .collect::<Result<Vec<_>>>()?,
            Value::String(text) => return Self::parse(text),
            other => return Err(invalid(&format!("invalid document {other}"))),
        };
        if operations.is_empty() {
            return Err(invalid("document contains no operation"));
        }
        Ok(Self { operations })
    }

    /// Pick the operation to run and bind its variables.
    pub fn operation(&self, name: Option<&str>, variables: &Value) -> Result<Vec<Selection>> {
        let selections = match name {
            Some(name) => self
                .operations
                .iter()
                .find(|(op, _)| op.as_deref() == Some(name))
                .map(|(_, selections)| selections)
                .ok_or_else(|| invalid(&format!("unknown operation {name:?}")))?,
            None => match self.operations.as_slice() {
                [(_, selections)] => selections,
                _ => return Err(invalid("operationName is required for multi-operation documents")),
            },
        };

        let variables = match variables {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            _ => return Err(invalid("variables must be an object")),
        };
        Ok(selections.iter().map(|s| s.bind(&variables)).collect())
    }
}

fn parse_selections(value: &Value) -> Result<Vec<Selection>> {
    value
        .as_array()
        .ok_or_else(|| invalid("selections must be an array"))?
        .iter()
        .map(Selection::parse)
        .collect()
}

fn bind_value(value: &Value, variables: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => match variable_name(s) {
            Some(name) => variables.get(name).cloned().unwrap_or(Value::Null),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| bind_value(v, variables)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), bind_value(v, variables)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

fn variable_name(s: &str) -> Option<&str> {
    let name = s.strip_prefix('$')?;
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(name)
}

fn invalid(message: &str) -> ResolveError {
    ResolveError::Document(message.to_string())
}
