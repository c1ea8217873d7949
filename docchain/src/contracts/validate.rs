//! Recursive validation of JSON values against registered contracts.

use super::registry::ContractRegistry;
use super::schema::{FieldKind, SchemaContract};
use crate::errors::SchemaViolation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A value that fully conforms to a contract.
///
/// Only fields declared by the contract survive validation, and text fields
/// hold strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedRecord {
    contract: String,
    value: Value,
}

impl ValidatedRecord {
    /// The contract this record conforms to.
    #[must_use]
    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// The validated object.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// A top-level field of the record.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.value.get(name)
    }

    /// Consumes the record, returning the validated object.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }
}

/// Validates `value` against the named contract.
///
/// Validation is atomic: either the whole value conforms and a
/// [`ValidatedRecord`] is returned, or the first violation found is reported
/// with the path of the offending field.
///
/// # Errors
///
/// Returns a [`SchemaViolation`] naming the field path (`$` for the root).
pub fn validate(
    registry: &ContractRegistry,
    contract: &str,
    value: &Value,
) -> Result<ValidatedRecord, SchemaViolation> {
    let validator = Validator {
        registry,
        root: contract,
    };
    let schema = validator.lookup(contract, "")?;
    let value = validator.record(&schema, value, "")?;
    Ok(ValidatedRecord {
        contract: contract.to_string(),
        value,
    })
}

struct Validator<'a> {
    registry: &'a ContractRegistry,
    root: &'a str,
}

impl Validator<'_> {
    fn violation(&self, path: &str, message: impl Into<String>) -> SchemaViolation {
        let path = if path.is_empty() { "$" } else { path };
        SchemaViolation::new(self.root, path, message)
    }

    fn lookup(
        &self,
        name: &str,
        path: &str,
    ) -> Result<std::sync::Arc<SchemaContract>, SchemaViolation> {
        self.registry
            .get(name)
            .ok_or_else(|| self.violation(path, format!("contract '{name}' is not registered")))
    }

    fn record(
        &self,
        contract: &SchemaContract,
        value: &Value,
        path: &str,
    ) -> Result<Value, SchemaViolation> {
        let Value::Object(input) = value else {
            return Err(self.violation(
                path,
                format!(
                    "expected an object for contract '{}', found {}",
                    contract.name,
                    json_type(value)
                ),
            ));
        };

        let mut output = Map::new();
        for field in &contract.fields {
            let field_path = if path.is_empty() {
                field.name.clone()
            } else {
                format!("{path}.{}", field.name)
            };

            match input.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(self.violation(&field_path, "required field is missing"));
                    }
                }
                Some(raw) => {
                    let checked = self.kind(&field.kind, raw, &field_path)?;
                    output.insert(field.name.clone(), checked);
                }
            }
        }
        Ok(Value::Object(output))
    }

    fn kind(&self, kind: &FieldKind, value: &Value, path: &str) -> Result<Value, SchemaViolation> {
        match kind {
            FieldKind::Text => match value {
                Value::String(s) => Ok(Value::String(s.clone())),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                other => Err(self.violation(
                    path,
                    format!("expected text, found {}", json_type(other)),
                )),
            },
            FieldKind::Choice { choices } => match value {
                Value::String(s) if choices.iter().any(|c| c == s) => Ok(value.clone()),
                Value::String(s) => Err(self.violation(
                    path,
                    format!("'{s}' is not one of [{}]", choices.join(", ")),
                )),
                other => Err(self.violation(
                    path,
                    format!("expected one of [{}], found {}", choices.join(", "), json_type(other)),
                )),
            },
            FieldKind::Record { contract } => {
                let nested = self.lookup(contract, path)?;
                self.record(&nested, value, path)
            }
            FieldKind::List { item } => {
                let Value::Array(items) = value else {
                    return Err(self.violation(
                        path,
                        format!("expected a list, found {}", json_type(value)),
                    ));
                };
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| self.kind(item, v, &format!("{path}[{i}]")))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
