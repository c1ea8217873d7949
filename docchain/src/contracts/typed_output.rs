//! Typed views over validated records.
//!
//! Validated records are plain JSON. Callers that know the shape of a
//! contract can decode records into their own serde types.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::validate::ValidatedRecord;
use crate::errors::DocchainError;

/// A Rust type mirroring a registered contract.
pub trait ContractRecord: Serialize + DeserializeOwned {
    /// The contract this type mirrors.
    const CONTRACT: &'static str;
}

/// Decodes a JSON value into `T`, attributing failures to `artifact`.
///
/// # Errors
///
/// Returns [`DocchainError::Decode`] when the value does not fit `T`.
pub fn decode_value<T: DeserializeOwned>(artifact: &str, value: &Value) -> Result<T, DocchainError> {
    T::deserialize(value).map_err(|e| DocchainError::Decode {
        artifact: artifact.to_string(),
        message: e.to_string(),
    })
}

/// Decodes a validated record into its mirror type.
///
/// # Errors
///
/// Fails when the record belongs to a different contract or does not fit `T`.
pub fn decode_record<T: ContractRecord>(record: &ValidatedRecord) -> Result<T, DocchainError> {
    if record.contract() != T::CONTRACT {
        return Err(DocchainError::Decode {
            artifact: record.contract().to_string(),
            message: format!(
                "record conforms to '{}', expected '{}'",
                record.contract(),
                T::CONTRACT
            ),
        });
    }
    decode_value(T::CONTRACT, record.value())
}

/// Extracts a text field from a record-shaped value.
#[must_use]
pub fn text_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}
