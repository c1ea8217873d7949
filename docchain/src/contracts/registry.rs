//! In-memory registry of schema contracts.

use super::schema::{FieldKind, SchemaContract};
use crate::errors::{codes, PipelineValidationError};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Thread-safe registry of named contracts.
///
/// Nested record fields may only reference contracts that are already
/// registered, so the reference graph between contracts is acyclic by
/// construction.
#[derive(Debug, Default)]
pub struct ContractRegistry {
    entries: RwLock<HashMap<String, Arc<SchemaContract>>>,
    order: RwLock<Vec<String>>,
}

impl ContractRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a contract.
    ///
    /// Re-registering an identical contract is a no-op.
    ///
    /// # Errors
    ///
    /// Fails when the contract is malformed, references an unregistered
    /// contract, or conflicts with an existing contract of the same name.
    pub fn register(
        &self,
        contract: SchemaContract,
    ) -> Result<Arc<SchemaContract>, PipelineValidationError> {
        contract.validate_shape()?;

        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&contract.name) {
            if **existing == contract {
                return Ok(Arc::clone(existing));
            }
            return Err(PipelineValidationError::coded(
                codes::CONTRACT_CONFLICT,
                format!(
                    "Contract '{}' is already registered with a different shape",
                    contract.name
                ),
            ));
        }

        if let Some(missing) = contract
            .referenced_contracts()
            .into_iter()
            .find(|name| !entries.contains_key(*name))
        {
            return Err(PipelineValidationError::coded(
                codes::UNKNOWN_CONTRACT,
                format!(
                    "Contract '{}' references unregistered contract '{missing}'",
                    contract.name
                ),
            ));
        }

        let name = contract.name.clone();
        let contract = Arc::new(contract);
        entries.insert(name.clone(), Arc::clone(&contract));
        self.order.write().push(name);
        Ok(contract)
    }

    /// Registers several contracts in order.
    ///
    /// # Errors
    ///
    /// Stops at the first contract that fails to register.
    pub fn register_all<I>(&self, contracts: I) -> Result<(), PipelineValidationError>
    where
        I: IntoIterator<Item = SchemaContract>,
    {
        for contract in contracts {
            self.register(contract)?;
        }
        Ok(())
    }

    /// Looks up a contract by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<SchemaContract>> {
        self.entries.read().get(name).cloned()
    }

    /// Looks up a contract, failing with a coded error when it is absent.
    ///
    /// # Errors
    ///
    /// Returns an `UNKNOWN_CONTRACT` error.
    pub fn require(&self, name: &str) -> Result<Arc<SchemaContract>, PipelineValidationError> {
        self.get(name).ok_or_else(|| {
            PipelineValidationError::coded(
                codes::UNKNOWN_CONTRACT,
                format!("Contract '{name}' is not registered"),
            )
        })
    }

    /// Returns true when a contract with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Registered contract names in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.order.read().clone()
    }

    /// Number of registered contracts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Renders a JSON description of a contract with nested contracts inlined.
    ///
    /// # Errors
    ///
    /// Returns an `UNKNOWN_CONTRACT` error when the contract is absent.
    pub fn descriptor(&self, name: &str) -> Result<Value, PipelineValidationError> {
        let contract = self.require(name)?;
        let entries = self.entries.read();
        Ok(describe_contract(&contract, &entries))
    }
}

fn describe_contract(contract: &SchemaContract, entries: &HashMap<String, Arc<SchemaContract>>) -> Value {
    let fields: Vec<Value> = contract
        .fields
        .iter()
        .map(|field| {
            let mut obj = describe_kind(&field.kind, entries);
            obj.insert("name".to_string(), json!(field.name));
            obj.insert("required".to_string(), json!(field.required));
            if let Some(description) = &field.description {
                obj.insert("description".to_string(), json!(description));
            }
            Value::Object(obj)
        })
        .collect();

    let mut obj = Map::new();
    obj.insert("contract".to_string(), json!(contract.name));
    if let Some(description) = &contract.description {
        obj.insert("description".to_string(), json!(description));
    }
    obj.insert("fields".to_string(), Value::Array(fields));
    Value::Object(obj)
}

fn describe_kind(kind: &FieldKind, entries: &HashMap<String, Arc<SchemaContract>>) -> Map<String, Value> {
    let mut obj = Map::new();
    obj.insert("type".to_string(), json!(kind.type_name()));
    match kind {
        FieldKind::Text => {}
        FieldKind::Choice { choices } => {
            obj.insert("choices".to_string(), json!(choices));
        }
        FieldKind::Record { contract } => {
            let nested = entries
                .get(contract)
                .map_or(Value::Null, |c| describe_contract(c, entries));
            obj.insert("schema".to_string(), nested);
        }
        FieldKind::List { item } => {
            obj.insert("items".to_string(), Value::Object(describe_kind(item, entries)));
        }
    }
    obj
}
