//! Schema contract declarations.
//!
//! A contract is pure data shape. Generation guidance lives in the optional
//! field descriptions and never affects validation.

use crate::errors::{codes, PipelineValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The kind of value a field holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text. Numbers and booleans are accepted and stringified.
    Text,
    /// A nested record conforming to another registered contract.
    Record {
        /// The nested contract name.
        contract: String,
    },
    /// One of a fixed set of strings, matched exactly.
    Choice {
        /// The allowed values.
        choices: Vec<String>,
    },
    /// A homogeneous list.
    List {
        /// The kind of each item.
        item: Box<FieldKind>,
    },
}

impl FieldKind {
    /// A nested record kind.
    #[must_use]
    pub fn record(contract: impl Into<String>) -> Self {
        Self::Record {
            contract: contract.into(),
        }
    }

    /// An enumerated choice kind.
    #[must_use]
    pub fn choice<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Choice {
            choices: choices.into_iter().map(Into::into).collect(),
        }
    }

    /// A list kind.
    #[must_use]
    pub fn list(item: Self) -> Self {
        Self::List {
            item: Box::new(item),
        }
    }

    /// Short name used in descriptors and error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Record { .. } => "record",
            Self::Choice { .. } => "choice",
            Self::List { .. } => "list",
        }
    }

    /// Appends every contract this kind references, depth-first.
    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Record { contract } => out.push(contract),
            Self::List { item } => item.collect_references(out),
            Self::Text | Self::Choice { .. } => {}
        }
    }
}

/// A single named field of a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Field name, unique within its contract.
    pub name: String,
    /// Value kind.
    pub kind: FieldKind,
    /// Generation hint, ignored by validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the field must be present.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl SchemaField {
    /// Creates a required field of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            required: true,
        }
    }

    /// A required text field.
    #[must_use]
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    /// A required nested-record field.
    #[must_use]
    pub fn record(name: impl Into<String>, contract: impl Into<String>) -> Self {
        Self::new(name, FieldKind::record(contract))
    }

    /// A required enumerated-choice field.
    #[must_use]
    pub fn choice<I, S>(name: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, FieldKind::choice(choices))
    }

    /// A required list field.
    #[must_use]
    pub fn list(name: impl Into<String>, item: FieldKind) -> Self {
        Self::new(name, FieldKind::list(item))
    }

    /// Attaches a generation hint.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks the field optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// A named, ordered set of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContract {
    /// Contract name.
    pub name: String,
    /// Generation hint for the whole record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Fields in declaration order.
    pub fields: Vec<SchemaField>,
}

impl SchemaContract {
    /// Creates an empty contract.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: Vec::new(),
        }
    }

    /// Appends a field.
    #[must_use]
    pub fn field(mut self, field: SchemaField) -> Self {
        self.fields.push(field);
        self
    }

    /// Attaches a generation hint.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field names in declaration order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Every contract referenced by this contract's fields.
    #[must_use]
    pub fn referenced_contracts(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        for field in &self.fields {
            field.kind.collect_references(&mut refs);
        }
        refs
    }

    /// Checks the contract in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty name, duplicate field names, or an
    /// empty choice domain.
    pub fn validate_shape(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::coded(
                codes::INVALID_CONTRACT,
                "Contract name cannot be empty",
            ));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(PipelineValidationError::coded(
                    codes::INVALID_CONTRACT,
                    format!(
                        "Contract '{}' declares field '{}' more than once",
                        self.name, field.name
                    ),
                ));
            }
            if let Some(empty) = find_empty_choice(&field.kind) {
                return Err(PipelineValidationError::coded(
                    codes::INVALID_CONTRACT,
                    format!(
                        "Field '{}.{}' has an empty {} domain",
                        self.name,
                        field.name,
                        empty.type_name()
                    ),
                ));
            }
        }
        Ok(())
    }
}

fn find_empty_choice(kind: &FieldKind) -> Option<&FieldKind> {
    match kind {
        FieldKind::Choice { choices } if choices.is_empty() => Some(kind),
        FieldKind::List { item } => find_empty_choice(item),
        _ => None,
    }
}
