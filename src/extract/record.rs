//! Records and schemas
//!
//! A [`Schema`] is the ordered list of field names an extractor declares before
//! the sweep. Every [`Record`] carries a shared handle to that schema and exactly
//! one value per field, so a record can never hold extra or missing keys.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised inside extractors
///
/// The fetcher converts every one of these into `PermanentError(extract)`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("field '{0}' is not part of the schema")]
    UnknownField(String),

    #[error("field '{0}' was never set")]
    MissingField(String),

    #[error("malformed body: {0}")]
    Malformed(String),

    #[error("invalid selector: {0}")]
    Selector(String),

    #[error("record schema does not match the extractor schema")]
    SchemaMismatch,

    #[error("extractor panicked: {0}")]
    Panicked(String),
}

/// Ordered, fixed set of field names for one sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Schema {
    fields: Vec<String>,
}

impl Schema {
    pub fn new(fields: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn position(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }
}

/// Starts a record for the given schema
pub fn builder(schema: &Arc<Schema>) -> RecordBuilder {
    RecordBuilder {
        schema: Arc::clone(schema),
        values: vec![None; schema.len()],
    }
}

/// One flat output row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<String>,
}

impl Record {
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.schema
            .position(field)
            .map(|index| self.values[index].as_str())
    }

    pub fn into_values(self) -> Vec<String> {
        self.values
    }
}

/// Incrementally fills a record; unknown names and unset fields are errors
#[derive(Debug)]
pub struct RecordBuilder {
    schema: Arc<Schema>,
    values: Vec<Option<String>>,
}

impl RecordBuilder {
    pub fn set(mut self, field: &str, value: impl Into<String>) -> Result<Self, ExtractError> {
        let index = self
            .schema
            .position(field)
            .ok_or_else(|| ExtractError::UnknownField(field.to_string()))?;
        self.values[index] = Some(value.into());
        Ok(self)
    }

    pub fn finish(self) -> Result<Record, ExtractError> {
        let mut values = Vec::with_capacity(self.values.len());
        for (field, value) in self.schema.fields().iter().zip(self.values) {
            values.push(value.ok_or_else(|| ExtractError::MissingField(field.clone()))?);
        }
        Ok(Record {
            schema: self.schema,
            values,
        })
    }
}
