//! Values published for downstream references

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A produced payload that can be re-read by result slot
///
/// The runtime keeps the payload itself and the slot index, never a detached
/// copy, so one aggregate can back several referents.
pub trait Referent: Send + Sync + fmt::Debug {
    /// The value exposed in slot `which`
    fn referred_value(&self, which: usize) -> Option<Value>;
}

/// A plain value is the same in every slot
impl Referent for Value {
    fn referred_value(&self, _which: usize) -> Option<Value> {
        if self.is_null() {
            None
        } else {
            Some(self.clone())
        }
    }
}

/// Exposes named fields of one object by slot index
///
/// Slot `i` resolves to `source[fields[i]]`; a slot past the field list
/// resolves to the whole object.
#[derive(Debug, Clone)]
pub struct FieldReferent {
    source: Arc<Value>,
    fields: Arc<[String]>,
}

impl FieldReferent {
    /// Expose `fields[i]` of `source` as slot `i`
    pub fn new(source: Arc<Value>, fields: Arc<[String]>) -> Self {
        Self { source, fields }
    }

    /// Payload the fields are read from
    pub fn source(&self) -> &Value {
        &self.source
    }
}

impl Referent for FieldReferent {
    fn referred_value(&self, which: usize) -> Option<Value> {
        match self.fields.get(which) {
            Some(field) => self.source.get(field.as_str()).cloned(),
            None => Some((*self.source).clone()),
        }
    }
}
