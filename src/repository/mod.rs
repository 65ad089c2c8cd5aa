use serde_json::Value;

use crate::domain::record::{Record, RecordId};
use crate::error::{CoreError, CoreResult};

pub mod dataset;
pub mod jsonl;
pub mod snapshot;

pub use dataset::Dataset;

pub trait RecordReader {
    /// Fetch a live record; dead or unknown ids fail with `NotFound`.
    fn get(&self, id: RecordId) -> CoreResult<&Record>;

    fn is_live(&self, id: RecordId) -> bool;

    /// Live ids in ascending order.
    fn live_ids(&self) -> Vec<RecordId>;

    fn live_count(&self) -> usize;

    /// Schema-on-read access to a designated text field.
    fn text(&self, id: RecordId, field: &str) -> CoreResult<&str> {
        let record = self.get(id)?;
        match record.field(field) {
            Some(Value::String(text)) => Ok(text.as_str()),
            Some(other) => Err(CoreError::invalid(format!(
                "field `{field}` of record {id} is not text (found {})",
                value_kind(other)
            ))),
            None => Err(CoreError::invalid(format!(
                "field `{field}` is missing from record {id}"
            ))),
        }
    }
}

pub trait RecordWriter {
    fn set_field(&mut self, id: RecordId, name: &str, value: Value) -> CoreResult<()>;
    fn remove(&mut self, id: RecordId) -> CoreResult<()>;
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
