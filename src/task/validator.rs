use serde_json::Value;

use crate::Event;
use crate::OperationKind;

/// Event shape check run before an event is batched. Failing events are
/// dropped with a warning.
pub trait EventValidator: Send + Sync + 'static {
    fn validate(
        &self,
        event: &Event,
    ) -> std::result::Result<(), String>;
}

/// Requires the document to be an object carrying every named field with a
/// non-null value.
#[derive(Debug, Clone)]
pub struct RequiredFields {
    fields: Vec<String>,
}

impl RequiredFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl EventValidator for RequiredFields {
    fn validate(
        &self,
        event: &Event,
    ) -> std::result::Result<(), String> {
        if event.operation == OperationKind::Invalidate {
            return Ok(());
        }
        let Value::Object(doc) = event.document.as_ref() else {
            return Err(format!("document is not an object: {}", event.document));
        };
        for field in &self.fields {
            match doc.get(field) {
                None | Some(Value::Null) => return Err(format!("missing required field {field}")),
                Some(_) => {}
            }
        }
        Ok(())
    }
}
