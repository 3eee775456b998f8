//! Scripted `StructuredGenerator` for tests. Responses are keyed by schema name,
//! optionally delayed, and every call is recorded in order.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::schema::OutputSchema;
use super::{LlmError, StructuredGenerator};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub schema: String,
    pub prompt: String,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
struct Script {
    delay: Duration,
    outcome: Result<Value, String>,
}

#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<RecordedCall>>,
    events: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, schema: &str, value: Value) -> Self {
        self.respond_after(schema, Duration::ZERO, value)
    }

    pub fn respond_after(mut self, schema: &str, delay: Duration, value: Value) -> Self {
        self.scripts.insert(
            schema.to_string(),
            Script {
                delay,
                outcome: Ok(value),
            },
        );
        self
    }

    pub fn fail(self, schema: &str, message: &str) -> Self {
        self.fail_after(schema, Duration::ZERO, message)
    }

    pub fn fail_after(mut self, schema: &str, delay: Duration, message: &str) -> Self {
        self.scripts.insert(
            schema.to_string(),
            Script {
                delay,
                outcome: Err(message.to_string()),
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, schema: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.schema == schema)
            .count()
    }

    pub fn prompt_for(&self, schema: &str) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.schema == schema)
            .map(|c| c.prompt.clone())
    }

    /// `start:<schema>` / `end:<schema>` markers in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl StructuredGenerator for ScriptedGenerator {
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &OutputSchema,
        temperature: f32,
    ) -> Result<Value, LlmError> {
        let name = schema.name().to_string();
        self.calls.lock().unwrap().push(RecordedCall {
            schema: name.clone(),
            prompt: prompt.to_string(),
            temperature,
        });
        self.events.lock().unwrap().push(format!("start:{name}"));

        let script = self
            .scripts
            .get(&name)
            .cloned()
            .ok_or_else(|| LlmError::Provider(format!("no scripted response for '{name}'")))?;

        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        self.events.lock().unwrap().push(format!("end:{name}"));

        let value = script.outcome.map_err(LlmError::Provider)?;
        schema.validate(&value)?;
        Ok(value)
    }
}
