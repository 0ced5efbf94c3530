//! Remote form-submission store, fronting a Cognito-Forms-style HTTP API.
//!
//! Entries arrive as JSON objects with a store-assigned `Id`, an `Entry`
//! metadata block (`DateUpdated`, `Status`), and the booking fields at the
//! top level. Outgoing writes wrap the fields in the API's `Entry.Action`
//! envelope. `ID`, `Last Updated`, and `Status` are store-assigned on this
//! side and never sent back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client as HttpClient, StatusCode};
use serde_json::{json, Map, Value};

use super::RecordStore;
use crate::error::StoreError;
use crate::record::{
    FieldChanges, FieldValue, Record, RecordSet, FIELD_ID, FIELD_LAST_UPDATED, FIELD_STATUS,
};

/// Top-level entry keys that are metadata, not booking fields.
const META_KEYS: [&str; 2] = ["Id", "Entry"];

pub struct FormsStore {
    http: HttpClient,
    api_key: String,
    form_id: String,
    base_url: String,
}

impl FormsStore {
    pub fn new(
        api_key: impl Into<String>,
        form_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http: HttpClient::new(),
            api_key: api_key.into(),
            form_id: form_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn entries_url(&self) -> String {
        format!("{}/forms/{}/entries", self.base_url, self.form_id)
    }

    fn entry_url(&self, id: &str) -> String {
        format!("{}/{}", self.entries_url(), id)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Api {
            status: status.as_u16(),
            body,
        })
    }

    fn entry_to_record(entry: &Value) -> Result<Record, StoreError> {
        let obj = entry
            .as_object()
            .ok_or_else(|| StoreError::Payload(format!("entry is not an object: {entry}")))?;

        let mut record = Record::new();

        match obj.get("Id") {
            Some(Value::String(s)) if !s.is_empty() => {
                record.set(FIELD_ID, FieldValue::text(s.as_str()))
            }
            Some(Value::Number(n)) => record.set(FIELD_ID, FieldValue::text(n.to_string())),
            _ => {}
        }

        if let Some(meta) = obj.get("Entry").and_then(Value::as_object) {
            if let Some(updated) = meta.get("DateUpdated") {
                record.set(FIELD_LAST_UPDATED, json_to_field(updated));
            }
            if let Some(status) = meta.get("Status") {
                record.set(FIELD_STATUS, json_to_field(status));
            }
        }

        for (key, value) in obj {
            if !META_KEYS.contains(&key.as_str()) {
                record.set(key.clone(), json_to_field(value));
            }
        }

        Ok(record)
    }

    /// Build an API payload: the `Entry.Action` envelope plus the given
    /// fields, with the store-assigned columns filtered out.
    fn payload<'a>(
        action: &str,
        fields: impl Iterator<Item = (&'a str, &'a FieldValue)>,
    ) -> Value {
        let mut body = Map::new();
        body.insert(
            "Entry".to_string(),
            json!({ "Action": action, "Role": "Internal" }),
        );
        for (name, value) in fields {
            if name == FIELD_ID || name == FIELD_LAST_UPDATED || name == FIELD_STATUS {
                continue;
            }
            body.insert(name.to_string(), field_to_json(value));
        }
        Value::Object(body)
    }
}

fn json_to_field(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Absent,
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) => FieldValue::Number(f),
            None => FieldValue::text(n.to_string()),
        },
        Value::String(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(ts) => FieldValue::Timestamp(ts.with_timezone(&Utc)),
            Err(_) => FieldValue::text(s.as_str()),
        },
        // Nested sections/repeating fields are carried opaquely as JSON text.
        other => FieldValue::text(other.to_string()),
    }
}

fn field_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(s) => Value::String(s.clone()),
        FieldValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        FieldValue::Bool(b) => Value::Bool(*b),
        FieldValue::Timestamp(ts) => Value::String(ts.to_rfc3339()),
        FieldValue::Absent => Value::Null,
    }
}

#[async_trait]
impl RecordStore for FormsStore {
    fn store_name(&self) -> &str {
        "forms"
    }

    async fn list_records(&self) -> Result<RecordSet, StoreError> {
        let response = self
            .http
            .get(self.entries_url())
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let entries: Vec<Value> = response
            .json()
            .await
            .map_err(|e| StoreError::Payload(e.to_string()))?;

        entries.iter().map(Self::entry_to_record).collect()
    }

    // The entries endpoint has no modified-since filter, so the trait default
    // (full enumeration) applies.

    async fn apply_patch(&self, id: &str, changes: &FieldChanges) -> Result<(), StoreError> {
        let body = Self::payload("Update", changes.iter().map(|(k, v)| (k.as_str(), v)));
        let response = self
            .http
            .patch(self.entry_url(id))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn insert_record(&self, record: &Record) -> Result<String, StoreError> {
        let body = Self::payload(
            "Submit",
            record.fields().filter(|(_, value)| !value.is_absent()),
        );
        let response = self
            .http
            .post(self.entries_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let created: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Payload(e.to_string()))?;
        match created.get("Id") {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(StoreError::Payload(format!(
                "create response missing Id: {created}"
            ))),
        }
    }

    async fn delete_record(&self, id: &str) -> Result<(), StoreError> {
        let response = self
            .http
            .delete(self.entry_url(id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        // Idempotent: the entry being gone already is success.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check_status(response).await?;
        Ok(())
    }
}
