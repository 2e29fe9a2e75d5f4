//! CloudEvents v1.0 envelope.
//!
//! [`Event`] owns every attribute and its payload, so `clone()` produces a copy
//! that can be mutated freely without affecting the original. The delivery
//! path depends on this: it strips and decrements bookkeeping extensions on a
//! working copy while the original stays intact for the retry queue.
//!
//! # Structured JSON form
//!
//! `Event` serializes to the `application/cloudevents+json` format. Payloads
//! whose content type is JSON are embedded under `data`, textual payloads as a
//! JSON string, and anything else as `data_base64`. Extensions are flattened
//! into top-level members.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The only specification version this crate reads and writes.
pub const SPEC_VERSION: &str = "1.0";

/// Context attribute names defined by the CloudEvents core specification.
/// Extensions may not reuse these names.
pub const CONTEXT_ATTRIBUTES: [&str; 8] = [
    "id",
    "source",
    "specversion",
    "type",
    "datacontenttype",
    "dataschema",
    "subject",
    "time",
];

/// Longest extension name accepted by [`is_valid_extension_name`].
const MAX_EXTENSION_NAME_LEN: usize = 20;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised when an event violates the CloudEvents attribute rules.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("required attribute `{0}` is missing or empty")]
    MissingAttribute(&'static str),
    #[error("unsupported specversion {0:?}, expected \"1.0\"")]
    UnsupportedSpecVersion(String),
    #[error("invalid extension name {0:?}: must be 1-20 lowercase ASCII letters or digits")]
    InvalidExtensionName(String),
    #[error("extension name {0:?} collides with a context attribute")]
    ReservedExtensionName(String),
    #[error("event carries both `data` and `data_base64`")]
    ConflictingData,
    #[error("invalid data_base64: {0}")]
    InvalidBase64(base64::DecodeError),
    #[error("invalid event data: {0}")]
    InvalidData(serde_json::Error),
}

// The cause is already part of the message, so it is not exposed as `source`.
impl From<base64::DecodeError> for EventError {
    fn from(err: base64::DecodeError) -> Self {
        Self::InvalidBase64(err)
    }
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidData(err)
    }
}

// ---------------------------------------------------------------------------
// ExtensionValue
// ---------------------------------------------------------------------------

/// Value of an extension attribute.
///
/// CloudEvents restricts extensions to a handful of scalar types; integers and
/// booleans keep their JSON type in structured mode and become strings in
/// binary-mode headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtensionValue {
    Boolean(bool),
    Integer(i64),
    String(String),
}

impl fmt::Display for ExtensionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ExtensionValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ExtensionValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ExtensionValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for ExtensionValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for ExtensionValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A CloudEvents v1.0 event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StructuredEvent", into = "StructuredEvent")]
pub struct Event {
    /// Identifies the event; unique per `source`.
    pub id: String,
    /// URI-reference identifying the context in which the event happened.
    pub source: String,
    /// Always [`SPEC_VERSION`] for events built or decoded by this crate.
    pub spec_version: String,
    /// The `type` attribute.
    pub event_type: String,
    pub data_content_type: Option<String>,
    pub data_schema: Option<String>,
    pub subject: Option<String>,
    /// RFC 3339 timestamp, carried verbatim.
    pub time: Option<String>,
    /// Extension attributes. `BTreeMap` keeps wire output deterministic.
    pub extensions: BTreeMap<String, ExtensionValue>,
    /// Raw payload bytes.
    pub data: Option<Bytes>,
}

impl Event {
    /// Creates an event with the three required attributes and no payload.
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            spec_version: SPEC_VERSION.to_string(),
            event_type: event_type.into(),
            data_content_type: None,
            data_schema: None,
            subject: None,
            time: None,
            extensions: BTreeMap::new(),
            data: None,
        }
    }

    /// Sets the payload and its content type.
    #[must_use]
    pub fn with_data(mut self, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.data_content_type = Some(content_type.into());
        self.data = Some(data.into());
        self
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets an extension attribute. Names are not validated here; see [`Event::validate`].
    #[must_use]
    pub fn with_extension(mut self, name: impl Into<String>, value: impl Into<ExtensionValue>) -> Self {
        self.set_extension(name, value);
        self
    }

    pub fn extension(&self, name: &str) -> Option<&ExtensionValue> {
        self.extensions.get(name)
    }

    pub fn set_extension(&mut self, name: impl Into<String>, value: impl Into<ExtensionValue>) {
        self.extensions.insert(name.into(), value.into());
    }

    pub fn remove_extension(&mut self, name: &str) -> Option<ExtensionValue> {
        self.extensions.remove(name)
    }

    /// Looks up a context attribute or extension by its CloudEvents name.
    ///
    /// Extensions are rendered with their string form, so an integer extension
    /// `5` compares equal to the filter value `"5"`.
    pub fn attribute(&self, name: &str) -> Option<Cow<'_, str>> {
        match name {
            "id" => Some(Cow::Borrowed(self.id.as_str())),
            "source" => Some(Cow::Borrowed(self.source.as_str())),
            "specversion" => Some(Cow::Borrowed(self.spec_version.as_str())),
            "type" => Some(Cow::Borrowed(self.event_type.as_str())),
            "datacontenttype" => self.data_content_type.as_deref().map(Cow::Borrowed),
            "dataschema" => self.data_schema.as_deref().map(Cow::Borrowed),
            "subject" => self.subject.as_deref().map(Cow::Borrowed),
            "time" => self.time.as_deref().map(Cow::Borrowed),
            _ => self.extensions.get(name).map(|v| match v {
                ExtensionValue::String(s) => Cow::Borrowed(s.as_str()),
                other => Cow::Owned(other.to_string()),
            }),
        }
    }

    /// Checks required attributes, `specversion` and extension names.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.id.is_empty() {
            return Err(EventError::MissingAttribute("id"));
        }
        if self.source.is_empty() {
            return Err(EventError::MissingAttribute("source"));
        }
        if self.event_type.is_empty() {
            return Err(EventError::MissingAttribute("type"));
        }
        if self.spec_version != SPEC_VERSION {
            return Err(EventError::UnsupportedSpecVersion(self.spec_version.clone()));
        }
        for name in self.extensions.keys() {
            if CONTEXT_ATTRIBUTES.contains(&name.as_str()) || name == "data" || name == "data_base64" {
                return Err(EventError::ReservedExtensionName(name.clone()));
            }
            if !is_valid_extension_name(name) {
                return Err(EventError::InvalidExtensionName(name.clone()));
            }
        }
        Ok(())
    }
}

/// Returns `true` if `name` is a legal extension attribute name.
#[must_use]
pub fn is_valid_extension_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_EXTENSION_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Returns `true` if payloads of this content type are JSON documents.
///
/// An absent content type is treated as JSON, as the structured format implies.
#[must_use]
pub fn is_json_content_type(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return true;
    };
    let media = ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    media == "application/json" || media == "text/json" || media.ends_with("+json")
}

fn is_text_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| {
        let media = ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        media.starts_with("text/") || media == "application/xml" || media.ends_with("+xml")
    })
}

// ---------------------------------------------------------------------------
// Structured JSON representation
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct StructuredEvent {
    id: String,
    source: String,
    specversion: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    datacontenttype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dataschema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_base64: Option<String>,
    #[serde(flatten)]
    extensions: BTreeMap<String, ExtensionValue>,
}

impl TryFrom<StructuredEvent> for Event {
    type Error = EventError;

    fn try_from(s: StructuredEvent) -> Result<Self, Self::Error> {
        let data = match (s.data, s.data_base64) {
            (Some(_), Some(_)) => return Err(EventError::ConflictingData),
            (None, Some(encoded)) => Some(Bytes::from(STANDARD.decode(encoded)?)),
            (Some(serde_json::Value::String(text)), None)
                if !is_json_content_type(s.datacontenttype.as_deref()) =>
            {
                Some(Bytes::from(text))
            }
            (Some(value), None) => Some(Bytes::from(serde_json::to_vec(&value)?)),
            (None, None) => None,
        };

        let event = Self {
            id: s.id,
            source: s.source,
            spec_version: s.specversion,
            event_type: s.event_type,
            data_content_type: s.datacontenttype,
            data_schema: s.dataschema,
            subject: s.subject,
            time: s.time,
            extensions: s.extensions,
            data,
        };
        event.validate()?;
        Ok(event)
    }
}

impl From<Event> for StructuredEvent {
    fn from(e: Event) -> Self {
        let content_type = e.data_content_type.as_deref();
        let (data, data_base64) = match e.data {
            None => (None, None),
            Some(bytes) => {
                if is_json_content_type(content_type) {
                    match serde_json::from_slice::<serde_json::Value>(&bytes) {
                        Ok(value) => (Some(value), None),
                        Err(_) => (None, Some(STANDARD.encode(&bytes))),
                    }
                } else if is_text_content_type(content_type) {
                    match std::str::from_utf8(&bytes) {
                        Ok(text) => (Some(serde_json::Value::String(text.to_string())), None),
                        Err(_) => (None, Some(STANDARD.encode(&bytes))),
                    }
                } else {
                    (None, Some(STANDARD.encode(&bytes)))
                }
            }
        };

        Self {
            id: e.id,
            source: e.source,
            specversion: e.spec_version,
            event_type: e.event_type,
            datacontenttype: e.data_content_type,
            dataschema: e.data_schema,
            subject: e.subject,
            time: e.time,
            data,
            data_base64,
            extensions: e.extensions,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
