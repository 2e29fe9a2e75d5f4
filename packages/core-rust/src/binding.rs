//! CloudEvents HTTP protocol binding.
//!
//! A [`Message`] is the wire form of an event: an HTTP header map plus a body.
//! Two encodings are supported:
//!
//! - **Binary**: context attributes and extensions travel as `ce-*` headers,
//!   `Content-Type` carries `datacontenttype`, and the body is the raw payload.
//! - **Structured**: the whole event is a JSON document with content type
//!   `application/cloudevents+json`.
//!
//! [`Message::read_encoding`] detects which (if any) encoding a message uses.
//! An HTTP response without either marker is [`Encoding::Unknown`], which the
//! delivery path reads as "no reply".

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::event::{Event, EventError};

/// Media type of the structured JSON format.
pub const STRUCTURED_JSON_MEDIA_TYPE: &str = "application/cloudevents+json";

const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json; charset=utf-8";
const STRUCTURED_PREFIX: &str = "application/cloudevents+";
const CE_HEADER_PREFIX: &str = "ce-";
const SPEC_VERSION_HEADER: &str = "ce-specversion";

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Wire encoding of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// Attributes in `ce-*` headers, payload in the body.
    #[default]
    Binary,
    /// Whole event in a `application/cloudevents+*` body.
    Structured,
    /// Not a CloudEvents message.
    Unknown,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Binary => "binary",
            Self::Structured => "structured",
            Self::Unknown => "unknown",
        })
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from encoding or decoding a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("message carries no recognizable CloudEvents encoding")]
    UnknownEncoding,
    #[error("unsupported structured event format {0:?}")]
    UnsupportedFormat(String),
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("invalid structured event body: {0}")]
    Json(serde_json::Error),
    #[error(transparent)]
    Event(#[from] EventError),
}

impl From<serde_json::Error> for BindingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

// ---------------------------------------------------------------------------
// Transformer
// ---------------------------------------------------------------------------

/// A mutation applied to an event while it is being written to the wire.
///
/// Transformers let a sender adjust an outgoing message (for example, stamp a
/// bookkeeping extension on a reply) without touching the message it was
/// handed.
pub trait Transformer: Send + Sync {
    fn transform(&self, event: &mut Event);
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// An event in HTTP wire form.
#[derive(Debug, Clone, Default)]
pub struct Message {
    headers: HeaderMap,
    body: Bytes,
}

impl Message {
    #[must_use]
    pub fn new(headers: HeaderMap, body: Bytes) -> Self {
        Self { headers, body }
    }

    /// Encodes `event` with the requested encoding.
    ///
    /// # Errors
    ///
    /// Fails if the event is invalid, if `encoding` is [`Encoding::Unknown`],
    /// or if an attribute cannot be represented as a header.
    pub fn from_event(event: &Event, encoding: Encoding) -> Result<Self, BindingError> {
        event.validate()?;
        match encoding {
            Encoding::Binary => write_binary(event),
            Encoding::Structured => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(STRUCTURED_CONTENT_TYPE));
                let body = serde_json::to_vec(event)?;
                Ok(Self::new(headers, Bytes::from(body)))
            }
            Encoding::Unknown => Err(BindingError::UnknownEncoding),
        }
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn into_parts(self) -> (HeaderMap, Bytes) {
        (self.headers, self.body)
    }

    /// Detects the encoding from the message headers alone.
    #[must_use]
    pub fn read_encoding(&self) -> Encoding {
        if let Some(media) = self.media_type() {
            if media.starts_with(STRUCTURED_PREFIX) {
                return Encoding::Structured;
            }
        }
        if self.headers.contains_key(SPEC_VERSION_HEADER) {
            return Encoding::Binary;
        }
        Encoding::Unknown
    }

    /// Decodes the message into an event.
    ///
    /// # Errors
    ///
    /// Fails on [`Encoding::Unknown`], on structured formats other than JSON,
    /// on undecodable headers, and on events violating the attribute rules.
    pub fn to_event(&self) -> Result<Event, BindingError> {
        match self.read_encoding() {
            Encoding::Binary => read_binary(&self.headers, &self.body),
            Encoding::Structured => {
                let media = self.media_type().unwrap_or_default();
                if media != STRUCTURED_JSON_MEDIA_TYPE {
                    return Err(BindingError::UnsupportedFormat(media));
                }
                Ok(serde_json::from_slice(&self.body)?)
            }
            Encoding::Unknown => Err(BindingError::UnknownEncoding),
        }
    }

    /// Applies `transformers` and re-encodes in the original encoding.
    ///
    /// With no transformers the message is returned untouched.
    ///
    /// # Errors
    ///
    /// Fails if the message cannot be decoded or re-encoded.
    pub fn transformed(self, transformers: &[&dyn Transformer]) -> Result<Self, BindingError> {
        if transformers.is_empty() {
            return Ok(self);
        }
        let encoding = self.read_encoding();
        let mut event = self.to_event()?;
        for transformer in transformers {
            transformer.transform(&mut event);
        }
        Self::from_event(&event, encoding)
    }

    fn media_type(&self) -> Option<String> {
        let value = self.headers.get(CONTENT_TYPE)?.to_str().ok()?;
        let media = value.split(';').next()?.trim().to_ascii_lowercase();
        Some(media)
    }
}

// ---------------------------------------------------------------------------
// Binary mode
// ---------------------------------------------------------------------------

fn write_binary(event: &Event) -> Result<Message, BindingError> {
    let mut headers = HeaderMap::new();
    insert_ce_header(&mut headers, "specversion", &event.spec_version)?;
    insert_ce_header(&mut headers, "id", &event.id)?;
    insert_ce_header(&mut headers, "source", &event.source)?;
    insert_ce_header(&mut headers, "type", &event.event_type)?;
    if let Some(subject) = &event.subject {
        insert_ce_header(&mut headers, "subject", subject)?;
    }
    if let Some(time) = &event.time {
        insert_ce_header(&mut headers, "time", time)?;
    }
    if let Some(schema) = &event.data_schema {
        insert_ce_header(&mut headers, "dataschema", schema)?;
    }
    for (name, value) in &event.extensions {
        insert_ce_header(&mut headers, name, &value.to_string())?;
    }
    if let Some(content_type) = &event.data_content_type {
        let value = HeaderValue::from_str(content_type).map_err(|e| BindingError::InvalidHeader {
            name: CONTENT_TYPE.to_string(),
            reason: e.to_string(),
        })?;
        headers.insert(CONTENT_TYPE, value);
    }
    let body = event.data.clone().unwrap_or_default();
    Ok(Message::new(headers, body))
}

fn insert_ce_header(headers: &mut HeaderMap, attribute: &str, value: &str) -> Result<(), BindingError> {
    let name = format!("{CE_HEADER_PREFIX}{attribute}");
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| BindingError::InvalidHeader {
        name: name.clone(),
        reason: e.to_string(),
    })?;
    let header_value =
        HeaderValue::from_str(&percent_encode(value)).map_err(|e| BindingError::InvalidHeader {
            name,
            reason: e.to_string(),
        })?;
    headers.insert(header_name, header_value);
    Ok(())
}

fn read_binary(headers: &HeaderMap, body: &Bytes) -> Result<Event, BindingError> {
    let mut event = Event::new("", "", "");
    event.spec_version = String::new();

    for (name, value) in headers {
        let Some(attribute) = name.as_str().strip_prefix(CE_HEADER_PREFIX) else {
            continue;
        };
        let raw = value.to_str().map_err(|e| BindingError::InvalidHeader {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let decoded = percent_decode(raw).ok_or_else(|| BindingError::InvalidHeader {
            name: name.to_string(),
            reason: "malformed percent-encoding".to_string(),
        })?;
        match attribute {
            "specversion" => event.spec_version = decoded,
            "id" => event.id = decoded,
            "source" => event.source = decoded,
            "type" => event.event_type = decoded,
            "subject" => event.subject = Some(decoded),
            "time" => event.time = Some(decoded),
            "dataschema" => event.data_schema = Some(decoded),
            // Carried by Content-Type in binary mode.
            "datacontenttype" => {}
            ext => event.set_extension(ext, decoded),
        }
    }

    if let Some(content_type) = headers.get(CONTENT_TYPE) {
        let content_type = content_type.to_str().map_err(|e| BindingError::InvalidHeader {
            name: CONTENT_TYPE.to_string(),
            reason: e.to_string(),
        })?;
        event.data_content_type = Some(content_type.to_string());
    }
    if !body.is_empty() {
        event.data = Some(body.clone());
    }
    if event.spec_version.is_empty() {
        return Err(EventError::MissingAttribute("specversion").into());
    }

    event.validate()?;
    Ok(event)
}

/// Bytes escaped in `ce-*` header values: controls, space, `"` and `%`.
/// Non-ASCII bytes are always escaped.
const HEADER_VALUE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'%');

fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, HEADER_VALUE).to_string()
}

/// Decodes a header value. Every `%` must start a two-hex-digit escape and the
/// result must be UTF-8.
fn percent_decode(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let well_formed = bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'%')
        .all(|(i, _)| {
            bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
        });
    if !well_formed {
        return None;
    }
    percent_decode_str(value).decode_utf8().ok().map(Cow::into_owned)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
