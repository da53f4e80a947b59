//! Rewindable request bodies
//!
//! Every body is materialised once into a [`Bytes`] buffer. Each attempt
//! and each failover host gets a cheap clone of the same buffer, so the
//! server sees identical bytes on every try.

use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;
use reqwest::header::HeaderValue;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::HttpError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestBody {
    bytes: Option<Bytes>,
    content_type: Option<HeaderValue>,
}

impl RequestBody {
    /// No body; no content-length is sent.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self { bytes: Some(bytes.into()), content_type: None }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            bytes: Some(Bytes::from(text.into())),
            content_type: Some(HeaderValue::from_static("text/plain; charset=utf-8")),
        }
    }

    /// Serialize `value` as JSON.
    ///
    /// # Errors
    /// Returns [`HttpError::Body`] when serialization fails.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, HttpError> {
        let encoded = serde_json::to_vec(value).map_err(|e| HttpError::Body(e.to_string()))?;
        Ok(Self {
            bytes: Some(Bytes::from(encoded)),
            content_type: Some(HeaderValue::from_static("application/json")),
        })
    }

    /// Drain a one-shot reader into memory.
    ///
    /// # Errors
    /// Returns [`HttpError::Body`] on read failure.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, HttpError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).map_err(|e| HttpError::Body(e.to_string()))?;
        Ok(Self::bytes(buf))
    }

    /// Rewind a seekable reader to its start and read it fully.
    ///
    /// # Errors
    /// Returns [`HttpError::Body`] on seek or read failure.
    pub fn from_seekable<R: Read + Seek>(mut reader: R) -> Result<Self, HttpError> {
        reader.seek(SeekFrom::Start(0)).map_err(|e| HttpError::Body(e.to_string()))?;
        Self::from_reader(reader)
    }

    /// Drain an async reader into memory.
    ///
    /// # Errors
    /// Returns [`HttpError::Body`] on read failure.
    pub async fn from_async_reader<R: AsyncRead + Unpin>(mut reader: R) -> Result<Self, HttpError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.map_err(|e| HttpError::Body(e.to_string()))?;
        Ok(Self::bytes(buf))
    }

    /// Override the content type sent with this body.
    pub fn with_content_type(mut self, content_type: HeaderValue) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_none()
    }

    pub fn len(&self) -> usize {
        self.bytes.as_ref().map_or(0, Bytes::len)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }

    /// A fresh handle on the same buffer for the next attempt.
    pub(crate) fn replay(&self) -> Option<Bytes> {
        self.bytes.clone()
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::bytes(bytes)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<&'static str> for RequestBody {
    fn from(text: &'static str) -> Self {
        Self::text(text)
    }
}
