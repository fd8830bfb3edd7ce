//! Upload body elements and their wire form.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{NetError, NetResult};
use crate::upload::chunked::ChunkedUpload;

/// One piece of a request body.
#[derive(Debug, Clone)]
pub enum UploadElement {
    Bytes(Bytes),
    FileRange {
        path: PathBuf,
        offset: u64,
        /// `None` reads to end of file.
        length: Option<u64>,
        /// Upload fails with `UploadFileChanged` if the file's mtime differs.
        expected_modification_time: Option<SystemTime>,
    },
    Blob {
        uuid: String,
    },
    Chunked(ChunkedUpload),
}

/// Ordered sequence of upload elements.
#[derive(Debug, Clone, Default)]
pub struct RequestBody {
    elements: Vec<UploadElement>,
}

impl RequestBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            elements: vec![UploadElement::Bytes(data.into())],
        }
    }

    pub fn chunked(upload: ChunkedUpload) -> Self {
        Self {
            elements: vec![UploadElement::Chunked(upload)],
        }
    }

    pub fn push(&mut self, element: UploadElement) {
        self.elements.push(element);
    }

    pub fn elements(&self) -> &[UploadElement] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<UploadElement> {
        self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn is_chunked(&self) -> bool {
        self.elements
            .iter()
            .any(|e| matches!(e, UploadElement::Chunked(_)))
    }

    /// Exact size when every element is in memory.
    pub fn in_memory_size(&self) -> Option<u64> {
        self.elements.iter().try_fold(0u64, |total, element| match element {
            UploadElement::Bytes(data) => Some(total + data.len() as u64),
            _ => None,
        })
    }

    /// Best-known total for progress reporting; unknown parts count as 0.
    pub fn estimated_size(&self) -> u64 {
        self.elements
            .iter()
            .map(|element| match element {
                UploadElement::Bytes(data) => data.len() as u64,
                UploadElement::FileRange { length, .. } => length.unwrap_or(0),
                UploadElement::Blob { .. } | UploadElement::Chunked(_) => 0,
            })
            .sum()
    }

    pub fn to_wire(&self) -> Vec<UploadData> {
        self.elements
            .iter()
            .map(|element| match element {
                UploadElement::Bytes(data) => UploadData::RawData {
                    bytes: data.to_vec(),
                },
                UploadElement::FileRange {
                    path,
                    offset,
                    length,
                    expected_modification_time,
                } => UploadData::File {
                    file_path: path.clone(),
                    offset: *offset,
                    length: *length,
                    modification_time: expected_modification_time
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_secs_f64()),
                },
                UploadElement::Blob { uuid } => UploadData::Blob {
                    blob_uuid: uuid.clone(),
                },
                UploadElement::Chunked(_) => UploadData::Stream,
            })
            .collect()
    }

    /// Build a body from its wire form. Stream entries cannot be rebuilt.
    pub fn from_wire(items: Vec<UploadData>) -> NetResult<Self> {
        let mut body = RequestBody::new();
        for item in items {
            let element = match item {
                UploadData::RawData { bytes } => UploadElement::Bytes(Bytes::from(bytes)),
                UploadData::File {
                    file_path,
                    offset,
                    length,
                    modification_time,
                } => UploadElement::FileRange {
                    path: file_path,
                    offset,
                    length,
                    expected_modification_time: modification_time
                        .filter(|t| t.is_finite() && *t >= 0.0)
                        .map(|t| UNIX_EPOCH + Duration::from_secs_f64(t)),
                },
                UploadData::Blob { blob_uuid } => UploadElement::Blob { uuid: blob_uuid },
                UploadData::Stream => return Err(NetError::InvalidArgument),
            };
            body.push(element);
        }
        Ok(body)
    }
}

/// Wire shape of an upload element as exposed to handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UploadData {
    RawData {
        bytes: Vec<u8>,
    },
    #[serde(rename_all = "camelCase")]
    File {
        file_path: PathBuf,
        #[serde(default)]
        offset: u64,
        #[serde(default)]
        length: Option<u64>,
        /// Seconds since the Unix epoch.
        #[serde(default)]
        modification_time: Option<f64>,
    },
    Blob {
        #[serde(rename = "blobUUID")]
        blob_uuid: String,
    },
    #[serde(skip_deserializing)]
    Stream,
}
