//! Protocol content union and marshalling of provider return values

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: ResourceContents,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceContents {
    Text {
        uri: String,
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        text: String,
    },
    Blob {
        uri: String,
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        blob: String,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn embedded_text(uri: &str, mime_type: &str, text: impl Into<String>) -> Self {
        Self::Resource {
            resource: ResourceContents::Text {
                uri: uri.to_string(),
                mime_type: Some(mime_type.to_string()),
                text: text.into(),
            },
        }
    }

    pub fn embedded_blob(uri: &str, mime_type: &str, bytes: &[u8]) -> Self {
        Self::Resource {
            resource: ResourceContents::Blob {
                uri: uri.to_string(),
                mime_type: Some(mime_type.to_string()),
                blob: BASE64_STANDARD.encode(bytes),
            },
        }
    }

    /// Converts marshalled content into the contents of a `resources/read` result.
    /// Plain text takes the declared mime type of the resource, if any.
    pub fn into_resource_contents(self, uri: &str, mime_type: Option<&str>) -> ResourceContents {
        match self {
            Self::Text { text } => ResourceContents::Text {
                uri: uri.to_string(),
                mime_type: Some(mime_type.unwrap_or("text/plain").to_string()),
                text,
            },
            Self::Image { data, mime_type } => ResourceContents::Blob {
                uri: uri.to_string(),
                mime_type: Some(mime_type),
                blob: data,
            },
            Self::Resource { resource } => resource,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else {
            None
        }
    }
}

/// An image held in its encoded form together with the format it was decoded as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    bytes: Vec<u8>,
    format: ImageFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized image format")]
pub struct UnknownImageFormat;

impl Image {
    pub fn decode(bytes: Vec<u8>) -> Result<Self, UnknownImageFormat> {
        let format = ImageFormat::sniff(&bytes).ok_or(UnknownImageFormat)?;
        Ok(Self { bytes, format })
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Native return value of a capability method, prior to marshalling.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Empty,
    Content(Content),
    Text(String),
    Image(Image),
    List(Vec<Output>),
    Structured(Value),
    Opaque { repr: String, reason: String },
}

impl Output {
    /// Serializes any value into structured output, falling back to its debug form.
    pub fn json<T>(value: &T) -> Self
    where
        T: Serialize + fmt::Debug,
    {
        match serde_json::to_value(value) {
            Ok(value) => Self::Structured(value),
            Err(err) => Self::Opaque {
                repr: format!("{value:?}"),
                reason: err.to_string(),
            },
        }
    }
}

impl From<String> for Output {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Output {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Content> for Output {
    fn from(value: Content) -> Self {
        Self::Content(value)
    }
}

impl From<Image> for Output {
    fn from(value: Image) -> Self {
        Self::Image(value)
    }
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

impl From<()> for Output {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

impl<T: Into<Output>> From<Option<T>> for Output {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Empty, Into::into)
    }
}

impl<T: Into<Output>> From<Vec<T>> for Output {
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

/// Flattens a native return value into protocol content, depth first.
pub fn marshal(output: Output) -> Vec<Content> {
    let mut contents = Vec::new();
    marshal_into(output, &mut contents);
    contents
}

fn marshal_into(output: Output, contents: &mut Vec<Content>) {
    match output {
        Output::Empty => {}
        Output::Content(content) => contents.push(content),
        Output::Text(text) => contents.push(Content::Text { text }),
        Output::Image(image) => contents.push(Content::Image {
            data: BASE64_STANDARD.encode(image.bytes()),
            mime_type: image.format().mime_type().to_string(),
        }),
        Output::List(items) => {
            for item in items {
                marshal_into(item, contents);
            }
        }
        Output::Structured(value) => contents.push(Content::Text {
            text: value.to_string(),
        }),
        Output::Opaque { repr, reason } => {
            warn!(reason = %reason, "result is not serializable, falling back to its string form");
            contents.push(Content::Text { text: repr });
        }
    }
}
