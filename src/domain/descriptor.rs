//! Capability identity and addressing
//!
//! A capability is identified by the triple `(host, service, name)` plus its kind.
//! Tools and prompts are addressed as `{host}_{service}_{name}`, resource types as
//! `{host}://{service}/{type}` with individual resources appended as `/{id}`.

use std::{fmt, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Resource,
    Prompt,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 3] = [Self::Tool, Self::Resource, Self::Prompt];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Prompt => "prompt",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

/// A keyword parameter accepted by a tool or prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub required: bool,
}

impl Param {
    pub fn required(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind,
            required: false,
        }
    }
}

/// Immutable identity and metadata of one capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub host: String,
    pub service: String,
    pub name: String,
    pub kind: CapabilityKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl CapabilityDescriptor {
    pub fn new(host: &str, service: &str, name: &str, kind: CapabilityKind) -> Self {
        Self {
            host: host.to_string(),
            service: service.to_string(),
            name: name.to_string(),
            kind,
            description: String::new(),
            params: Vec::new(),
            mime_type: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_params(mut self, params: Vec<Param>) -> Self {
        self.params = params;
        self
    }

    pub fn with_mime_type(mut self, mime_type: &str) -> Self {
        self.mime_type = Some(mime_type.to_string());
        self
    }

    /// Canonical address of the capability. For resources this is the address of
    /// the resource type; use [`resource_uri`](Self::resource_uri) for one resource.
    pub fn address(&self) -> String {
        match self.kind {
            CapabilityKind::Tool | CapabilityKind::Prompt => {
                format!("{}_{}_{}", self.host, self.service, self.name)
            }
            CapabilityKind::Resource => {
                format!("{}://{}/{}", self.host, self.service, self.name)
            }
        }
    }

    pub fn resource_uri(&self, id: &str) -> String {
        format!("{}/{}", self.address(), id)
    }

    pub fn uri_template(&self) -> String {
        self.resource_uri("{id}")
    }

    pub fn required_params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|param| param.required)
    }
}

impl fmt::Display for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Parsed form of an inbound address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub service: String,
    pub name: String,
    pub resource_id: Option<String>,
}

impl Address {
    /// Parses `{host}_{service}_{name}`, splitting on the first two underscores only.
    pub fn parse_named(address: &str) -> Option<Self> {
        let mut parts = address.splitn(3, '_');
        let host = parts.next().filter(|part| !part.is_empty())?;
        let service = parts.next().filter(|part| !part.is_empty())?;
        let name = parts.next().filter(|part| !part.is_empty())?;

        Some(Self {
            host: host.to_string(),
            service: service.to_string(),
            name: name.to_string(),
            resource_id: None,
        })
    }

    /// Parses `{host}://{service}/{type}/{id}`; the id is everything after the type
    /// segment and may itself contain slashes.
    pub fn parse_resource(address: &str) -> Option<Self> {
        let (host, rest) = address.split_once("://")?;
        let (service, path) = rest.split_once('/')?;
        let (name, id) = match path.split_once('/') {
            Some((name, id)) => (name, id),
            None => (path, ""),
        };

        if host.is_empty() || service.is_empty() || name.is_empty() || id.is_empty() {
            return None;
        }

        Some(Self {
            host: host.to_string(),
            service: service.to_string(),
            name: name.to_string(),
            resource_id: Some(id.to_string()),
        })
    }
}

/// Hosts and services take part in `_`-separated addresses and therefore may not
/// contain underscores themselves.
pub fn is_valid_segment(value: &str) -> bool {
    static SEGMENT: OnceLock<Regex> = OnceLock::new();
    SEGMENT
        .get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("segment pattern compiles"))
        .is_match(value)
}

pub fn is_valid_capability_name(value: &str) -> bool {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("name pattern compiles"))
        .is_match(value)
}
