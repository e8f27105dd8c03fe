//! Converted items: what a row becomes before it is batched.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Declared content format of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    #[default]
    Json,
    Xml,
    Text,
    Binary,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Json => "json",
            DocumentFormat::Xml => "xml",
            DocumentFormat::Text => "text",
            DocumentFormat::Binary => "binary",
        }
    }

    /// File extension used for generated URIs
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Json => ".json",
            DocumentFormat::Xml => ".xml",
            DocumentFormat::Text => ".txt",
            DocumentFormat::Binary => "",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(DocumentFormat::Json),
            "xml" => Ok(DocumentFormat::Xml),
            "text" => Ok(DocumentFormat::Text),
            "binary" => Ok(DocumentFormat::Binary),
            other => Err(format!("unknown document format '{other}'")),
        }
    }
}

/// Capability granted to a role on a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Read,
    Update,
    Insert,
    Execute,
    NodeUpdate,
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Capability::Read),
            "update" => Ok(Capability::Update),
            "insert" => Ok(Capability::Insert),
            "execute" => Ok(Capability::Execute),
            "node-update" => Ok(Capability::NodeUpdate),
            other => Err(format!("unknown capability '{other}'")),
        }
    }
}

/// A (role, capability) pair attached to a document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub role: String,
    pub capability: Capability,
}

impl Permission {
    pub fn new(role: impl Into<String>, capability: Capability) -> Self {
        Permission {
            role: role.into(),
            capability,
        }
    }

    /// Parse `role,capability,role,capability,...`
    pub fn parse_list(raw: &str) -> Result<BTreeSet<Permission>, String> {
        let tokens: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.len() % 2 != 0 {
            return Err("expected role,capability pairs".to_string());
        }
        tokens
            .chunks(2)
            .map(|pair| Ok(Permission::new(pair[0], pair[1].parse()?)))
            .collect()
    }
}

/// A document ready to be written to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub uri: String,
    pub content: Vec<u8>,
    pub format: DocumentFormat,
    pub permissions: BTreeSet<Permission>,
    pub collections: BTreeSet<String>,
}

/// Variable bindings for one custom-code call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeInvocation {
    pub variables: BTreeMap<String, serde_json::Value>,
    /// The value bound to the external variable, kept separately so a
    /// batch-level invocation can merge the values of several items
    pub primary: serde_json::Value,
}

impl CodeInvocation {
    /// Text used to identify the item in logs and failure details
    pub fn label(&self) -> String {
        match &self.primary {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Output of converting one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvertedItem {
    Document(Document),
    Invocation(CodeInvocation),
}

impl ConvertedItem {
    /// URI or external-variable value identifying the item
    pub fn label(&self) -> String {
        match self {
            ConvertedItem::Document(doc) => doc.uri.clone(),
            ConvertedItem::Invocation(inv) => inv.label(),
        }
    }
}
