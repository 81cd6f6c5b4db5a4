use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single extracted value inside a [`Record`].
///
/// Downstream consumers pattern-match on this instead of probing nested
/// dictionaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Plain key/value field.
    Text(String),
    /// Nested sub-mapping opened by a section header row.
    Section(IndexMap<String, String>),
    /// Named option bundle with its price and bundled items.
    Package { price: String, addons: Vec<String> },
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_section(&self) -> Option<&IndexMap<String, String>> {
        match self {
            Value::Section(entries) => Some(entries),
            _ => None,
        }
    }
}

/// One parsed table: its caption plus the extracted key/value data.
///
/// Keys are unique within a record; inserting a duplicate key overwrites the
/// earlier value. Insertion order is preserved.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    pub caption: String,
    pub data: IndexMap<String, Value>,
}

/// The two record lists extracted from a trim page, one per content region.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpecOps {
    pub specs: Vec<Record>,
    pub options: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Make {
    pub id: i64,
    pub name: String,
    pub children_url: String,
    pub raw_markup: Option<String>,
    pub models: Vec<Model>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: i64,
    pub make_id: i64,
    pub name: String,
    pub children_url: String,
    pub raw_markup: Option<String>,
    pub trims: Vec<Trim>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trim {
    pub id: i64,
    pub model_id: i64,
    pub name: String,
    pub production: String,
    pub children_url: String,
    pub raw_markup: Option<String>,
    pub specs: Vec<Record>,
    pub options: Vec<Record>,
}

impl Trim {
    /// Looks up a top-level data key across all spec and option records.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.specs
            .iter()
            .chain(&self.options)
            .find_map(|record| record.data.get(key))
    }
}

/// A make discovered on the brands page, before it is assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeLink {
    pub name: String,
    pub url: String,
}

/// A model discovered on a make's listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLink {
    pub name: String,
    pub url: String,
}

/// A trim discovered on a model's data page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimLink {
    pub name: String,
    pub production: String,
    pub url: String,
}
