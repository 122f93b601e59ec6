//! Documents, matches, and the single-vs-batch input shape.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Free-form document attributes (e.g. `"text"`).
pub type Metadata = HashMap<String, String>;

/// A caller-owned document: stable id, attributes, one embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub attributes: Metadata,
}

impl Document {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
            attributes: Metadata::new(),
        }
    }

    /// Document with a freshly generated UUIDv4 id.
    pub fn with_random_id(embedding: Vec<f32>) -> Self {
        Self::new(uuid::Uuid::new_v4().simple().to_string(), embedding)
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: Metadata) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Shorthand for the `"text"` attribute.
    pub fn text(&self) -> Option<&str> {
        self.attribute("text")
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    /// Distance to the query; lower is closer.
    pub score: f32,
    pub attributes: Metadata,
}

impl Match {
    pub fn text(&self) -> Option<&str> {
        self.attributes.get("text").map(String::as_str)
    }
}

/// Matches for one query document, closest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatches {
    pub query_id: String,
    pub matches: Vec<Match>,
}

impl QueryMatches {
    pub fn scores(&self) -> Vec<f32> {
        self.matches.iter().map(|m| m.score).collect()
    }

    pub fn top(&self) -> Option<&Match> {
        self.matches.first()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Either one item or a batch; results keep the shape of the input.
#[derive(Debug, Clone, PartialEq)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn len(&self) -> usize {
        match self {
            OneOrMany::One(_) => 1,
            OneOrMany::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_one(&self) -> bool {
        matches!(self, OneOrMany::One(_))
    }

    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(item) => std::slice::from_ref(item),
            OneOrMany::Many(items) => items.as_slice(),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }

    /// Map every item, keeping the shape.
    pub fn map<U, F: FnMut(T) -> U>(self, mut f: F) -> OneOrMany<U> {
        match self {
            OneOrMany::One(item) => OneOrMany::One(f(item)),
            OneOrMany::Many(items) => OneOrMany::Many(items.into_iter().map(f).collect()),
        }
    }

    /// The single item, if this is `One`.
    pub fn into_one(self) -> Option<T> {
        match self {
            OneOrMany::One(item) => Some(item),
            OneOrMany::Many(_) => None,
        }
    }

    /// The batch, if this is `Many`.
    pub fn into_many(self) -> Option<Vec<T>> {
        match self {
            OneOrMany::One(_) => None,
            OneOrMany::Many(items) => Some(items),
        }
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(item: T) -> Self {
        OneOrMany::One(item)
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(items: Vec<T>) -> Self {
        OneOrMany::Many(items)
    }
}

impl<T: Clone> From<&[T]> for OneOrMany<T> {
    fn from(items: &[T]) -> Self {
        OneOrMany::Many(items.to_vec())
    }
}

impl<T: Clone> From<&T> for OneOrMany<T> {
    fn from(item: &T) -> Self {
        OneOrMany::One(item.clone())
    }
}

impl<T: Clone> From<&Vec<T>> for OneOrMany<T> {
    fn from(items: &Vec<T>) -> Self {
        OneOrMany::Many(items.clone())
    }
}
