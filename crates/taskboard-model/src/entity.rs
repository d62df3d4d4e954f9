//! Board entities and partial field updates
//!
//! Defines the [`Entity`] trait shared by [`Board`], [`Section`] and [`Task`],
//! plus [`FieldMap`] for partial updates exchanged with the authority.

use crate::error::ModelError;
use crate::id::Identifier;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display, Formatter};

/// Kind of entity addressed by the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Board (member of the board list and maybe favourites)
    Board,
    /// Section of a board
    Section,
    /// Task of a section
    Task,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Board => "board",
            EntityKind::Section => "section",
            EntityKind::Task => "task",
        })
    }
}

/// Name of an editable field, as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldName(Cow<'static, str>);

impl FieldName {
    pub const TITLE: FieldName = FieldName(Cow::Borrowed("title"));
    pub const DESCRIPTION: FieldName = FieldName(Cow::Borrowed("description"));
    pub const ICON: FieldName = FieldName(Cow::Borrowed("icon"));
    pub const FAVOURITE: FieldName = FieldName(Cow::Borrowed("favourite"));
    pub const CONTENT: FieldName = FieldName(Cow::Borrowed("content"));

    /// Arbitrary field name
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Partial field map sent with create/update requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(BTreeMap<FieldName, Value>);

impl FieldMap {
    /// Empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map with one entry
    #[inline]
    #[must_use]
    pub fn single(field: FieldName, value: impl Into<Value>) -> Self {
        Self::new().with(field, value)
    }

    /// Add entry (builder)
    #[inline]
    #[must_use]
    pub fn with(mut self, field: FieldName, value: impl Into<Value>) -> Self {
        self.0.insert(field, value.into());
        self
    }

    /// Insert entry
    #[inline]
    pub fn insert(&mut self, field: FieldName, value: impl Into<Value>) {
        self.0.insert(field, value.into());
    }

    #[inline]
    #[must_use]
    pub fn get(&self, field: &FieldName) -> Option<&Value> {
        self.0.get(field)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldName, &Value)> {
        self.0.iter()
    }

    /// JSON object form
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                .collect(),
        )
    }
}

/// Entity held in an ordered collection
///
/// Field edits go through a JSON representation so every entity supports the
/// same partial-update semantics as the authority.
pub trait Entity: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Kind used when addressing the authority
    const KIND: EntityKind;

    /// Authority-assigned id
    fn id(&self) -> &Identifier;

    /// Display title (used by search filters)
    fn title(&self) -> &str;

    /// Decode an authority record
    ///
    /// # Errors
    /// Returns error if the record does not describe this entity kind
    fn from_record(record: Value) -> Result<Self, ModelError> {
        serde_json::from_value(record).map_err(|source| ModelError::Decode {
            kind: Self::KIND,
            source,
        })
    }

    /// Apply a partial field map in place
    ///
    /// # Errors
    /// - `ModelError::Decode` if a value has the wrong type for its field
    /// - `ModelError::IdentityChanged` if the map tries to rewrite the id
    fn apply_fields(&mut self, fields: &FieldMap) -> Result<(), ModelError> {
        let mut value = serde_json::to_value(&*self).map_err(|source| ModelError::Decode {
            kind: Self::KIND,
            source,
        })?;
        let Value::Object(map) = &mut value else {
            return Err(ModelError::NotAnObject(Self::KIND));
        };
        for (field, v) in fields.iter() {
            map.insert(field.as_str().to_string(), v.clone());
        }

        let updated = Self::from_record(value)?;
        if updated.id() != self.id() {
            return Err(ModelError::IdentityChanged {
                kind: Self::KIND,
                id: self.id().clone(),
            });
        }
        *self = updated;
        Ok(())
    }
}

/// A board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: Identifier,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub favourite: bool,
}

impl Board {
    /// Board with empty fields
    #[must_use]
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            title: String::new(),
            description: String::new(),
            icon: String::new(),
            favourite: false,
        }
    }

    /// With title
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Marked as favourite
    #[must_use]
    pub fn favourited(mut self) -> Self {
        self.favourite = true;
        self
    }
}

impl Entity for Board {
    const KIND: EntityKind = EntityKind::Board;

    fn id(&self) -> &Identifier {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }
}

/// A section of a board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: Identifier,
    #[serde(default)]
    pub title: String,
}

impl Section {
    #[must_use]
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            title: String::new(),
        }
    }
}

impl Entity for Section {
    const KIND: EntityKind = EntityKind::Section;

    fn id(&self) -> &Identifier {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }
}

/// A task card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Identifier,
    #[serde(default)]
    pub title: String,
    /// Rich-text body (HTML)
    #[serde(default)]
    pub content: String,
}

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("static pattern"));

impl Task {
    const PREVIEW_CHARS: usize = 30;

    #[must_use]
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            title: String::new(),
            content: String::new(),
        }
    }

    /// Card label: title, else a tag-stripped preview of the content, else "Untitled"
    #[must_use]
    pub fn display_title(&self) -> String {
        if !self.title.is_empty() {
            return self.title.clone();
        }
        if !self.content.is_empty() {
            let plain = TAG.replace_all(&self.content, "");
            let preview: String = plain.chars().take(Self::PREVIEW_CHARS).collect();
            return format!("{preview}…");
        }
        "Untitled".to_string()
    }
}

impl Entity for Task {
    const KIND: EntityKind = EntityKind::Task;

    fn id(&self) -> &Identifier {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }
}

/// Section with its tasks, as returned by a board fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDetail {
    #[serde(flatten)]
    pub section: Section,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Board with its sections, as returned by a board fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardDetail {
    #[serde(flatten)]
    pub board: Board,
    #[serde(default)]
    pub sections: Vec<SectionDetail>,
}

/// Case-insensitive title filter (sidebar search)
pub fn filter_by_title<'a, T: Entity>(
    items: impl IntoIterator<Item = &'a T>,
    query: &str,
) -> Vec<&'a T> {
    let needle = query.to_lowercase();
    items
        .into_iter()
        .filter(|item| item.title().to_lowercase().contains(&needle))
        .collect()
}
