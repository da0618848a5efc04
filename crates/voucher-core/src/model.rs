//! # Model References
//!
//! Polymorphic identity for redeemers and items: a `(kind, id)` pair compared
//! structurally. `"User"#7` and `"Book"#7` are different references.

use serde::{Deserialize, Serialize};

/// Reference to any entity by kind and opaque id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelRef {
    /// Entity kind (e.g. "User", "Book")
    pub kind: String,
    /// Opaque entity id
    pub id: String,
}

impl ModelRef {
    pub fn new(kind: impl Into<String>, id: impl ToString) -> Self {
        Self {
            kind: kind.into(),
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// An (item-type, item-id) pair on an item-scheme voucher's allow-list
pub type VoucherItem = ModelRef;

/// Items supplied with a redemption request.
///
/// A single item is treated as a one-element collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Items {
    One(ModelRef),
    Many(Vec<ModelRef>),
}

impl Items {
    pub fn into_vec(self) -> Vec<ModelRef> {
        match self {
            Items::One(item) => vec![item],
            Items::Many(items) => items,
        }
    }

    pub fn as_slice(&self) -> &[ModelRef] {
        match self {
            Items::One(item) => std::slice::from_ref(item),
            Items::Many(items) => items,
        }
    }
}

impl From<ModelRef> for Items {
    fn from(item: ModelRef) -> Self {
        Items::One(item)
    }
}

impl From<Vec<ModelRef>> for Items {
    fn from(items: Vec<ModelRef>) -> Self {
        Items::Many(items)
    }
}

impl From<&[ModelRef]> for Items {
    fn from(items: &[ModelRef]) -> Self {
        Items::Many(items.to_vec())
    }
}

/// Whose usage a per-subject counter tracks
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "subject", rename_all = "lowercase")]
pub enum Subject {
    /// Redeemer-scheme counter
    Redeemer(ModelRef),
    /// Item-scheme counter
    Item(ModelRef),
}

impl Subject {
    /// Storage label ("redeemer" / "item")
    pub fn label(&self) -> &'static str {
        match self {
            Subject::Redeemer(_) => "redeemer",
            Subject::Item(_) => "item",
        }
    }

    pub fn model(&self) -> &ModelRef {
        match self {
            Subject::Redeemer(model) | Subject::Item(model) => model,
        }
    }

    /// Rebuild from a storage label
    pub fn from_label(label: &str, model: ModelRef) -> Option<Self> {
        match label {
            "redeemer" => Some(Subject::Redeemer(model)),
            "item" => Some(Subject::Item(model)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.label(), self.model())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        assert_eq!(ModelRef::new("Book", 42), ModelRef::new("Book", "42"));
        assert_ne!(ModelRef::new("Book", 42), ModelRef::new("Pen", 42));
        assert_eq!(ModelRef::new("Book", 42).to_string(), "Book#42");
    }

    #[test]
    fn test_single_item_normalizes() {
        let items: Items = ModelRef::new("Book", 42).into();
        assert_eq!(items.as_slice().len(), 1);
        assert_eq!(items.into_vec(), vec![ModelRef::new("Book", 42)]);
    }

    #[test]
    fn test_subject_labels() {
        let subject = Subject::Item(ModelRef::new("Book", 42));
        assert_eq!(subject.label(), "item");
        assert_eq!(
            Subject::from_label("item", ModelRef::new("Book", 42)),
            Some(subject)
        );
        assert!(Subject::from_label("order", ModelRef::new("Book", 42)).is_none());
    }
}
