//! Category names and category sets.
//!
//! A category is a tag realized as a directory name. Names are compared
//! byte-for-byte, so `Art` and `art` are two different categories.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TagspaceError};

/// Name of the category registry file kept at the managed root.
pub const REGISTRY_FILE_NAME: &str = ".tagspace";

/// A validated category name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Category(String);

impl Category {
    /// Validates `name` and wraps it.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if let Some(reason) = invalid_name_reason(&name) {
            return Err(TagspaceError::InvalidCategoryName { name, reason });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Returns why `name` cannot be a category, or `None` when it can.
pub fn invalid_name_reason(name: &str) -> Option<&'static str> {
    if name.is_empty() {
        return Some("name is empty");
    }
    if name == "." || name == ".." {
        return Some("name is reserved");
    }
    if name.starts_with('.') {
        return Some("name starts with a dot");
    }
    if name.contains('/') || name.contains(std::path::MAIN_SEPARATOR) {
        return Some("name contains a path separator");
    }
    if name.contains('\n') || name.contains('\r') {
        return Some("name contains a line break");
    }
    if name.contains('\0') {
        return Some("name contains a NUL byte");
    }
    None
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Category {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Category {
    type Error = TagspaceError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Category {
    type Error = TagspaceError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.0
    }
}

/// An unordered set of categories.
///
/// Backed by a `BTreeSet` so iteration order is stable, which keeps walk
/// results and log lines deterministic. The order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CategorySet(BTreeSet<Category>);

impl CategorySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from raw names, validating each one.
    pub fn parse<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .map(|name| Category::new(name))
            .collect::<Result<BTreeSet<_>>>()
            .map(Self)
    }

    /// Adds a category, returning false if it was already present.
    pub fn insert(&mut self, category: Category) -> bool {
        self.0.insert(category)
    }

    pub fn contains(&self, category: &Category) -> bool {
        self.0.contains(category)
    }

    /// Checks membership by raw name without allocating a `Category`.
    pub fn contains_name(&self, name: &str) -> bool {
        self.0.iter().any(|category| category.as_str() == name)
    }

    pub fn is_subset(&self, other: &CategorySet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.0.iter()
    }
}

impl FromIterator<Category> for CategorySet {
    fn from_iter<T: IntoIterator<Item = Category>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for CategorySet {
    type Item = Category;
    type IntoIter = std::collections::btree_set::IntoIter<Category>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a CategorySet {
    type Item = &'a Category;
    type IntoIter = std::collections::btree_set::Iter<'a, Category>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for CategorySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, category) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            f.write_str(category.as_str())?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_names() {
        for name in ["", ".", "..", ".hidden", "a/b", "line\nbreak", REGISTRY_FILE_NAME] {
            let error = Category::new(name).expect_err("name should be rejected");
            assert!(
                matches!(error, TagspaceError::InvalidCategoryName { .. }),
                "unexpected error for {name:?}: {error:?}"
            );
        }
    }

    #[test]
    fn accepts_unicode_and_spaces() {
        assert_eq!(Category::new("项目").unwrap().as_str(), "项目");
        assert_eq!(Category::new("Road trips").unwrap().as_str(), "Road trips");
    }

    #[test]
    fn names_are_case_sensitive() {
        let set = CategorySet::parse(["Art", "art"]).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn set_ignores_insertion_order_and_duplicates() {
        let a = CategorySet::parse(["Pictures", "Art", "Pictures"]).unwrap();
        let b = CategorySet::parse(["Art", "Pictures"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "{Art, Pictures}");
    }

    #[test]
    fn serde_validates_names() {
        let parsed: std::result::Result<Category, _> = serde_json::from_str("\"a/b\"");
        assert!(parsed.is_err());
        let set: CategorySet = serde_json::from_str("[\"Art\",\"Videos\"]").unwrap();
        assert!(set.contains_name("Videos"));
    }
}
