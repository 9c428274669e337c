//! The curated package catalog the browser works from.

use serde::Deserialize;
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::package::Package;

const BUILTIN: &str = include_str!("catalog.toml");

/// Pseudo-category selecting every package
pub const ALL: &str = "All";

/// Icon for packages whose category is unknown
pub const DEFAULT_ICON: &str = "📦";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entry {
    pub name: String,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Category {
    pub name: String,
    pub description: String,
    pub icon: String,
    #[serde(default)]
    pub packages: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(default)]
    category: Vec<Category>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    categories: Vec<Category>,
}

impl Catalog {
    /// The catalog shipped with the binary
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: CatalogFile =
            toml::from_str(contents).map_err(|e| Error::Catalog(e.to_string()))?;

        let mut seen = HashSet::new();
        for category in &file.category {
            if category.name.trim().is_empty() {
                return Err(Error::Catalog("category without a name".into()));
            }
            if category.name == ALL {
                return Err(Error::Catalog(format!("category name {:?} is reserved", ALL)));
            }
            if !seen.insert(category.name.as_str()) {
                return Err(Error::Catalog(format!("duplicate category {:?}", category.name)));
            }
        }

        Ok(Self {
            categories: file.category,
        })
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Category of the first catalog entry named `name`
    pub fn find(&self, name: &str) -> Option<(&Category, &Entry)> {
        self.categories
            .iter()
            .find_map(|c| c.packages.iter().find(|e| e.name == name).map(|e| (c, e)))
    }

    pub fn icon(&self, category: &str) -> &str {
        self.category(category)
            .map(|c| c.icon.as_str())
            .unwrap_or(DEFAULT_ICON)
    }

    /// Every package once, in catalog order. A package listed under several
    /// categories keeps its first one.
    pub fn packages(&self) -> Vec<Package> {
        let mut seen = HashSet::new();
        self.categories
            .iter()
            .flat_map(|c| c.packages.iter().map(move |e| (c, e)))
            .filter(|(_, e)| seen.insert(e.name.as_str()))
            .map(|(c, e)| Package::unqueried(&e.name, &e.display, &c.name, &c.description))
            .collect()
    }
}

/// Case-insensitive substring search over name, display name, description
/// and category
pub fn search(packages: &[Package], query: &str) -> Vec<Package> {
    let needle = query.trim().to_lowercase();
    packages
        .iter()
        .filter(|p| needle.is_empty() || p.matches(&needle))
        .cloned()
        .collect()
}
