//! Schema Registry: named capability schemas.
//!
//! Schemas are registered by capability name (e.g. `social`) and loaded from:
//! 1. Programmatic registration
//! 2. Individual YAML/JSON files (the file stem is the capability name)
//! 3. Directories of such files (recursive)

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::definition::CapabilitySchema;
use crate::error::{PortError, PortResult};

/// Registry of capability schemas indexed by capability name.
///
/// Schemas are stored behind `Arc` so ports built from the same entry share
/// one immutable copy.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<CapabilitySchema>>,
}

impl SchemaRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema under a name, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, schema: CapabilitySchema) {
        let name = name.into();
        if self.schemas.contains_key(&name) {
            log::debug!("SchemaRegistry: replacing schema '{}'", name);
        }
        self.schemas.insert(name, Arc::new(schema));
    }

    /// Parse and register a YAML schema.
    pub fn register_yaml(&mut self, name: impl Into<String>, yaml: &str) -> PortResult<()> {
        let schema = CapabilitySchema::from_yaml(yaml)?;
        self.register(name, schema);
        Ok(())
    }

    /// Look up a schema by name.
    pub fn get(&self, name: &str) -> Option<Arc<CapabilitySchema>> {
        self.schemas.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Load a single schema file. `.json` files are parsed as JSON, anything
    /// else as YAML. Returns the registered name.
    pub fn load_file(&mut self, path: &Path) -> PortResult<String> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| PortError::Schema(format!("no file stem in {}", path.display())))?
            .to_string();

        let content = std::fs::read_to_string(path)?;
        let schema = if path.extension().map_or(false, |ext| ext == "json") {
            CapabilitySchema::from_json(&content)?
        } else {
            CapabilitySchema::from_yaml(&content)?
        };
        self.register(name.clone(), schema);
        Ok(name)
    }

    /// Load every `.yaml`, `.yml` and `.json` file under a directory.
    ///
    /// Files that fail to parse are skipped with a warning. Returns the number
    /// of schemas registered.
    pub fn load_directory(&mut self, dir: &Path) -> PortResult<usize> {
        let mut count = 0;
        if !dir.exists() {
            return Ok(0);
        }

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                count += self.load_directory(&path)?;
            } else if path
                .extension()
                .map_or(false, |ext| ext == "yaml" || ext == "yml" || ext == "json")
            {
                match self.load_file(&path) {
                    Ok(_) => count += 1,
                    Err(e) => {
                        log::warn!("Failed to load schema from {}: {}", path.display(), e);
                    }
                }
            }
        }

        Ok(count)
    }
}
