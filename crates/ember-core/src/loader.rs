use std::collections::HashMap;

use crate::ast::Value;
use crate::error::EmberError;
use crate::reader::read_source;

/// Supplies the parsed forms of a module by name.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<Vec<Value>, EmberError>;
}

/// Modules registered up front as source text.
#[derive(Default)]
pub struct StaticLoader {
    sources: HashMap<String, String>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(name.into(), source.into());
        self
    }
}

impl ModuleLoader for StaticLoader {
    fn load(&self, name: &str) -> Result<Vec<Value>, EmberError> {
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| EmberError::runtime(format!("module not found: {}", name)))?;
        read_source(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_loader_reads_registered_source() {
        let loader = StaticLoader::new().with_module("m", "(def a 1) (def b 2)");
        assert_eq!(loader.load("m").unwrap().len(), 2);
        assert!(loader.load("missing").is_err());
    }
}
