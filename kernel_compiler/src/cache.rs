//! The compiled-code cache.
//!
//! Keys derive from the printed IR of the query template and the row
//! function; identical fingerprints are observationally equivalent kernels.
//! A hit returns the previously finalized code object and the fresh module
//! is dropped; a miss finalizes a new engine and installs it.
use std::sync::Arc;

use hashbrown::HashMap;
use observability_deps::tracing::debug;

use crate::engine::ExecutionEngine;
use crate::ir::Module;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeCacheKey {
    pub query_ir: String,
    pub row_ir: String,
}

impl CodeCacheKey {
    pub fn for_module(module: &Module) -> Self {
        Self {
            query_ir: module.query_func.fingerprint(),
            row_ir: module.row_func.fingerprint(),
        }
    }
}

/// One process-wide cache per executor and device class, mutex-protected by
/// its owner.
#[derive(Debug, Default)]
pub struct CodeCache {
    entries: HashMap<CodeCacheKey, Arc<ExecutionEngine>>,
}

impl CodeCache {
    pub fn get(&self, key: &CodeCacheKey) -> Option<Arc<ExecutionEngine>> {
        let hit = self.entries.get(key).map(Arc::clone);
        debug!(hit = hit.is_some(), "code cache lookup");
        hit
    }

    pub fn put(&mut self, key: CodeCacheKey, engine: Arc<ExecutionEngine>) {
        self.entries.insert(key, engine);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
