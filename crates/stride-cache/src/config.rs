//! Configuration for the cache layer.

use std::collections::HashMap;
use std::time::Duration;

use stride_types::{HasCacheConfig, ResourceKind, config_defaults};

use crate::shape::{Shape, ShapeRegistry};

/// Cache layer settings: per-kind TTLs, front capacity and payload shapes.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// TTL per resource kind. Kinds without an entry use the built-in default.
    pub ttls: HashMap<ResourceKind, Duration>,

    /// Maximum entries kept in the in-memory front before LRU eviction.
    pub max_entries: usize,

    /// Structural checks applied on write and on read-back.
    pub shapes: ShapeRegistry,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttls: ResourceKind::ALL
                .iter()
                .map(|kind| (*kind, config_defaults::ttl_for(*kind)))
                .collect(),
            max_entries: config_defaults::MAX_ENTRIES,
            shapes: ShapeRegistry::default(),
        }
    }
}

impl CacheSettings {
    /// Create settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build settings from any cache configuration provider.
    pub fn from_config<C: HasCacheConfig>(config: &C) -> Self {
        Self {
            ttls: ResourceKind::ALL
                .iter()
                .map(|kind| (*kind, config.ttl_for(*kind)))
                .collect(),
            max_entries: config.max_entries(),
            shapes: ShapeRegistry::default(),
        }
    }

    /// Set the TTL for one kind.
    pub fn with_ttl(mut self, kind: ResourceKind, ttl: Duration) -> Self {
        self.ttls.insert(kind, ttl);
        self
    }

    /// Set the in-memory front capacity.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Replace the shape for one kind.
    pub fn with_shape(mut self, kind: ResourceKind, shape: Shape) -> Self {
        self.shapes.register(kind, shape);
        self
    }

    /// Replace the whole shape registry.
    pub fn with_shapes(mut self, shapes: ShapeRegistry) -> Self {
        self.shapes = shapes;
        self
    }

    /// TTL for the given kind.
    pub fn ttl_for(&self, kind: ResourceKind) -> Duration {
        self.ttls
            .get(&kind)
            .copied()
            .unwrap_or_else(|| config_defaults::ttl_for(kind))
    }
}
