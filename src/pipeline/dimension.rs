//! Dimension registry.
//!
//! Catalog of every dimension known to a pipeline run: name → stable
//! [`DimId`], data type and width. A registry is an explicit value owned by
//! the run context (usually behind an `Arc`), never process-global, so tests
//! build isolated registries freely.
//!
//! Registration takes a write lock and is expected during stage setup.
//! The execution hot path never consults the registry: point buffers work
//! from the frozen [`PointTable`](crate::pipeline::table::PointTable)
//! snapshot produced by the negotiation pass.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::DimId;
use crate::types::{DataType, DimensionKind};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A registered dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub id: DimId,
    pub name: String,
    pub data_type: DataType,
}

impl Dimension {
    pub fn kind(&self) -> DimensionKind {
        self.data_type.kind()
    }

    pub fn byte_size(&self) -> usize {
        self.data_type.byte_size()
    }
}

/// Dimensions every registry built with [`DimensionRegistry::with_defaults`]
/// starts with.
pub const DEFAULT_DIMENSIONS: &[(&str, DataType)] = &[
    ("X", DataType::F64),
    ("Y", DataType::F64),
    ("Z", DataType::F64),
    ("Intensity", DataType::U16),
    ("ReturnNumber", DataType::U8),
    ("NumberOfReturns", DataType::U8),
    ("Classification", DataType::U8),
    ("GpsTime", DataType::F64),
    ("Red", DataType::U16),
    ("Green", DataType::U16),
    ("Blue", DataType::U16),
];

#[derive(Default)]
struct RegistryInner {
    dims: Vec<Dimension>,
    /// Lowercased name → id.
    by_name: HashMap<String, DimId>,
}

/// Name → definition catalog. Dimensions are never removed.
#[derive(Default)]
pub struct DimensionRegistry {
    inner: RwLock<RegistryInner>,
}

impl DimensionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with [`DEFAULT_DIMENSIONS`].
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        {
            let mut inner = registry.write();
            for (name, data_type) in DEFAULT_DIMENSIONS {
                Self::insert(&mut inner, name, *data_type);
            }
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(inner: &mut RegistryInner, name: &str, data_type: DataType) -> DimId {
        let id = DimId(inner.dims.len() as u32);
        inner.dims.push(Dimension {
            id,
            name: name.to_string(),
            data_type,
        });
        inner.by_name.insert(name.to_ascii_lowercase(), id);
        id
    }

    /// Register a dimension by kind and byte width.
    ///
    /// Identical redefinition returns the existing id; a different type or
    /// width fails with `DimensionConflict`.
    pub fn register(
        &self,
        name: &str,
        kind: DimensionKind,
        byte_size: usize,
    ) -> PipelineResult<DimId> {
        let data_type = DataType::from_parts(kind, byte_size)?;
        self.register_type(name, data_type)
    }

    /// Register a dimension by data type. See [`DimensionRegistry::register`].
    pub fn register_type(&self, name: &str, data_type: DataType) -> PipelineResult<DimId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PipelineError::InvalidPipeline(
                "dimension name must not be empty".to_string(),
            ));
        }

        if let Some(existing) = self.check_existing(name, data_type)? {
            return Ok(existing);
        }

        let mut inner = self.write();
        // Another registration may have won the race between the locks.
        if let Some(&id) = inner.by_name.get(&name.to_ascii_lowercase()) {
            let dim = &inner.dims[id.index()];
            return Self::compatible(dim, data_type).map(|_| id);
        }
        let id = Self::insert(&mut inner, name, data_type);
        tracing::debug!("Registered dimension '{}' as {} ({:?})", name, data_type, id);
        Ok(id)
    }

    fn check_existing(&self, name: &str, data_type: DataType) -> PipelineResult<Option<DimId>> {
        let inner = self.read();
        match inner.by_name.get(&name.to_ascii_lowercase()) {
            Some(&id) => Self::compatible(&inner.dims[id.index()], data_type).map(|_| Some(id)),
            None => Ok(None),
        }
    }

    fn compatible(dim: &Dimension, data_type: DataType) -> PipelineResult<()> {
        if dim.data_type == data_type {
            Ok(())
        } else {
            Err(PipelineError::DimensionConflict {
                name: dim.name.clone(),
                existing: dim.data_type.to_string(),
                requested: data_type.to_string(),
            })
        }
    }

    /// Look up a dimension id by name (case-insensitive).
    pub fn lookup(&self, name: &str) -> Option<DimId> {
        self.read()
            .by_name
            .get(&name.trim().to_ascii_lowercase())
            .copied()
    }

    /// Full definition of a registered dimension.
    pub fn describe(&self, id: DimId) -> Option<Dimension> {
        self.read().dims.get(id.index()).cloned()
    }

    /// Number of registered dimensions.
    pub fn len(&self) -> usize {
        self.read().dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DimensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DimensionRegistry")
            .field("dims", &self.len())
            .finish()
    }
}
