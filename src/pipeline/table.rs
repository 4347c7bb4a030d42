//! Point table: the active schema of a pipeline run.
//!
//! The table is the ordered set of dimensions stages have declared during
//! the negotiation pass. It only ever grows: adding a dimension that is
//! already active is a no-op, and a retype is rejected by the registry.
//! Besides the columnar view used by [`PointBuffer`](super::buffer::PointBuffer)
//! it maintains a packed fixed-size record layout (`layout_offset`) for
//! stages that serialize whole point records.

use crate::pipeline::dimension::{Dimension, DimensionRegistry};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::DimId;
use crate::types::{DataType, DimensionKind};
use std::sync::Arc;

const NO_COLUMN: u32 = u32::MAX;

/// Active dimension set plus byte layout.
#[derive(Clone)]
pub struct PointTable {
    registry: Arc<DimensionRegistry>,
    /// Active dimensions in declaration order.
    dims: Vec<Dimension>,
    /// `DimId` index → column position, `NO_COLUMN` when inactive.
    columns: Vec<u32>,
    /// Byte offset of each active dimension inside a packed record.
    offsets: Vec<usize>,
    point_size: usize,
}

impl PointTable {
    pub fn new(registry: Arc<DimensionRegistry>) -> Self {
        Self {
            registry,
            dims: Vec::new(),
            columns: Vec::new(),
            offsets: Vec::new(),
            point_size: 0,
        }
    }

    pub fn registry(&self) -> &Arc<DimensionRegistry> {
        &self.registry
    }

    /// Register `name` (if needed) and make it active in this table.
    ///
    /// Returns the existing id when the dimension is already active with the
    /// same type; fails with `DimensionConflict` on a different type.
    pub fn add_dimension(&mut self, name: &str, data_type: DataType) -> PipelineResult<DimId> {
        let id = self.registry.register_type(name, data_type)?;
        if self.column_index(id).is_none() {
            let dim = self.registry.describe(id).ok_or_else(|| {
                PipelineError::InvalidState(format!("registry lost dimension {:?}", id))
            })?;
            self.activate(dim);
        }
        Ok(id)
    }

    /// [`PointTable::add_dimension`] from kind and byte width.
    pub fn add_dimension_parts(
        &mut self,
        name: &str,
        kind: DimensionKind,
        byte_size: usize,
    ) -> PipelineResult<DimId> {
        self.add_dimension(name, DataType::from_parts(kind, byte_size)?)
    }

    fn activate(&mut self, dim: Dimension) {
        let idx = dim.id.index();
        if self.columns.len() <= idx {
            self.columns.resize(idx + 1, NO_COLUMN);
        }
        self.columns[idx] = self.dims.len() as u32;
        self.offsets.push(self.point_size);
        self.point_size += dim.byte_size();
        tracing::trace!("Table gained dimension '{}' ({})", dim.name, dim.data_type);
        self.dims.push(dim);
    }

    /// Whether `name` is active in this table.
    pub fn has_dimension(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Id of the active dimension called `name`.
    pub fn find(&self, name: &str) -> Option<DimId> {
        self.registry
            .lookup(name)
            .filter(|id| self.column_index(*id).is_some())
    }

    /// Like [`PointTable::find`], failing with `MissingDimension`.
    pub fn require(&self, name: &str) -> PipelineResult<DimId> {
        self.find(name)
            .ok_or_else(|| PipelineError::MissingDimension(name.to_string()))
    }

    /// Column position of an active dimension.
    #[inline]
    pub fn column_index(&self, id: DimId) -> Option<usize> {
        match self.columns.get(id.index()) {
            Some(&col) if col != NO_COLUMN => Some(col as usize),
            _ => None,
        }
    }

    /// Byte offset of `id` within a packed point record.
    pub fn layout_offset(&self, id: DimId) -> PipelineResult<usize> {
        self.column_index(id)
            .map(|col| self.offsets[col])
            .ok_or_else(|| PipelineError::MissingDimension(format!("{:?}", id)))
    }

    /// Size in bytes of a packed point record.
    pub fn point_size(&self) -> usize {
        self.point_size
    }

    /// Active dimension ids in declaration order.
    pub fn dimensions(&self) -> Vec<DimId> {
        self.dims.iter().map(|d| d.id).collect()
    }

    /// Active dimension definitions in declaration order.
    pub fn dimension_defs(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn dimension(&self, id: DimId) -> Option<&Dimension> {
        self.column_index(id).map(|col| &self.dims[col])
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// True when `other`'s dimensions are a prefix of this table's, i.e.
    /// this table only appended dimensions.
    pub fn extends(&self, other: &PointTable) -> bool {
        Arc::ptr_eq(&self.registry, &other.registry)
            && other.dims.len() <= self.dims.len()
            && other.dims.iter().zip(&self.dims).all(|(a, b)| a == b)
    }
}

impl std::fmt::Debug for PointTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointTable")
            .field(
                "dims",
                &self.dims.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            )
            .field("point_size", &self.point_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PointTable {
        PointTable::new(Arc::new(DimensionRegistry::with_defaults()))
    }

    #[test]
    fn test_add_dimension_preserves_order() {
        let mut t = table();
        let z = t.add_dimension("Z", DataType::F64).unwrap();
        let x = t.add_dimension("X", DataType::F64).unwrap();
        let i = t.add_dimension("Intensity", DataType::U16).unwrap();
        assert_eq!(t.dimensions(), vec![z, x, i]);
        assert_eq!(t.layout_offset(z).unwrap(), 0);
        assert_eq!(t.layout_offset(x).unwrap(), 8);
        assert_eq!(t.layout_offset(i).unwrap(), 16);
        assert_eq!(t.point_size(), 18);
    }

    #[test]
    fn test_add_existing_is_noop() {
        let mut t = table();
        let a = t.add_dimension("X", DataType::F64).unwrap();
        let b = t.add_dimension("x", DataType::F64).unwrap();
        assert_eq!(a, b);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_add_dimension_parts() {
        let mut t = table();
        let a = t
            .add_dimension_parts("Amplitude", DimensionKind::Float, 4)
            .unwrap();
        assert_eq!(t.dimension(a).unwrap().data_type, DataType::F32);
        let c = t
            .add_dimension_parts("Classification", DimensionKind::Unsigned, 1)
            .unwrap();
        assert_eq!(t.dimensions(), vec![a, c]);

        let err = t
            .add_dimension_parts("Reflectance", DimensionKind::Float, 2)
            .unwrap_err();
        assert!(matches!(err, PipelineError::TypeMismatch(_)));
        assert!(t.find("Reflectance").is_none());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_add_conflicting_type_fails() {
        let mut t = table();
        t.add_dimension("X", DataType::F64).unwrap();
        let err = t.add_dimension("X", DataType::I32).unwrap_err();
        assert!(matches!(err, PipelineError::DimensionConflict { .. }));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_registered_but_inactive_is_missing() {
        let t = table();
        assert!(!t.has_dimension("X"));
        assert!(matches!(
            t.require("X"),
            Err(PipelineError::MissingDimension(_))
        ));
    }

    #[test]
    fn test_extends() {
        let mut a = table();
        a.add_dimension("X", DataType::F64).unwrap();
        let mut b = a.clone();
        b.add_dimension("Scaled", DataType::F64).unwrap();
        assert!(b.extends(&a));
        assert!(!a.extends(&b));
    }
}
