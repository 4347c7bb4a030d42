//! Columnar point buffer: the unit of data moved between stages.
//!
//! A `PointBuffer` holds one typed column per active dimension of the
//! [`PointTable`] it was created from. Columns are allocated once for the
//! buffer's capacity and reused across chunks: `clear()` only resets the
//! fill count.
//!
//! Storage is columnar rather than interleaved because stages typically
//! touch a few dimensions per point, and because a dimension appended to
//! the schema becomes one more column without re-laying-out the others
//! (see [`PointBuffer::rebind`]).
//!
//! # Access rules
//!
//! - `get` reads only filled points (`index < size`), otherwise `OutOfRange`.
//! - `set` at `index == size` appends; at `index >= capacity` it fails with
//!   `CapacityExceeded`; beyond `size` it fails with `OutOfRange` (no gaps).
//! - The Rust type used for access must match the dimension's declared type
//!   exactly; widening to `f64` is the explicit `get_as_f64`.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::DimId;
use crate::pipeline::table::PointTable;
use crate::types::{DataType, PointValue};
use std::sync::Arc;

/// Upper bound on the capacity a single buffer may grow to by itself.
/// 2^24 points of a 40-byte schema is ~640MB.
pub const DEFAULT_MAX_POINTS: usize = 1 << 24;

/// One typed column of point values.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Run `$body` with `$v` bound to the inner `Vec` of whatever variant
/// `$col` holds.
macro_rules! each_column {
    ($col:expr, $v:ident => $body:expr) => {
        match $col {
            ColumnData::I8($v) => $body,
            ColumnData::I16($v) => $body,
            ColumnData::I32($v) => $body,
            ColumnData::I64($v) => $body,
            ColumnData::U8($v) => $body,
            ColumnData::U16($v) => $body,
            ColumnData::U32($v) => $body,
            ColumnData::U64($v) => $body,
            ColumnData::F32($v) => $body,
            ColumnData::F64($v) => $body,
        }
    };
}

impl ColumnData {
    /// A zero-filled column of `len` values.
    pub fn zeroed(data_type: DataType, len: usize) -> Self {
        match data_type {
            DataType::I8 => ColumnData::I8(vec![0; len]),
            DataType::I16 => ColumnData::I16(vec![0; len]),
            DataType::I32 => ColumnData::I32(vec![0; len]),
            DataType::I64 => ColumnData::I64(vec![0; len]),
            DataType::U8 => ColumnData::U8(vec![0; len]),
            DataType::U16 => ColumnData::U16(vec![0; len]),
            DataType::U32 => ColumnData::U32(vec![0; len]),
            DataType::U64 => ColumnData::U64(vec![0; len]),
            DataType::F32 => ColumnData::F32(vec![0.0; len]),
            DataType::F64 => ColumnData::F64(vec![0.0; len]),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::I8(_) => DataType::I8,
            ColumnData::I16(_) => DataType::I16,
            ColumnData::I32(_) => DataType::I32,
            ColumnData::I64(_) => DataType::I64,
            ColumnData::U8(_) => DataType::U8,
            ColumnData::U16(_) => DataType::U16,
            ColumnData::U32(_) => DataType::U32,
            ColumnData::U64(_) => DataType::U64,
            ColumnData::F32(_) => DataType::F32,
            ColumnData::F64(_) => DataType::F64,
        }
    }

    pub fn len(&self) -> usize {
        each_column!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `index` widened to `f64`.
    #[inline]
    pub fn value_f64(&self, index: usize) -> f64 {
        each_column!(self, v => v[index].to_f64())
    }

    /// Store `value` converted to this column's type. Integer columns only
    /// accept finite integral values within range; `f32` columns reject
    /// finite values that would overflow to infinity.
    fn store_f64(&mut self, index: usize, value: f64) -> bool {
        macro_rules! int {
            ($v:expr) => {
                match integral(value) {
                    Some(i) => match i.try_into() {
                        Ok(x) => {
                            $v[index] = x;
                            true
                        }
                        Err(_) => false,
                    },
                    None => false,
                }
            };
        }
        match self {
            ColumnData::I8(v) => int!(v),
            ColumnData::I16(v) => int!(v),
            ColumnData::I32(v) => int!(v),
            ColumnData::I64(v) => int!(v),
            ColumnData::U8(v) => int!(v),
            ColumnData::U16(v) => int!(v),
            ColumnData::U32(v) => int!(v),
            ColumnData::U64(v) => int!(v),
            ColumnData::F32(v) => {
                let narrowed = value as f32;
                if narrowed.is_infinite() && value.is_finite() {
                    return false;
                }
                v[index] = narrowed;
                true
            }
            ColumnData::F64(v) => {
                v[index] = value;
                true
            }
        }
    }

    fn resize(&mut self, len: usize) {
        each_column!(self, v => v.resize(len, Default::default()))
    }

    fn zero_at(&mut self, index: usize) {
        each_column!(self, v => v[index] = Default::default())
    }

    /// Move every kept value of `[0, keep.len())` to the front, in order.
    fn compact(&mut self, keep: &[bool]) {
        each_column!(self, v => compact_values(v.as_mut_slice(), keep))
    }

    /// Copy `count` values from `src[0..]` into `self[dst_start..]`.
    fn copy_from(&mut self, dst_start: usize, src: &ColumnData, count: usize) -> bool {
        each_column!(self, v => copy_values(&mut v[dst_start..dst_start + count], src))
    }
}

fn integral(value: f64) -> Option<i128> {
    if value.is_finite() && value.fract() == 0.0 {
        Some(value as i128)
    } else {
        None
    }
}

fn compact_values<T: Copy>(values: &mut [T], keep: &[bool]) {
    let mut write = 0;
    for (read, &kept) in keep.iter().enumerate() {
        if kept {
            values[write] = values[read];
            write += 1;
        }
    }
}

fn copy_values<T: PointValue>(dst: &mut [T], src: &ColumnData) -> bool {
    match T::slice(src) {
        Some(values) => {
            dst.copy_from_slice(&values[..dst.len()]);
            true
        }
        None => false,
    }
}

/// A growable batch of points in columnar storage.
#[derive(Clone)]
pub struct PointBuffer {
    table: Arc<PointTable>,
    columns: Vec<ColumnData>,
    size: usize,
    capacity: usize,
    max_capacity: usize,
}

impl PointBuffer {
    /// Create a zero-filled buffer able to hold `capacity` points.
    pub fn new(table: Arc<PointTable>, capacity: usize) -> Self {
        Self::with_max_capacity(table, capacity, DEFAULT_MAX_POINTS.max(capacity))
    }

    /// Create a buffer whose geometric growth stops at `max_capacity`.
    pub fn with_max_capacity(table: Arc<PointTable>, capacity: usize, max_capacity: usize) -> Self {
        let capacity = capacity.min(max_capacity);
        let columns = table
            .dimension_defs()
            .iter()
            .map(|d| ColumnData::zeroed(d.data_type, capacity))
            .collect();
        Self {
            table,
            columns,
            size: 0,
            capacity,
            max_capacity,
        }
    }

    pub fn table(&self) -> &Arc<PointTable> {
        &self.table
    }

    /// Number of filled points.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of points the storage currently holds.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Reset the fill count, keeping the storage for reuse.
    #[inline]
    pub fn clear(&mut self) {
        self.size = 0;
    }

    fn position(&self, dim: DimId) -> PipelineResult<usize> {
        self.table
            .column_index(dim)
            .ok_or_else(|| PipelineError::MissingDimension(self.dim_name(dim)))
    }

    fn dim_name(&self, dim: DimId) -> String {
        self.table
            .registry()
            .describe(dim)
            .map(|d| d.name)
            .unwrap_or_else(|| format!("{:?}", dim))
    }

    fn mismatch<T: PointValue>(&self, dim: DimId, col: usize) -> PipelineError {
        PipelineError::TypeMismatch(format!(
            "dimension '{}' is {}, accessed as {}",
            self.dim_name(dim),
            self.columns[col].data_type(),
            T::DATA_TYPE
        ))
    }

    /// Read a filled point's value.
    pub fn get<T: PointValue>(&self, index: usize, dim: DimId) -> PipelineResult<T> {
        let col = self.position(dim)?;
        if index >= self.size {
            return Err(PipelineError::OutOfRange {
                index,
                size: self.size,
            });
        }
        T::slice(&self.columns[col])
            .map(|values| values[index])
            .ok_or_else(|| self.mismatch::<T>(dim, col))
    }

    /// Read any dimension widened to `f64`.
    pub fn get_as_f64(&self, index: usize, dim: DimId) -> PipelineResult<f64> {
        let col = self.position(dim)?;
        if index >= self.size {
            return Err(PipelineError::OutOfRange {
                index,
                size: self.size,
            });
        }
        Ok(self.columns[col].value_f64(index))
    }

    /// Write a value, appending when `index == size`.
    pub fn set<T: PointValue>(&mut self, index: usize, dim: DimId, value: T) -> PipelineResult<()> {
        if index >= self.capacity {
            return Err(PipelineError::CapacityExceeded {
                index,
                capacity: self.capacity,
            });
        }
        if index > self.size {
            return Err(PipelineError::OutOfRange {
                index,
                size: self.size,
            });
        }
        let col = self.position(dim)?;
        if T::slice(&self.columns[col]).is_none() {
            return Err(self.mismatch::<T>(dim, col));
        }
        if index == self.size {
            self.zero_point(index);
            self.size += 1;
        }
        if let Some(values) = T::slice_mut(&mut self.columns[col]) {
            values[index] = value;
        }
        Ok(())
    }

    /// Write an `f64` into any column, converting explicitly to the
    /// dimension's type. Appends when `index == size`. Fails with
    /// `TypeMismatch` when an integer column cannot represent the value.
    pub fn set_f64(&mut self, index: usize, dim: DimId, value: f64) -> PipelineResult<()> {
        if index >= self.capacity {
            return Err(PipelineError::CapacityExceeded {
                index,
                capacity: self.capacity,
            });
        }
        if index > self.size {
            return Err(PipelineError::OutOfRange {
                index,
                size: self.size,
            });
        }
        let col = self.position(dim)?;
        let appending = index == self.size;
        if appending {
            self.zero_point(index);
        }
        if !self.columns[col].store_f64(index, value) {
            return Err(PipelineError::TypeMismatch(format!(
                "{} does not fit dimension '{}' ({})",
                value,
                self.dim_name(dim),
                self.columns[col].data_type()
            )));
        }
        if appending {
            self.size += 1;
        }
        Ok(())
    }

    fn zero_point(&mut self, index: usize) {
        for column in &mut self.columns {
            column.zero_at(index);
        }
    }

    /// Reserve the next point slot (zero-filled), growing storage by
    /// doubling when full. Fails with `CapacityExceeded` at `max_capacity`.
    pub fn append_point(&mut self) -> PipelineResult<usize> {
        if self.size == self.capacity {
            let grown = (self.capacity.max(1) * 2).min(self.max_capacity);
            if grown <= self.capacity {
                return Err(PipelineError::CapacityExceeded {
                    index: self.size,
                    capacity: self.capacity,
                });
            }
            self.grow_to(grown);
        }
        let index = self.size;
        self.zero_point(index);
        self.size += 1;
        Ok(index)
    }

    /// Ensure room for at least `capacity` points.
    pub fn reserve(&mut self, capacity: usize) -> PipelineResult<()> {
        if capacity <= self.capacity {
            return Ok(());
        }
        if capacity > self.max_capacity {
            return Err(PipelineError::CapacityExceeded {
                index: capacity - 1,
                capacity: self.max_capacity,
            });
        }
        self.grow_to(capacity);
        Ok(())
    }

    fn grow_to(&mut self, capacity: usize) {
        for column in &mut self.columns {
            column.resize(capacity);
        }
        tracing::trace!("Point buffer grew {} -> {}", self.capacity, capacity);
        self.capacity = capacity;
    }

    /// Typed view of the filled prefix of a column.
    pub fn column<T: PointValue>(&self, dim: DimId) -> PipelineResult<&[T]> {
        let col = self.position(dim)?;
        match T::slice(&self.columns[col]) {
            Some(values) => Ok(&values[..self.size]),
            None => Err(self.mismatch::<T>(dim, col)),
        }
    }

    /// Mutable typed view of the filled prefix of a column.
    pub fn column_mut<T: PointValue>(&mut self, dim: DimId) -> PipelineResult<&mut [T]> {
        let col = self.position(dim)?;
        if T::slice(&self.columns[col]).is_none() {
            return Err(self.mismatch::<T>(dim, col));
        }
        let size = self.size;
        match T::slice_mut(&mut self.columns[col]) {
            Some(values) => Ok(&mut values[..size]),
            None => Err(PipelineError::InvalidState("column type changed".to_string())),
        }
    }

    /// Untyped column storage (full capacity; only `[0, size)` is filled).
    pub fn column_data(&self, dim: DimId) -> PipelineResult<&ColumnData> {
        let col = self.position(dim)?;
        Ok(&self.columns[col])
    }

    /// Drop every point whose `keep` flag is false; survivors are moved to
    /// the front in their original order. Returns the number removed.
    pub fn retain(&mut self, keep: &[bool]) -> PipelineResult<usize> {
        if keep.len() != self.size {
            return Err(PipelineError::InvalidState(format!(
                "retain mask has {} entries for {} points",
                keep.len(),
                self.size
            )));
        }
        let kept = keep.iter().filter(|&&k| k).count();
        if kept != self.size {
            for column in &mut self.columns {
                column.compact(keep);
            }
        }
        let removed = self.size - kept;
        self.size = kept;
        Ok(removed)
    }

    /// Append every point of `other`, which must share this buffer's schema.
    pub fn extend_from(&mut self, other: &PointBuffer) -> PipelineResult<()> {
        if !(self.table.extends(&other.table) && other.table.extends(&self.table)) {
            return Err(PipelineError::TypeMismatch(
                "cannot append points of a different schema".to_string(),
            ));
        }
        let needed = self.size + other.size;
        if needed > self.capacity {
            let mut grown = self.capacity.max(1);
            while grown < needed {
                grown *= 2;
            }
            self.reserve(grown.min(self.max_capacity).max(needed))?;
        }
        let start = self.size;
        for (dst, src) in self.columns.iter_mut().zip(&other.columns) {
            if !dst.copy_from(start, src, other.size) {
                return Err(PipelineError::TypeMismatch(
                    "column types differ between buffers".to_string(),
                ));
            }
        }
        self.size = needed;
        Ok(())
    }

    /// Move this buffer onto `table`, which must only append dimensions to
    /// the current one. New columns are zero-filled.
    pub fn rebind(&mut self, table: Arc<PointTable>) -> PipelineResult<()> {
        if !table.extends(&self.table) {
            return Err(PipelineError::TypeMismatch(
                "new table drops or retypes existing dimensions".to_string(),
            ));
        }
        for dim in &table.dimension_defs()[self.columns.len()..] {
            self.columns
                .push(ColumnData::zeroed(dim.data_type, self.capacity));
        }
        self.table = table;
        Ok(())
    }
}

impl std::fmt::Debug for PointBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointBuffer")
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .field("columns", &self.columns.len())
            .finish()
    }
}
