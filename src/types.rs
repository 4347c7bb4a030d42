//! Core data types for pointflow
//!
//! This module contains the scalar type system every dimension is declared
//! with, and the [`PointValue`] trait that maps Rust scalars onto it.
//!
//! # Main Types
//!
//! - [`DimensionKind`] - Signed integer, unsigned integer or floating point
//! - [`DataType`] - A kind paired with a byte width (u8, i32, f64, ...)
//! - [`PointValue`] - Sealed trait implemented by the ten supported scalars
//!
//! # Numeric semantics
//!
//! Nothing in the engine converts between data types implicitly. Reading a
//! `u16` dimension as `f64` through the typed accessors is a type mismatch;
//! conversions are explicit stage logic (see `PointBuffer::get_as_f64`).

use crate::pipeline::buffer::ColumnData;
use crate::pipeline::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

/// Interpretation of a dimension's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimensionKind {
    /// Two's complement signed integer
    Signed,
    /// Unsigned integer
    Unsigned,
    /// IEEE-754 floating point
    Float,
}

impl std::fmt::Display for DimensionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DimensionKind::Signed => write!(f, "signed"),
            DimensionKind::Unsigned => write!(f, "unsigned"),
            DimensionKind::Float => write!(f, "float"),
        }
    }
}

/// Storage type of a dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DataType {
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 8-bit unsigned integer
    U8,
    /// 16-bit unsigned integer
    U16,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit unsigned integer
    U64,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    #[default]
    F64,
}

impl DataType {
    /// Build a data type from its kind and byte width.
    ///
    /// Integers accept 1, 2, 4 and 8 bytes; floats only 4 and 8.
    pub fn from_parts(kind: DimensionKind, byte_size: usize) -> PipelineResult<Self> {
        let ty = match (kind, byte_size) {
            (DimensionKind::Signed, 1) => DataType::I8,
            (DimensionKind::Signed, 2) => DataType::I16,
            (DimensionKind::Signed, 4) => DataType::I32,
            (DimensionKind::Signed, 8) => DataType::I64,
            (DimensionKind::Unsigned, 1) => DataType::U8,
            (DimensionKind::Unsigned, 2) => DataType::U16,
            (DimensionKind::Unsigned, 4) => DataType::U32,
            (DimensionKind::Unsigned, 8) => DataType::U64,
            (DimensionKind::Float, 4) => DataType::F32,
            (DimensionKind::Float, 8) => DataType::F64,
            _ => {
                return Err(PipelineError::TypeMismatch(format!(
                    "no {} type is {} bytes wide",
                    kind, byte_size
                )))
            }
        };
        Ok(ty)
    }

    /// Returns the size in bytes of this type
    pub fn byte_size(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::U64 | DataType::I64 | DataType::F64 => 8,
        }
    }

    pub fn kind(&self) -> DimensionKind {
        match self {
            DataType::I8 | DataType::I16 | DataType::I32 | DataType::I64 => DimensionKind::Signed,
            DataType::U8 | DataType::U16 | DataType::U32 | DataType::U64 => {
                DimensionKind::Unsigned
            }
            DataType::F32 | DataType::F64 => DimensionKind::Float,
        }
    }

    pub fn is_float(&self) -> bool {
        self.kind() == DimensionKind::Float
    }

    /// Parse a type name. Accepts Rust spellings (`u16`, `f64`) and the
    /// long forms common in point-cloud tooling (`uint16`, `double`).
    pub fn parse(name: &str) -> Option<Self> {
        let ty = match name.trim().to_ascii_lowercase().as_str() {
            "i8" | "int8" | "int8_t" | "char" => DataType::I8,
            "i16" | "int16" | "int16_t" | "short" => DataType::I16,
            "i32" | "int32" | "int32_t" | "int" => DataType::I32,
            "i64" | "int64" | "int64_t" | "long" => DataType::I64,
            "u8" | "uint8" | "uint8_t" | "uchar" => DataType::U8,
            "u16" | "uint16" | "uint16_t" | "ushort" => DataType::U16,
            "u32" | "uint32" | "uint32_t" | "uint" => DataType::U32,
            "u64" | "uint64" | "uint64_t" | "ulong" => DataType::U64,
            "f32" | "float" | "float32" => DataType::F32,
            "f64" | "double" | "float64" => DataType::F64,
            _ => return None,
        };
        Some(ty)
    }

    /// Whether `value` can be stored in this type without loss of integer
    /// range. Floats accept any finite or non-finite value.
    pub fn holds_integer(&self, value: i128) -> bool {
        let (min, max): (i128, i128) = match self {
            DataType::I8 => (i8::MIN as i128, i8::MAX as i128),
            DataType::I16 => (i16::MIN as i128, i16::MAX as i128),
            DataType::I32 => (i32::MIN as i128, i32::MAX as i128),
            DataType::I64 => (i64::MIN as i128, i64::MAX as i128),
            DataType::U8 => (0, u8::MAX as i128),
            DataType::U16 => (0, u16::MAX as i128),
            DataType::U32 => (0, u32::MAX as i128),
            DataType::U64 => (0, u64::MAX as i128),
            DataType::F32 | DataType::F64 => return true,
        };
        value >= min && value <= max
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::U8 => write!(f, "u8"),
            DataType::U16 => write!(f, "u16"),
            DataType::U32 => write!(f, "u32"),
            DataType::U64 => write!(f, "u64"),
            DataType::I8 => write!(f, "i8"),
            DataType::I16 => write!(f, "i16"),
            DataType::I32 => write!(f, "i32"),
            DataType::I64 => write!(f, "i64"),
            DataType::F32 => write!(f, "f32"),
            DataType::F64 => write!(f, "f64"),
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A scalar that can be stored in a point buffer column.
///
/// Implemented for the ten primitive types backing [`DataType`]; the trait is
/// sealed so the column storage can rely on the mapping being exhaustive.
pub trait PointValue: sealed::Sealed + Copy + Default + PartialEq + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    /// Explicit widening used by stages that operate on doubles.
    fn to_f64(self) -> f64;

    /// Typed view of a column, `None` when the column holds another type.
    fn slice(column: &ColumnData) -> Option<&[Self]>;

    fn slice_mut(column: &mut ColumnData) -> Option<&mut [Self]>;
}

macro_rules! impl_point_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl PointValue for $ty {
                const DATA_TYPE: DataType = DataType::$variant;

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }

                #[inline]
                fn slice(column: &ColumnData) -> Option<&[Self]> {
                    match column {
                        ColumnData::$variant(values) => Some(values.as_slice()),
                        _ => None,
                    }
                }

                #[inline]
                fn slice_mut(column: &mut ColumnData) -> Option<&mut [Self]> {
                    match column {
                        ColumnData::$variant(values) => Some(values.as_mut_slice()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_point_value! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}
