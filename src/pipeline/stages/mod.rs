//! Built-in stage implementations.

pub mod faux;
pub mod memory;
pub mod range;
pub mod scale;
pub mod script;
pub mod text;

pub use faux::{FauxMode, FauxReader};
pub use memory::{MemoryWriter, NullWriter};
pub use range::RangeFilter;
pub use scale::ScaleFilter;
pub use script::{ScriptFilter, ScriptOutput};
pub use text::{TextReader, TextWriter};
