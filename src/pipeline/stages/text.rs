//! Delimited text reader and writer (`readers.text`, `writers.text`).
//!
//! The first line holds dimension names; every following non-blank line is
//! one point. Columns named after a registered dimension take its type,
//! anything else is registered as `f64`.

use crate::pipeline::buffer::PointBuffer;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::DimId;
use crate::pipeline::options::{OptionSpec, Options};
use crate::pipeline::stage::{Chunk, ChunkResult, ExecStatus, Stage, StageKind};
use crate::pipeline::table::PointTable;
use crate::types::DataType;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

pub const READER_NAME: &str = "readers.text";
pub const READER_DESCRIPTION: &str = "Delimited text with a header row of dimension names";
pub const READER_LINK: &str = "https://pointflow.dev/stages/readers.text";

pub const WRITER_NAME: &str = "writers.text";
pub const WRITER_DESCRIPTION: &str = "Delimited text output with a header row";
pub const WRITER_LINK: &str = "https://pointflow.dev/stages/writers.text";

static READER_OPTIONS: &[OptionSpec] = &[
    OptionSpec::required_string("filename", "File to read"),
    OptionSpec::string("separator", "Field separator; blank splits on whitespace", ","),
];

static WRITER_OPTIONS: &[OptionSpec] = &[
    OptionSpec::required_string("filename", "File to write"),
    OptionSpec::string("delimiter", "Field delimiter", ","),
    OptionSpec::int("precision", "Decimal places for floating point dimensions", 3),
    OptionSpec::list("dimensions", "Dimensions to write, in order (default: all)"),
];

fn split_fields<'a>(line: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.trim().is_empty() {
        line.split_whitespace().collect()
    } else {
        line.split(separator).map(str::trim).collect()
    }
}

fn resource(path: &std::path::Path, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Resource(format!("{}: {}", path.display(), err))
}

pub struct TextReader {
    path: PathBuf,
    separator: String,
    lines: Option<std::io::Lines<BufReader<File>>>,
    header: Vec<String>,
    dims: Vec<DimId>,
    line_no: usize,
}

impl TextReader {
    pub fn new() -> Self {
        Self {
            path: PathBuf::new(),
            separator: ",".to_string(),
            lines: None,
            header: Vec::new(),
            dims: Vec::new(),
            line_no: 0,
        }
    }

    fn next_line(&mut self) -> PipelineResult<Option<String>> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };
        for line in lines.by_ref() {
            self.line_no += 1;
            let line = line.map_err(|e| resource(&self.path, e))?;
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }
}

impl Default for TextReader {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for TextReader {
    fn name(&self) -> &str {
        READER_NAME
    }

    fn kind(&self) -> StageKind {
        StageKind::Reader
    }

    fn option_specs(&self) -> &[OptionSpec] {
        READER_OPTIONS
    }

    fn initialize(&mut self, options: &Options) -> PipelineResult<()> {
        self.path = options
            .get_opt_string("filename")?
            .map(PathBuf::from)
            .ok_or_else(|| {
                PipelineError::InvalidPipeline(format!("{} requires a filename", READER_NAME))
            })?;
        self.separator = options.get_string("separator")?;
        let file = File::open(&self.path).map_err(|e| resource(&self.path, e))?;
        self.lines = Some(BufReader::new(file).lines());
        self.line_no = 0;

        let header = self
            .next_line()?
            .ok_or_else(|| resource(&self.path, "missing header row"))?;
        self.header = split_fields(&header, &self.separator)
            .into_iter()
            .map(|s| s.trim_matches('"').to_string())
            .collect();
        tracing::debug!("{}: columns {:?}", self.path.display(), self.header);
        Ok(())
    }

    fn prepare(&mut self, table: &mut PointTable) -> PipelineResult<()> {
        let registry = table.registry().clone();
        self.dims = self
            .header
            .iter()
            .map(|name| {
                let data_type = registry
                    .lookup(name)
                    .and_then(|id| registry.describe(id))
                    .map(|d| d.data_type)
                    .unwrap_or(DataType::F64);
                table.add_dimension(name, data_type)
            })
            .collect::<PipelineResult<_>>()?;
        Ok(())
    }

    fn execute(&mut self, chunk: Chunk<'_>) -> PipelineResult<ChunkResult> {
        let Chunk::Fill { buffer, limit } = chunk else {
            return Err(PipelineError::InvalidState(format!(
                "{} can only fill buffers",
                READER_NAME
            )));
        };

        let mut read = 0;
        while read < limit {
            let Some(line) = self.next_line()? else {
                return Ok(ChunkResult::Read(ExecStatus::Exhausted));
            };
            let fields = split_fields(&line, &self.separator);
            if fields.len() != self.dims.len() {
                return Err(resource(
                    &self.path,
                    format!(
                        "line {}: expected {} fields, found {}",
                        self.line_no,
                        self.dims.len(),
                        fields.len()
                    ),
                ));
            }
            let idx = buffer.append_point()?;
            for (field, &dim) in fields.iter().zip(&self.dims) {
                let value: f64 = field.parse().map_err(|_| {
                    resource(
                        &self.path,
                        format!("line {}: '{}' is not a number", self.line_no, field),
                    )
                })?;
                buffer.set_f64(idx, dim, value)?;
            }
            read += 1;
        }
        Ok(ChunkResult::Read(ExecStatus::MoreData))
    }

    fn teardown(&mut self) {
        self.lines = None;
    }
}

pub struct TextWriter {
    path: PathBuf,
    delimiter: String,
    precision: usize,
    requested: Vec<String>,
    /// (dimension, is float) in output order.
    columns: Vec<(DimId, bool)>,
    header: Vec<String>,
    out: Option<File>,
    header_written: bool,
}

/// Write all of `bytes`, returning how many reached the file alongside the
/// outcome.
fn write_counted(out: &mut File, bytes: &[u8]) -> (usize, io::Result<()>) {
    let mut written = 0;
    while written < bytes.len() {
        match out.write(&bytes[written..]) {
            Ok(0) => {
                let err = io::Error::new(io::ErrorKind::WriteZero, "file accepted no more bytes");
                return (written, Err(err));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return (written, Err(e)),
        }
    }
    (written, Ok(()))
}

impl TextWriter {
    pub fn new() -> Self {
        Self {
            path: PathBuf::new(),
            delimiter: ",".to_string(),
            precision: 3,
            requested: Vec::new(),
            columns: Vec::new(),
            header: Vec::new(),
            out: None,
            header_written: false,
        }
    }

    fn writer(&mut self) -> PipelineResult<&mut File> {
        self.out
            .as_mut()
            .ok_or_else(|| PipelineError::InvalidState(format!("{} is not open", WRITER_NAME)))
    }

    fn header_line(&self) -> String {
        let mut line = self.header.join(&self.delimiter);
        line.push('\n');
        line
    }

    fn format_point(
        &self,
        buffer: &PointBuffer,
        idx: usize,
        line: &mut String,
    ) -> PipelineResult<()> {
        for (n, &(dim, is_float)) in self.columns.iter().enumerate() {
            if n > 0 {
                line.push_str(&self.delimiter);
            }
            let value = buffer.get_as_f64(idx, dim)?;
            if is_float {
                line.push_str(&format!("{:.*}", self.precision, value));
            } else {
                line.push_str(&format!("{}", value as i128));
            }
        }
        line.push('\n');
        Ok(())
    }
}

impl Default for TextWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for TextWriter {
    fn name(&self) -> &str {
        WRITER_NAME
    }

    fn kind(&self) -> StageKind {
        StageKind::Writer
    }

    fn option_specs(&self) -> &[OptionSpec] {
        WRITER_OPTIONS
    }

    fn initialize(&mut self, options: &Options) -> PipelineResult<()> {
        self.path = options
            .get_opt_string("filename")?
            .map(PathBuf::from)
            .ok_or_else(|| {
                PipelineError::InvalidPipeline(format!("{} requires a filename", WRITER_NAME))
            })?;
        self.delimiter = options.get_string("delimiter")?;
        let precision = options.get_int("precision")?;
        self.precision = usize::try_from(precision).map_err(|_| {
            PipelineError::TypeMismatch(format!("precision must not be negative, got {}", precision))
        })?;
        self.requested = options.get_list("dimensions")?;
        let file = File::create(&self.path).map_err(|e| resource(&self.path, e))?;
        self.out = Some(file);
        self.header_written = false;
        Ok(())
    }

    fn prepare(&mut self, table: &mut PointTable) -> PipelineResult<()> {
        let ids = if self.requested.is_empty() {
            table.dimensions()
        } else {
            self.requested
                .iter()
                .map(|name| table.require(name))
                .collect::<PipelineResult<Vec<_>>>()?
        };
        self.columns.clear();
        self.header.clear();
        for id in ids {
            let dim = table
                .dimension(id)
                .ok_or_else(|| PipelineError::MissingDimension(format!("{:?}", id)))?;
            self.columns.push((id, dim.data_type.is_float()));
            self.header.push(dim.name.clone());
        }
        Ok(())
    }

    /// Formats the whole chunk, then writes it straight to the file. Only
    /// points whose line fully reached the file count as committed.
    fn execute(&mut self, chunk: Chunk<'_>) -> PipelineResult<ChunkResult> {
        let buffer = chunk.buffer();

        let mut text = if self.header_written {
            String::new()
        } else {
            self.header_line()
        };
        let header_len = text.len();
        let mut ends = Vec::with_capacity(buffer.size());
        for idx in 0..buffer.size() {
            self.format_point(buffer, idx, &mut text)?;
            ends.push(text.len());
        }

        let path = self.path.clone();
        let (written, result) = write_counted(self.writer()?, text.as_bytes());
        if written >= header_len {
            self.header_written = true;
        }
        let committed = ends.iter().take_while(|&&end| end <= written).count();

        match result {
            Ok(()) => Ok(ChunkResult::Committed(committed)),
            Err(e) => {
                tracing::warn!(
                    "{}: write failed after {} of {} points",
                    path.display(),
                    committed,
                    buffer.size()
                );
                Err(resource(&path, e).partial(committed))
            }
        }
    }

    fn finish(&mut self) -> PipelineResult<()> {
        let path = self.path.clone();
        if !self.header_written {
            let header = self.header_line();
            self.writer()?
                .write_all(header.as_bytes())
                .map_err(|e| resource(&path, e))?;
            self.header_written = true;
        }
        self.writer()?.flush().map_err(|e| resource(&path, e))?;
        tracing::debug!("Closed {}", path.display());
        Ok(())
    }

    fn teardown(&mut self) {
        self.out = None;
    }
}
