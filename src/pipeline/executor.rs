//! Pipeline executor: graph building, schema negotiation and chunked
//! execution.
//!
//! A run goes through three driven passes over the compiled stage order:
//! 1. `initialize` freezes each stage's options and lets it acquire resources.
//! 2. `prepare` threads one `PointTable` through every stage (upstream first),
//!    then freezes it into an `Arc` snapshot shared by every chunk buffer.
//! 3. `execute` drains the readers one after another. Each chunk is pushed
//!    through the downstream graph before the next is pulled, so a stage
//!    with several inputs sees them in connection order whatever the chunk
//!    size. `finish` runs once every reader is exhausted.
//!
//! Any failure tears down every stage that entered `initialize`, in reverse
//! order, and surfaces one `PipelineError::Stage` naming the stage, phase
//! and the number of points writers had committed.

use crate::config::ExecutionConfig;
use crate::pipeline::buffer::PointBuffer;
use crate::pipeline::compiled_plan::CompiledPlan;
use crate::pipeline::compiler::PipelineCompiler;
use crate::pipeline::dimension::DimensionRegistry;
use crate::pipeline::error::{PipelineError, PipelineResult, StagePhase};
use crate::pipeline::factory::StageInstance;
use crate::pipeline::id::StageId;
use crate::pipeline::options::{Options, DEBUG_OPTION, VERBOSE_OPTION};
use crate::pipeline::stage::{AnyStage, Chunk, ChunkResult, ExecStatus, StageKind, StageState};
use crate::pipeline::table::PointTable;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-chunk events go to `debug` for stages with `debug`/`verbose` set,
/// `trace` otherwise.
macro_rules! chunk_event {
    ($slot:expr, $($arg:tt)+) => {
        if $slot.chatty {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

/// A slot holding a stage, its options and its run bookkeeping.
pub struct StageSlot {
    pub stage: AnyStage,
    pub options: Options,
    pub tag: Option<String>,
    pub state: StageState,
    /// Points this stage committed (writers only).
    pub committed: u64,
    chatty: bool,
}

impl StageSlot {
    pub fn new(instance: StageInstance, tag: Option<String>) -> Self {
        Self {
            stage: instance.stage,
            options: instance.options,
            tag,
            state: StageState::Constructed,
            committed: 0,
            chatty: false,
        }
    }

    /// Tag if one was given, else the stage type name.
    pub fn label(&self) -> &str {
        self.tag.as_deref().unwrap_or_else(|| self.stage.name())
    }
}

/// Outcome of a completed (or cancelled) run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub points_read: u64,
    pub chunks: u64,
    /// Points committed per writer, in stage order.
    pub committed: Vec<(String, u64)>,
    /// The stop flag ended the run at a chunk boundary.
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn total_committed(&self) -> u64 {
        self.committed.iter().map(|(_, n)| n).sum()
    }
}

// ==================== Builder ====================

/// A stage graph under construction.
pub struct PipelineBuilder {
    slots: Vec<StageSlot>,
    edges: Vec<(usize, usize)>,
    tags: HashMap<String, StageId>,
    settings: ExecutionConfig,
    registry: Option<Arc<DimensionRegistry>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::with_settings(ExecutionConfig::default())
    }

    pub fn with_settings(settings: ExecutionConfig) -> Self {
        Self {
            slots: Vec::new(),
            edges: Vec::new(),
            tags: HashMap::new(),
            settings,
            registry: None,
        }
    }

    /// Use `registry` instead of a fresh one with the default dimensions.
    pub fn registry(mut self, registry: Arc<DimensionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Add a stage. Tags must be unique within the pipeline.
    pub fn add_stage(
        &mut self,
        tag: Option<&str>,
        instance: StageInstance,
    ) -> PipelineResult<StageId> {
        let id = StageId(self.slots.len() as u32);
        if let Some(tag) = tag {
            if self.tags.contains_key(tag) {
                return Err(PipelineError::InvalidPipeline(format!(
                    "duplicate stage tag '{}'",
                    tag
                )));
            }
            self.tags.insert(tag.to_string(), id);
        }
        self.slots
            .push(StageSlot::new(instance, tag.map(str::to_string)));
        Ok(id)
    }

    /// Add an untagged stage with default options.
    pub fn add(&mut self, stage: impl Into<AnyStage>) -> StageId {
        let id = StageId(self.slots.len() as u32);
        self.slots
            .push(StageSlot::new(StageInstance::new(stage), None));
        id
    }

    /// Feed the output of `from` into `to`.
    pub fn connect(&mut self, from: StageId, to: StageId) -> PipelineResult<()> {
        for id in [from, to] {
            if id.index() >= self.slots.len() {
                return Err(PipelineError::InvalidPipeline(format!(
                    "{} does not name a stage in this pipeline",
                    id
                )));
            }
        }
        self.edges.push((from.index(), to.index()));
        Ok(())
    }

    pub fn find_tag(&self, tag: &str) -> Option<StageId> {
        self.tags.get(tag).copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Validate the graph and produce a runnable pipeline.
    pub fn build(self) -> PipelineResult<Pipeline> {
        Self::check_settings(&self.settings)?;
        let kinds: Vec<StageKind> = self.slots.iter().map(|s| s.stage.kind()).collect();
        let plan = PipelineCompiler::compile(&kinds, &self.edges)?;
        PipelineCompiler::check_joins(&plan)?;

        tracing::info!(
            "Pipeline compiled: {} stages ({} readers, {} filters, {} writers) in {}us",
            plan.stats.total_stages,
            plan.stats.readers,
            plan.stats.filters,
            plan.stats.writers,
            plan.stats.compile_time_us,
        );
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot.stage.kind() == StageKind::Filter && plan.consumers[idx].is_empty() {
                tracing::warn!(
                    "Filter '{}' has no downstream stage; its output is discarded",
                    slot.label()
                );
            }
        }

        Ok(Pipeline {
            slots: self.slots,
            plan,
            settings: self.settings,
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(DimensionRegistry::with_defaults())),
            tags: self.tags,
            table: None,
            stop: Arc::new(AtomicBool::new(false)),
            initialized: Vec::new(),
            torn_down: false,
        })
    }
}

impl PipelineBuilder {
    fn check_settings(settings: &ExecutionConfig) -> PipelineResult<()> {
        if settings.chunk_size == 0 {
            return Err(PipelineError::InvalidPipeline(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if settings.max_buffer_points < settings.chunk_size {
            return Err(PipelineError::InvalidPipeline(format!(
                "max_buffer_points ({}) is smaller than chunk_size ({})",
                settings.max_buffer_points, settings.chunk_size
            )));
        }
        Ok(())
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Pipeline ====================

/// A validated stage DAG and its run state.
pub struct Pipeline {
    slots: Vec<StageSlot>,
    plan: CompiledPlan,
    settings: ExecutionConfig,
    registry: Arc<DimensionRegistry>,
    tags: HashMap<String, StageId>,
    /// Schema snapshot, set once negotiation completes.
    table: Option<Arc<PointTable>>,
    stop: Arc<AtomicBool>,
    /// Stages that entered `initialize`, in order.
    initialized: Vec<usize>,
    torn_down: bool,
}

impl Pipeline {
    // ── Accessors ──

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn plan(&self) -> &CompiledPlan {
        &self.plan
    }

    pub fn settings(&self) -> &ExecutionConfig {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<DimensionRegistry> {
        &self.registry
    }

    /// The negotiated schema; `None` before `prepare`.
    pub fn table(&self) -> Option<&Arc<PointTable>> {
        self.table.as_ref()
    }

    pub fn stage(&self, id: StageId) -> Option<&AnyStage> {
        self.slots.get(id.index()).map(|s| &s.stage)
    }

    pub fn state(&self, id: StageId) -> Option<StageState> {
        self.slots.get(id.index()).map(|s| s.state)
    }

    pub fn find_tag(&self, tag: &str) -> Option<StageId> {
        self.tags.get(tag).copied()
    }

    /// Points collected by the `writers.memory` stage `id`.
    pub fn memory_output(&self, id: StageId) -> Option<&PointBuffer> {
        self.stage(id).and_then(AnyStage::memory_points)
    }

    /// Cooperative stop flag, checked before every chunk is pulled.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn committed_total(&self) -> u64 {
        self.slots.iter().map(|s| s.committed).sum()
    }

    fn expect_state(&self, state: StageState, action: &str) -> PipelineResult<()> {
        match self.slots.iter().find(|s| s.state != state) {
            Some(slot) => Err(PipelineError::InvalidState(format!(
                "cannot {} stage '{}' in state {:?}",
                action,
                slot.label(),
                slot.state
            ))),
            None => Ok(()),
        }
    }

    /// Tear everything down and attribute `err` to stage `idx`.
    fn abort(&mut self, idx: usize, phase: StagePhase, err: PipelineError) -> PipelineError {
        let label = self.slots[idx].label().to_string();
        let committed = self.committed_total();
        tracing::error!("Stage '{}' failed during {}: {}", label, phase, err);
        self.teardown_all();
        err.in_stage(label, phase, committed)
    }

    /// Reverse-order teardown of every stage that entered `initialize`.
    fn teardown_all(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        for &idx in self.initialized.iter().rev() {
            let slot = &mut self.slots[idx];
            slot.stage.teardown();
            slot.state = StageState::Done;
        }
        tracing::debug!("Tore down {} stages", self.initialized.len());
    }

    // ── Lifecycle ──

    /// Initialize, prepare and execute.
    pub fn run(&mut self) -> PipelineResult<RunSummary> {
        self.initialize()?;
        self.prepare()?;
        self.execute()
    }

    pub fn initialize(&mut self) -> PipelineResult<()> {
        self.expect_state(StageState::Constructed, "initialize")?;

        for pos in 0..self.plan.order.len() {
            let idx = self.plan.order[pos];
            self.initialized.push(idx);

            let slot = &mut self.slots[idx];
            slot.options.freeze();
            slot.chatty = slot.options.get_bool(DEBUG_OPTION).unwrap_or(false)
                || slot.options.get_int(VERBOSE_OPTION).unwrap_or(0) > 0;
            if let Err(e) = slot.stage.initialize(&slot.options) {
                return Err(self.abort(idx, StagePhase::Initialize, e));
            }
            slot.state = StageState::Initialized;
            tracing::debug!("Initialized stage '{}'", slot.label());
        }

        tracing::info!("Initialized {} stages", self.slots.len());
        Ok(())
    }

    /// Negotiation pass: every stage sees the dimensions declared upstream
    /// of it, in declaration order.
    pub fn prepare(&mut self) -> PipelineResult<()> {
        self.expect_state(StageState::Initialized, "prepare")?;

        let mut table = PointTable::new(Arc::clone(&self.registry));
        for pos in 0..self.plan.order.len() {
            let idx = self.plan.order[pos];
            let before = table.len();

            let slot = &mut self.slots[idx];
            if let Err(e) = slot.stage.prepare(&mut table) {
                return Err(self.abort(idx, StagePhase::Prepare, e));
            }
            slot.state = StageState::Prepared;
            tracing::debug!(
                "Stage '{}' prepared: {} new, {} total dimensions",
                slot.label(),
                table.len() - before,
                table.len()
            );
        }

        let names: Vec<&str> = table
            .dimension_defs()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        tracing::info!("Schema negotiated: {}", names.join(", "));
        self.table = Some(Arc::new(table));
        Ok(())
    }

    /// Execution pass. Returns normally when every reader is exhausted or
    /// the stop flag was raised.
    pub fn execute(&mut self) -> PipelineResult<RunSummary> {
        self.expect_state(StageState::Prepared, "execute")?;
        let table = self.table.clone().ok_or_else(|| {
            PipelineError::InvalidState("execute called before prepare".to_string())
        })?;
        for slot in &mut self.slots {
            slot.state = StageState::Executing;
        }

        let start = Instant::now();
        let mut summary = RunSummary::default();
        let roots = self.plan.roots.clone();
        'drain: for root in roots {
            let mut buffer = PointBuffer::with_max_capacity(
                Arc::clone(&table),
                self.settings.chunk_size,
                self.settings.max_buffer_points,
            );
            loop {
                if self.stop.load(Ordering::Relaxed) {
                    summary.cancelled = true;
                    break 'drain;
                }

                buffer.clear();
                let status = self.pull(root, &mut buffer)?;
                summary.points_read += buffer.size() as u64;
                summary.chunks += 1;
                if !buffer.is_empty() {
                    self.propagate(root, &mut buffer)?;
                }

                if status == ExecStatus::Exhausted {
                    tracing::debug!("Reader '{}' exhausted", self.slots[root].label());
                    break;
                }
            }
        }

        if summary.cancelled {
            tracing::info!("Pipeline cancelled after {} chunks", summary.chunks);
        } else {
            for pos in 0..self.plan.order.len() {
                let idx = self.plan.order[pos];
                if let Err(e) = self.slots[idx].stage.finish() {
                    return Err(self.abort(idx, StagePhase::Finish, e));
                }
                self.slots[idx].state = StageState::Done;
            }
        }
        self.teardown_all();

        summary.committed = self
            .slots
            .iter()
            .filter(|s| s.stage.kind() == StageKind::Writer)
            .map(|s| (s.label().to_string(), s.committed))
            .collect();
        summary.elapsed = start.elapsed();

        tracing::info!(
            "Pipeline finished: {} points read in {} chunks, {} committed ({:.1?})",
            summary.points_read,
            summary.chunks,
            summary.total_committed(),
            summary.elapsed
        );
        Ok(summary)
    }

    // ── Chunk flow ──

    fn pull(&mut self, root: usize, buffer: &mut PointBuffer) -> PipelineResult<ExecStatus> {
        let limit = self.settings.chunk_size;
        let result = self.slots[root].stage.execute(Chunk::Fill {
            buffer: &mut *buffer,
            limit,
        });

        let status = match result {
            Ok(ChunkResult::Read(status)) => status,
            Ok(other) => {
                let err = PipelineError::InvalidState(format!("reader returned {:?}", other));
                return Err(self.abort(root, StagePhase::Execute, err));
            }
            Err(e) => return Err(self.abort(root, StagePhase::Execute, e)),
        };
        if buffer.size() > limit {
            let err = PipelineError::InvalidState(format!(
                "reader produced {} points for a chunk of {}",
                buffer.size(),
                limit
            ));
            return Err(self.abort(root, StagePhase::Execute, err));
        }

        let slot = &self.slots[root];
        chunk_event!(slot, "Reader '{}' produced {} points", slot.label(), buffer.size());
        Ok(status)
    }

    /// Hand a chunk to every consumer of `from`: writers first, on a shared
    /// view; then filters, each but the last on its own copy.
    fn propagate(&mut self, from: usize, buffer: &mut PointBuffer) -> PipelineResult<()> {
        let consumers = self.plan.consumers[from].clone();
        let (writers, filters): (Vec<usize>, Vec<usize>) = consumers
            .into_iter()
            .partition(|&c| self.slots[c].stage.kind() == StageKind::Writer);

        if !writers.is_empty() {
            self.write(&writers, buffer)?;
        }

        let last = filters.len().saturating_sub(1);
        for (i, &filter) in filters.iter().enumerate() {
            if i == last {
                self.transform(filter, buffer)?;
            } else {
                let mut copy = buffer.clone();
                self.transform(filter, &mut copy)?;
            }
        }
        Ok(())
    }

    fn transform(&mut self, idx: usize, buffer: &mut PointBuffer) -> PipelineResult<()> {
        let before = buffer.size();
        match self.slots[idx].stage.execute(Chunk::Transform(&mut *buffer)) {
            Ok(ChunkResult::Filtered) => {}
            Ok(other) => {
                let err = PipelineError::InvalidState(format!("filter returned {:?}", other));
                return Err(self.abort(idx, StagePhase::Execute, err));
            }
            Err(e) => return Err(self.abort(idx, StagePhase::Execute, e)),
        }

        let slot = &self.slots[idx];
        chunk_event!(
            slot,
            "Filter '{}': {} -> {} points",
            slot.label(),
            before,
            buffer.size()
        );

        if buffer.is_empty() {
            return Ok(());
        }
        self.propagate(idx, buffer)
    }

    fn write(&mut self, writers: &[usize], buffer: &PointBuffer) -> PipelineResult<()> {
        let mut results: Vec<(usize, PipelineResult<ChunkResult>)> =
            Vec::with_capacity(writers.len());

        if self.settings.parallel_writers && writers.len() > 1 {
            let targets: Vec<(usize, &mut StageSlot)> = self
                .slots
                .iter_mut()
                .enumerate()
                .filter(|(i, _)| writers.contains(i))
                .collect();
            std::thread::scope(|scope| {
                let handles: Vec<_> = targets
                    .into_iter()
                    .map(|(idx, slot)| {
                        (idx, scope.spawn(move || slot.stage.execute(Chunk::View(buffer))))
                    })
                    .collect();
                for (idx, handle) in handles {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(PipelineError::InvalidState(
                            "writer thread panicked".to_string(),
                        ))
                    });
                    results.push((idx, result));
                }
            });
        } else {
            for &idx in writers {
                let result = self.slots[idx].stage.execute(Chunk::View(buffer));
                let failed = result.is_err();
                results.push((idx, result));
                if failed {
                    break;
                }
            }
        }

        // Count every commit before reporting the first failure.
        let size = buffer.size();
        let mut failure = None;
        for (idx, result) in results {
            match result {
                Ok(ChunkResult::Committed(n)) if n <= size => {
                    let slot = &mut self.slots[idx];
                    slot.committed += n as u64;
                    if n < size {
                        tracing::warn!(
                            "Writer '{}' committed {} of {} points",
                            slot.label(),
                            n,
                            size
                        );
                    }
                    chunk_event!(slot, "Writer '{}' committed {} points", slot.label(), n);
                }
                Ok(other) => {
                    if failure.is_none() {
                        let err = PipelineError::InvalidState(format!(
                            "writer returned {:?} for a chunk of {} points",
                            other, size
                        ));
                        failure = Some((idx, err));
                    }
                }
                Err(PipelineError::PartialWrite { committed, source }) => {
                    let slot = &mut self.slots[idx];
                    slot.committed += committed.min(size) as u64;
                    tracing::warn!(
                        "Writer '{}' failed after committing {} of {} points",
                        slot.label(),
                        committed,
                        size
                    );
                    if failure.is_none() {
                        failure = Some((idx, *source));
                    }
                }
                Err(e) => {
                    if failure.is_none() {
                        failure = Some((idx, e));
                    }
                }
            }
        }

        match failure {
            Some((idx, err)) => Err(self.abort(idx, StagePhase::Execute, err)),
            None => Ok(()),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.teardown_all();
    }
}
