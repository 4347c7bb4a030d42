use super::compiled_plan::{CompiledPlan, PlanStats};
use super::error::{PipelineError, PipelineResult};
use super::stage::StageKind;
use std::collections::{BTreeSet, VecDeque};

/// Validates a stage graph and orders it for execution.
pub struct PipelineCompiler;

impl PipelineCompiler {
    /// Compile a stage graph into an execution plan.
    ///
    /// # Arguments
    /// * `kinds` - Role of every stage, indexed by stage position
    /// * `edges` - `(upstream, downstream)` connections
    ///
    /// # Errors
    /// * `CyclicPipeline` if any cycle exists (checked before roles)
    /// * `InvalidPipeline` for an empty graph, an edge naming an unknown
    ///   stage, a duplicate edge, a reader with upstream stages, or a
    ///   filter/writer without one
    pub fn compile(kinds: &[StageKind], edges: &[(usize, usize)]) -> PipelineResult<CompiledPlan> {
        let start_time = std::time::Instant::now();

        let n = kinds.len();
        if n == 0 {
            return Err(PipelineError::InvalidPipeline(
                "pipeline has no stages".to_string(),
            ));
        }

        let (inputs, consumers) = Self::build_adjacency(n, edges)?;

        let order = Self::topological_sort(&inputs, &consumers);
        if order.len() != n {
            let stuck: Vec<usize> = (0..n).filter(|i| !order.contains(i)).collect();
            tracing::warn!(
                "Pipeline graph has a cycle; only {} of {} stages ordered (stuck: {:?})",
                order.len(),
                n,
                stuck
            );
            return Err(PipelineError::CyclicPipeline);
        }

        Self::check_roles(kinds, &inputs)?;

        let roots = Self::drain_order(kinds, &inputs, &consumers);
        let count = |kind: StageKind| kinds.iter().filter(|&&k| k == kind).count();
        let dead_end_filters = (0..n)
            .filter(|&i| kinds[i] == StageKind::Filter && consumers[i].is_empty())
            .count();

        let stats = PlanStats {
            total_stages: n,
            readers: roots.len(),
            filters: count(StageKind::Filter),
            writers: count(StageKind::Writer),
            edges: edges.len(),
            dead_end_filters,
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        Ok(CompiledPlan {
            order,
            roots,
            inputs,
            consumers,
            stats,
        })
    }

    /// Build backward (inputs) and forward (consumers) adjacency lists
    fn build_adjacency(
        n: usize,
        edges: &[(usize, usize)],
    ) -> PipelineResult<(Vec<Vec<usize>>, Vec<Vec<usize>>)> {
        let mut inputs = vec![Vec::new(); n];
        let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); n];

        for &(from, to) in edges {
            if from >= n || to >= n {
                return Err(PipelineError::InvalidPipeline(format!(
                    "edge {} -> {} names a stage that does not exist",
                    from, to
                )));
            }
            if consumers[from].contains(&to) {
                return Err(PipelineError::InvalidPipeline(format!(
                    "stages {} and {} are connected twice",
                    from, to
                )));
            }
            consumers[from].push(to);
            inputs[to].push(from);
        }

        Ok((inputs, consumers))
    }

    /// Readers in the order their points must flow: a depth-first walk from
    /// each sink (in insertion order) through its inputs in connection order.
    /// A stage with several inputs therefore sees all of its first input's
    /// points before any of the second's.
    fn drain_order(
        kinds: &[StageKind],
        inputs: &[Vec<usize>],
        consumers: &[Vec<usize>],
    ) -> Vec<usize> {
        let n = kinds.len();
        let mut seen = vec![false; n];
        let mut roots = Vec::new();

        for sink in (0..n).filter(|&i| consumers[i].is_empty()) {
            let mut stack = vec![sink];
            while let Some(stage) = stack.pop() {
                if std::mem::replace(&mut seen[stage], true) {
                    continue;
                }
                if kinds[stage] == StageKind::Reader {
                    roots.push(stage);
                }
                stack.extend(inputs[stage].iter().rev());
            }
        }

        roots
    }

    /// Reject stages that join two branches split from the same reader.
    ///
    /// Chunks stream through the graph one at a time, so such a stage would
    /// receive both branches interleaved chunk by chunk and its output would
    /// depend on the chunk size. Inputs fed by disjoint readers are fine:
    /// readers are drained one after another in [`CompiledPlan::roots`] order.
    pub fn check_joins(plan: &CompiledPlan) -> PipelineResult<()> {
        let mut sources: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); plan.inputs.len()];

        for &stage in &plan.order {
            let ins = &plan.inputs[stage];
            if ins.is_empty() {
                sources[stage].insert(stage);
                continue;
            }

            let mut reached = BTreeSet::new();
            for &input in ins {
                if let Some(shared) = sources[input].intersection(&reached).next() {
                    return Err(PipelineError::InvalidPipeline(format!(
                        "stage at position {} joins two branches of the reader at position {}",
                        stage, shared
                    )));
                }
                reached.extend(sources[input].iter().copied());
            }
            sources[stage] = reached;
        }

        Ok(())
    }

    /// Kahn's algorithm; FIFO so independent stages keep insertion order.
    fn topological_sort(inputs: &[Vec<usize>], consumers: &[Vec<usize>]) -> Vec<usize> {
        let n = inputs.len();
        let mut in_degree: Vec<usize> = inputs.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(stage) = queue.pop_front() {
            order.push(stage);
            for &next in &consumers[stage] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        order
    }

    fn check_roles(kinds: &[StageKind], inputs: &[Vec<usize>]) -> PipelineResult<()> {
        for (idx, (kind, ins)) in kinds.iter().zip(inputs).enumerate() {
            match (kind.has_inputs(), ins.is_empty()) {
                (false, false) => {
                    return Err(PipelineError::InvalidPipeline(format!(
                        "reader at position {} cannot have upstream stages",
                        idx
                    )))
                }
                (true, true) => {
                    return Err(PipelineError::InvalidPipeline(format!(
                        "{} at position {} has no upstream stage",
                        kind.display_name().to_lowercase(),
                        idx
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }
}
