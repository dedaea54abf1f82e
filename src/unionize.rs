//! unionize.rs
//! Caller-facing entry points: plan a request (`explain`) or plan and run it
//! against channel data (`resolve_and_compute`).

use crate::analysis::PlanTelemetry;
use crate::compute::{ChannelSet, ComputationEngine, Ledger, LoadStats};
use crate::config::{EngineConfig, UnionizeInput};
use crate::display;
use crate::error::{ConfigurationError, UnionizeResult};
use crate::fields::FieldRegistry;
use crate::graph::{DependencyGraph, ExecutionPlan, PlanNode};
use crate::records::{assemble, UnionizeOutput, UnionizeRecord};
use crate::store::{Hemisphere, IntervalIndex, Key, Ontology, Structure, StructureId, VoxelRange};
use std::borrow::Cow;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

/// What to compute: field names, the structure tree, the hemispheres and,
/// optionally, a subset of the tree to restrict the work to.
#[derive(Debug, Clone)]
pub struct UnionizeRequest {
    pub field_names: Vec<String>,
    pub ontology: Ontology,
    pub hemispheres: Vec<Hemisphere>,
    pub image_series_id: i64,
    /// `None` computes every structure in the ontology.
    pub structure_subset: Option<BTreeSet<StructureId>>,
    /// Number of voxels in the reference volume. Ranges past it are out of
    /// bounds even when a channel is longer.
    pub voxel_capacity: Option<usize>,
}

impl UnionizeRequest {
    pub fn new<S: AsRef<str>>(
        field_names: &[S],
        structures: Vec<Structure>,
        hemisphere_ids: &[i64],
    ) -> Result<Self, ConfigurationError> {
        let hemispheres = hemisphere_ids
            .iter()
            .map(|&id| Hemisphere::from_id(id).ok_or(ConfigurationError::UnknownHemisphere(id)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            field_names: field_names.iter().map(|n| n.as_ref().to_string()).collect(),
            ontology: Ontology::new(structures)?,
            hemispheres,
            image_series_id: 0,
            structure_subset: None,
            voxel_capacity: None,
        })
    }

    /// Request for a job document. The document is validated first.
    pub fn from_input<S: AsRef<str>>(input: &UnionizeInput, field_names: &[S]) -> Result<Self, ConfigurationError> {
        input.validate()?;
        let mut request = Self::new(field_names, input.structures.clone(), &input.hemisphere_ids)?;
        request.image_series_id = input.image_series_id;
        request.voxel_capacity = input.voxel_capacity();
        Ok(request)
    }

    pub fn with_image_series_id(mut self, id: i64) -> Self {
        self.image_series_id = id;
        self
    }

    pub fn restrict_to(mut self, structures: impl IntoIterator<Item = StructureId>) -> Self {
        self.structure_subset = Some(structures.into_iter().collect());
        self
    }

    /// Restricts the work to `root` and everything below it.
    pub fn restrict_to_subtree(self, root: StructureId) -> Result<Self, ConfigurationError> {
        if self.ontology.get(root).is_none() {
            return Err(ConfigurationError::UnknownStructure(root));
        }
        let subtree: Vec<_> = std::iter::once(root).chain(self.ontology.descendants(root)).collect();
        Ok(self.restrict_to(subtree))
    }

    pub fn with_voxel_capacity(mut self, capacity: usize) -> Self {
        self.voxel_capacity = Some(capacity);
        self
    }

    /// The structure ids the plan covers.
    pub fn structures(&self) -> BTreeSet<StructureId> {
        match &self.structure_subset {
            Some(subset) => subset.clone(),
            None => self.ontology.ids().collect(),
        }
    }
}

/// Plans and runs unionize requests against one field registry.
#[derive(Debug, Clone)]
pub struct Unionizer {
    registry: Cow<'static, FieldRegistry>,
    config: EngineConfig,
}

impl Default for Unionizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Unionizer {
    /// Built-in field types, default engine settings.
    pub fn new() -> Self {
        Self { registry: Cow::Borrowed(FieldRegistry::builtin()), config: EngineConfig::default() }
    }

    pub fn with_registry(mut self, registry: FieldRegistry) -> Self {
        self.registry = Cow::Owned(registry);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Builds the dependency graph and its execution order without reading
    /// any data. Unknown names and dependency cycles fail here.
    pub fn explain(&self, request: &UnionizeRequest) -> UnionizeResult<ExecutionPlan> {
        let structures = request.structures();
        let graph = DependencyGraph::build(
            &self.registry,
            &request.ontology,
            &request.field_names,
            &structures,
            &request.hemispheres,
        )?;
        Ok(graph.plan()?)
    }

    /// Plans and runs `request`, returning one record per computed Field.
    ///
    /// # Errors
    ///
    /// `Configuration` before any read; `Io` when a channel read keeps
    /// failing; `Incomplete` carrying the records that could be produced
    /// when some Fields failed on their data ranges.
    pub fn resolve_and_compute(
        &self,
        request: &UnionizeRequest,
        intervals: &IntervalIndex,
        channels: &ChannelSet,
    ) -> UnionizeResult<Vec<UnionizeRecord>> {
        self.resolve_and_compute_with_stats(request, intervals, channels)?.records()
    }

    /// Same as `resolve_and_compute`, keeping the plan, the per-node results
    /// and the run's load statistics for inspection.
    #[instrument(level = "debug", skip_all, fields(image_series_id = request.image_series_id))]
    pub fn resolve_and_compute_with_stats(
        &self,
        request: &UnionizeRequest,
        intervals: &IntervalIndex,
        channels: &ChannelSet,
    ) -> UnionizeResult<UnionizeRun> {
        let plan = self.explain(request)?;
        check_channels(&plan, channels)?;
        let out_of_volume = outside_volume(request, intervals);
        let telemetry = PlanTelemetry::analyze(&plan);

        let (ledger, stats) = ComputationEngine::new(&plan, &self.registry, intervals, channels)
            .with_retry_policy(self.config.retry_policy())
            .with_capacity(request.voxel_capacity)
            .run(self.config.parallel)?;

        info!(
            fields = plan.graph.field_count(),
            reads = stats.reads,
            values_read = stats.values_read,
            peak_resident = stats.peak_resident,
            "unionize run finished"
        );

        Ok(UnionizeRun { plan, ledger, telemetry, stats, out_of_volume, image_series_id: request.image_series_id })
    }

    /// Runs a job document end to end: file-backed channels from
    /// `grid_paths`, engine settings from the document.
    pub fn run_job<S: AsRef<str>>(
        input: &UnionizeInput,
        field_names: &[S],
        intervals: &IntervalIndex,
    ) -> UnionizeResult<UnionizeOutput> {
        let request = UnionizeRequest::from_input(input, field_names)?;
        let channels = ChannelSet::open_raw(&input.grid_paths)?;
        let unionizes = Unionizer::new()
            .with_config(input.engine.clone())
            .resolve_and_compute(&request, intervals, &channels)?;
        Ok(UnionizeOutput { unionizes })
    }
}

/// Every channel the plan loads must have a handle; checked before any read.
fn check_channels(plan: &ExecutionPlan, channels: &ChannelSet) -> Result<(), ConfigurationError> {
    for node in plan.steps() {
        if let PlanNode::Load(interval) = node {
            if !channels.contains(interval.channel) {
                return Err(ConfigurationError::MissingChannel(interval.channel.to_string()));
            }
        }
    }
    Ok(())
}

/// Requested ranges that end past the reference volume. Their Fields fail
/// with `OutOfBounds` during the run; listed up front so a job can report
/// them together.
fn outside_volume(request: &UnionizeRequest, intervals: &IntervalIndex) -> Vec<(StructureId, Hemisphere, VoxelRange)> {
    let Some(capacity) = request.voxel_capacity else {
        return Vec::new();
    };
    let structures = request.structures();
    let out: Vec<_> = intervals
        .check_bounds(capacity)
        .into_iter()
        .filter(|(sid, _, _)| structures.contains(sid))
        .collect();
    for (sid, hemisphere, range) in &out {
        warn!(structure_id = sid, %hemisphere, %range, capacity, "interval ends outside the reference volume");
    }
    out
}

/// A finished run.
#[derive(Debug, Clone)]
pub struct UnionizeRun {
    pub plan: ExecutionPlan,
    pub ledger: Ledger,
    pub telemetry: PlanTelemetry,
    pub stats: LoadStats,
    /// Ranges past `voxel_capacity`, empty when the request sets none.
    pub out_of_volume: Vec<(StructureId, Hemisphere, VoxelRange)>,
    image_series_id: i64,
}

impl UnionizeRun {
    pub fn records(&self) -> UnionizeResult<Vec<UnionizeRecord>> {
        assemble(&self.plan.graph, &self.ledger, self.image_series_id)
    }

    pub fn value(&self, key: &Key) -> Option<f64> {
        self.ledger.value(self.plan.graph.field_node(key)?)
    }

    /// Dependency tree of one Field with the values this run produced.
    pub fn trace(&self, key: &Key) -> String {
        display::format_trace(&self.plan, &self.ledger, key)
    }
}

/// `Unionizer::explain` with the built-in field types.
pub fn explain(request: &UnionizeRequest) -> UnionizeResult<ExecutionPlan> {
    Unionizer::new().explain(request)
}

/// `Unionizer::resolve_and_compute` with the built-in field types and
/// default engine settings.
pub fn resolve_and_compute(
    request: &UnionizeRequest,
    intervals: &IntervalIndex,
    channels: &ChannelSet,
) -> UnionizeResult<Vec<UnionizeRecord>> {
    Unionizer::new().resolve_and_compute(request, intervals, channels)
}
