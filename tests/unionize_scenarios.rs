use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, Mutex};

use rstest::rstest;
use unionize_core::compute::{ChannelSet, ChannelSource, MemoryChannel};
use unionize_core::display::format_plan;
use unionize_core::error::{ComputationError, ConfigurationError, UnionizeError};
use unionize_core::fields::channels::{
    AAV_EXCLUSION_FRACTION, INJECTION_DENSITY, INJECTION_FRACTION, PROJECTION_DENSITY, SUM_PIXELS,
};
use unionize_core::fields::{ChannelList, FieldContract, FieldDeps, FieldInputs, FieldRegistry};
use unionize_core::graph::PlanNode;
use unionize_core::{
    explain, resolve_and_compute, EngineConfig, Hemisphere, IntervalIndex, Key, Structure, UnionizeRecord,
    UnionizeRequest, Unionizer, VoxelRange,
};

/// Read log shared by several channels, in the order reads happened.
type Journal = Arc<Mutex<Vec<(&'static str, VoxelRange)>>>;

/// In-memory channel that records every range it is asked for.
#[derive(Debug)]
struct Recorder {
    name: &'static str,
    data: Vec<f64>,
    reads: Mutex<Vec<VoxelRange>>,
    journal: Option<Journal>,
}

impl Recorder {
    fn new(data: Vec<f64>) -> Arc<Self> {
        Arc::new(Self { name: "", data, reads: Mutex::new(Vec::new()), journal: None })
    }

    fn journaled(name: &'static str, data: Vec<f64>, journal: &Journal) -> Arc<Self> {
        Arc::new(Self { name, data, reads: Mutex::new(Vec::new()), journal: Some(journal.clone()) })
    }

    fn reads(&self) -> Vec<VoxelRange> {
        self.reads.lock().unwrap().clone()
    }
}

impl ChannelSource for Recorder {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn read(&self, range: VoxelRange) -> io::Result<Vec<f64>> {
        self.reads.lock().unwrap().push(range);
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push((self.name, range));
        }
        Ok(self.data[range.low..range.high].to_vec())
    }
}

fn tree() -> Vec<Structure> {
    vec![
        Structure::new(1, None, "root", "R"),
        Structure::new(2, Some(1), "first leaf", "L1"),
        Structure::new(3, Some(1), "second leaf", "L2"),
    ]
}

/// Root 1 over leaves 2, 3 and 4.
fn three_leaf_tree() -> Vec<Structure> {
    let mut structures = tree();
    structures.push(Structure::new(4, Some(1), "third leaf", "L3"));
    structures
}

fn sum_pixels_channels(len: usize) -> ChannelSet {
    ChannelSet::new()
        .with(SUM_PIXELS, MemoryChannel::new(vec![1.0; len]))
        .with(INJECTION_FRACTION, MemoryChannel::new(vec![1.0; len]))
        .with(AAV_EXCLUSION_FRACTION, MemoryChannel::new(vec![0.0; len]))
}

fn request(names: &[&str], hemisphere_ids: &[i64]) -> UnionizeRequest {
    UnionizeRequest::new(names, tree(), hemisphere_ids).unwrap()
}

fn index(hemisphere: Hemisphere, first: VoxelRange, second: VoxelRange) -> IntervalIndex {
    let mut index = IntervalIndex::new();
    index.insert(2, hemisphere, first);
    index.insert(3, hemisphere, second);
    index
}

fn value(records: &[UnionizeRecord], sid: u32, injection: bool, name: &str) -> f64 {
    records
        .iter()
        .find(|r| r.structure_id == sid && r.injection == injection && r.field_name == name)
        .map(|r| r.value)
        .unwrap_or_else(|| panic!("no record for {sid}/{injection}/{name}"))
}

fn sequential() -> Unionizer {
    Unionizer::new().with_config(EngineConfig { parallel: false, ..EngineConfig::default() })
}

#[test]
fn sum_pixels_propagates_as_sum_of_leaves() {
    let intervals = index(Hemisphere::Both, VoxelRange::new(0, 10), VoxelRange::new(10, 25));
    let channels = ChannelSet::new()
        .with(SUM_PIXELS, MemoryChannel::new(vec![1.0; 25]))
        .with(INJECTION_FRACTION, MemoryChannel::new(vec![1.0; 25]))
        .with(AAV_EXCLUSION_FRACTION, MemoryChannel::new(vec![0.0; 25]));

    let records = resolve_and_compute(&request(&["sum_pixels"], &[3]), &intervals, &channels).unwrap();

    assert_eq!(records.len(), 6);
    assert_eq!(value(&records, 2, true, "sum_pixels"), 10.0);
    assert_eq!(value(&records, 3, true, "sum_pixels"), 15.0);
    assert_eq!(value(&records, 1, true, "sum_pixels"), 25.0);
    // Every voxel sits in the injection footprint, so nothing is left outside it.
    for sid in [1, 2, 3] {
        assert_eq!(value(&records, sid, false, "sum_pixels"), 0.0);
    }
}

#[test]
fn unknown_field_fails_without_reading() {
    let source = Recorder::new(vec![1.0; 25]);
    let mut channels = ChannelSet::new();
    channels.insert_shared(SUM_PIXELS, source.clone());
    let intervals = index(Hemisphere::Both, VoxelRange::new(0, 10), VoxelRange::new(10, 25));

    let err = resolve_and_compute(&request(&["sum_pixels", "bogus_field"], &[3]), &intervals, &channels).unwrap_err();

    assert!(matches!(err, UnionizeError::Configuration(ConfigurationError::UnknownField(ref n)) if n == "bogus_field"));
    assert!(source.reads().is_empty());
}

#[test]
fn out_of_bounds_leaf_fails_only_its_dependents() {
    // The second leaf runs past the end of every channel.
    let intervals = index(Hemisphere::Both, VoxelRange::new(0, 10), VoxelRange::new(10, 30));
    let channels = ChannelSet::new()
        .with(SUM_PIXELS, MemoryChannel::new(vec![1.0; 25]))
        .with(INJECTION_FRACTION, MemoryChannel::new(vec![1.0; 25]))
        .with(AAV_EXCLUSION_FRACTION, MemoryChannel::new(vec![0.0; 25]));

    let err = resolve_and_compute(&request(&["sum_pixels"], &[3]), &intervals, &channels).unwrap_err();
    let incomplete = err.incomplete().expect("partial result");

    assert_eq!(incomplete.records.len(), 2);
    assert!(incomplete.records.iter().all(|r| r.structure_id == 2));
    assert_eq!(value(&incomplete.records, 2, true, "sum_pixels"), 10.0);

    let missing: BTreeSet<(u32, bool)> =
        incomplete.missing.iter().map(|m| (m.key.structure_id, m.key.injection)).collect();
    assert_eq!(missing, [(1, false), (1, true), (3, false), (3, true)].into_iter().collect());

    let leaf = incomplete.missing.iter().find(|m| m.key.structure_id == 3 && m.key.injection).unwrap();
    assert!(leaf.reason.is_data_range(), "{}", leaf.reason);
    let root = incomplete.missing.iter().find(|m| m.key.structure_id == 1 && m.key.injection).unwrap();
    assert!(matches!(root.reason, ComputationError::Upstream { .. }));
}

/// Two field types that each require the other.
#[derive(Debug)]
struct Chasing(&'static str);

impl FieldContract for Chasing {
    fn required_intervals(&self, _key: &Key) -> ChannelList {
        ChannelList::from_slice(&[SUM_PIXELS])
    }

    fn required_fields(&self, key: &Key) -> FieldDeps {
        let mut deps = FieldDeps::new();
        deps.push(("other", key.with_name(self.0)));
        deps
    }

    fn calculate(&self, _key: &Key, inputs: &FieldInputs<'_>) -> Result<f64, ComputationError> {
        inputs.field("other")
    }

    fn propagate(&self, _key: &Key, children: &[f64], _inputs: &FieldInputs<'_>) -> Result<f64, ComputationError> {
        Ok(children.iter().sum())
    }
}

#[test]
fn cyclic_field_types_are_rejected_before_any_load() {
    let mut registry = FieldRegistry::with_builtins();
    registry.register("ping", Chasing("pong"));
    registry.register("pong", Chasing("ping"));

    let source = Recorder::new(vec![1.0; 25]);
    let mut channels = ChannelSet::new();
    channels.insert_shared(SUM_PIXELS, source.clone());
    let intervals = index(Hemisphere::Left, VoxelRange::new(0, 10), VoxelRange::new(10, 25));

    let err = Unionizer::new()
        .with_registry(registry)
        .resolve_and_compute(&request(&["ping"], &[1]), &intervals, &channels)
        .unwrap_err();

    match err {
        UnionizeError::Configuration(ConfigurationError::DependencyCycle { keys }) => {
            assert!(keys.iter().any(|k| k.contains("ping")));
            assert!(keys.iter().any(|k| k.contains("pong")));
        }
        other => panic!("Wrong error type: {other}"),
    }
    assert!(source.reads().is_empty());
}

#[test]
fn explain_is_deterministic() {
    let names = ["projection_density", "sum_pixels"];
    let first = explain(&request(&names, &[1, 2, 3])).unwrap();
    let second = explain(&request(&names, &[1, 2, 3])).unwrap();

    let a: Vec<&PlanNode> = first.steps().collect();
    let b: Vec<&PlanNode> = second.steps().collect();
    assert_eq!(a, b);
    assert_eq!(format_plan(&first), format_plan(&second));
}

#[test]
fn overlapping_leaves_fail_only_their_dependents() {
    let mut intervals = IntervalIndex::new();
    intervals.insert(2, Hemisphere::Both, VoxelRange::new(0, 10));
    intervals.insert(3, Hemisphere::Both, VoxelRange::new(5, 15));
    intervals.insert(4, Hemisphere::Both, VoxelRange::new(20, 30));
    let request = UnionizeRequest::new(&["sum_pixels"], three_leaf_tree(), &[3]).unwrap();

    let err = resolve_and_compute(&request, &intervals, &sum_pixels_channels(30)).unwrap_err();
    let incomplete = err.incomplete().expect("partial result");

    assert_eq!(incomplete.records.len(), 2);
    assert_eq!(value(&incomplete.records, 4, true, "sum_pixels"), 10.0);

    let missing: BTreeSet<u32> = incomplete.missing.iter().map(|m| m.key.structure_id).collect();
    assert_eq!(missing, [1, 2, 3].into_iter().collect());
    for m in &incomplete.missing {
        match m.key.structure_id {
            1 => assert!(matches!(m.reason, ComputationError::Upstream { .. }), "{}", m.reason),
            _ => assert!(m.reason.is_data_range(), "{}", m.reason),
        }
    }
    let leaf = incomplete.missing.iter().find(|m| m.key.structure_id == 2 && m.key.injection).unwrap();
    assert!(matches!(leaf.reason, ComputationError::Overlap { other: 3, .. }), "{}", leaf.reason);
}

#[test]
fn channel_ranges_of_different_length_fail_the_leaf() {
    // The injection fraction of the first leaf sits elsewhere and is shorter.
    let mut intervals = index(Hemisphere::Both, VoxelRange::new(0, 10), VoxelRange::new(10, 25));
    intervals.insert_channel(INJECTION_FRACTION, 2, Hemisphere::Both, VoxelRange::new(30, 34));

    let err = resolve_and_compute(&request(&["sum_pixels"], &[3]), &intervals, &sum_pixels_channels(40)).unwrap_err();
    let incomplete = err.incomplete().expect("partial result");

    assert!(incomplete.records.iter().all(|r| r.structure_id == 3));
    assert_eq!(value(&incomplete.records, 3, true, "sum_pixels"), 15.0);

    let leaf = incomplete.missing.iter().find(|m| m.key.structure_id == 2 && m.key.injection).unwrap();
    match &leaf.reason {
        ComputationError::RangeMismatch { key, channel, expected, got } => {
            assert_eq!(key, &leaf.key);
            assert_eq!(*channel, SUM_PIXELS);
            assert_eq!((*expected, *got), (4, 10));
        }
        other => panic!("Wrong error type: {other}"),
    }
    assert!(leaf.reason.is_data_range());
    assert!(incomplete.missing.iter().any(|m| m.key.structure_id == 1));
}

#[test]
fn reads_follow_pending_leaves_and_windows_are_released() {
    const LEAF: usize = 10;
    // Gaps between the leaves that no read may touch.
    let leaves = [(2, VoxelRange::new(0, 10)), (3, VoxelRange::new(15, 25)), (4, VoxelRange::new(30, 40))];
    let mut intervals = IntervalIndex::new();
    for (sid, range) in leaves {
        intervals.insert(sid, Hemisphere::Both, range);
    }

    let journal = Journal::default();
    let names = [SUM_PIXELS, INJECTION_FRACTION, AAV_EXCLUSION_FRACTION];
    let mut channels = ChannelSet::new();
    for name in names {
        channels.insert_shared(name, Recorder::journaled(name, vec![1.0; 45], &journal));
    }
    let request = UnionizeRequest::new(&["sum_pixels"], three_leaf_tree(), &[3]).unwrap();

    let run = sequential().resolve_and_compute_with_stats(&request, &intervals, &channels).unwrap();
    assert!(run.records().is_ok());

    // Each read lies inside exactly one leaf, and leaves are read one after
    // another: no leaf is touched before the previous one is finished with.
    let reads = journal.lock().unwrap().clone();
    assert_eq!(reads.len(), leaves.len() * names.len());
    let leaf_of = |range: &VoxelRange| {
        leaves
            .iter()
            .position(|(_, planned)| planned.contains_range(range))
            .unwrap_or_else(|| panic!("read {range} outside every planned interval"))
    };
    let sequence: Vec<usize> = reads.iter().map(|(_, r)| leaf_of(r)).collect();
    assert!(sequence.windows(2).all(|w| w[0] <= w[1]), "{reads:?}");
    for (i, chunk) in sequence.chunks(names.len()).enumerate() {
        assert!(chunk.iter().all(|&leaf| leaf == i), "{reads:?}");
    }

    // Only one leaf's windows (plus the batch buffer being split) are ever
    // held at once, well below the whole planned volume.
    let planned = leaves.len() * LEAF * names.len();
    assert!(run.stats.peak_resident <= (names.len() + 1) * LEAF, "{:?}", run.stats);
    assert!(run.stats.peak_resident < planned);
    assert_eq!(run.stats.resident, 0);
}

fn density_channels() -> ChannelSet {
    let mut projection = vec![0.9; 10];
    projection.extend(vec![0.1; 15]);
    ChannelSet::new()
        .with(SUM_PIXELS, MemoryChannel::new(vec![1.0; 25]))
        .with(INJECTION_FRACTION, MemoryChannel::new(vec![0.0; 25]))
        .with(AAV_EXCLUSION_FRACTION, MemoryChannel::new(vec![0.0; 25]))
        .with(INJECTION_DENSITY, MemoryChannel::new(vec![0.0; 25]))
        .with(PROJECTION_DENSITY, MemoryChannel::new(projection))
}

#[test]
fn projection_density_is_ratio_of_propagated_sums() {
    let intervals = index(Hemisphere::Both, VoxelRange::new(0, 10), VoxelRange::new(10, 25));
    let records =
        resolve_and_compute(&request(&["projection_density"], &[3]), &intervals, &density_channels()).unwrap();

    assert!((value(&records, 2, false, "projection_density") - 0.9).abs() < 1e-9);
    assert!((value(&records, 3, false, "projection_density") - 0.1).abs() < 1e-9);
    // 10.5 projecting pixels over 25 pixels, not the 0.5 mean of the leaves.
    assert!((value(&records, 1, false, "projection_density") - 0.42).abs() < 1e-9);
    // No injection signal: zero denominator gives zero.
    assert_eq!(value(&records, 1, true, "projection_density"), 0.0);
    // Required sums are reported alongside.
    assert!((value(&records, 1, false, "sum_projecting_pixels") - 10.5).abs() < 1e-9);
}

#[rstest]
#[case(&["sum_pixels"])]
#[case(&["projection_density"])]
#[case(&["sum_projecting_pixels", "sum_pixels"])]
fn parallel_and_sequential_runs_agree(#[case] names: &[&str]) {
    let mut intervals = index(Hemisphere::Left, VoxelRange::new(0, 10), VoxelRange::new(10, 25));
    intervals.extend(index(Hemisphere::Right, VoxelRange::new(0, 10), VoxelRange::new(10, 25)));
    let channels = density_channels();
    let request = request(names, &[1, 2]);

    let parallel = Unionizer::new()
        .resolve_and_compute_with_stats(&request, &intervals, &channels)
        .unwrap();
    let serial = sequential().resolve_and_compute_with_stats(&request, &intervals, &channels).unwrap();

    assert!(parallel.telemetry.components > 1);
    assert_eq!(parallel.records().unwrap(), serial.records().unwrap());
}
