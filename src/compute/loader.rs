//! loader.rs
//! Just-in-time voxel window loading.
//!
//! A window is loaded when its `Load` step comes up in the plan and dropped
//! as soon as the last Field reading it has run, so resident memory tracks
//! the windows in flight rather than the whole volume.

use crate::error::{ComputationError, ConfigurationError, UnionizeError};
use crate::graph::{DependencyGraph, NodeId, PlanNode};
use crate::store::{coalesce, Hemisphere, IntervalIndex, IntervalKey, StructureId, VoxelRange};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Backing store for one flattened voxel channel.
pub trait ChannelSource: Send + Sync + fmt::Debug {
    /// Number of voxels in the channel.
    fn len(&self) -> usize;

    /// Reads `[range.low, range.high)`. Never called with a range past `len`.
    fn read(&self, range: VoxelRange) -> io::Result<Vec<f64>>;
}

/// A channel held in memory.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    data: Arc<[f64]>,
}

impl MemoryChannel {
    pub fn new(data: impl Into<Arc<[f64]>>) -> Self {
        Self { data: data.into() }
    }
}

impl ChannelSource for MemoryChannel {
    fn len(&self) -> usize { self.data.len() }

    fn read(&self, range: VoxelRange) -> io::Result<Vec<f64>> {
        self.data
            .get(range.low..range.high)
            .map(<[f64]>::to_vec)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("range {} out of bounds", range)))
    }
}

/// A flat file of little-endian f64 values. The file is opened per read so
/// no descriptor is held between windows.
#[derive(Debug, Clone)]
pub struct RawFileChannel {
    path: PathBuf,
    len: usize,
}

impl RawFileChannel {
    const VALUE_BYTES: usize = std::mem::size_of::<f64>();

    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = std::fs::metadata(&path)?.len() as usize;
        if bytes % Self::VALUE_BYTES != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a whole number of f64 values", path.display()),
            ));
        }
        Ok(Self { path, len: bytes / Self::VALUE_BYTES })
    }
}

impl ChannelSource for RawFileChannel {
    fn len(&self) -> usize { self.len }

    fn read(&self, range: VoxelRange) -> io::Result<Vec<f64>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start((range.low * Self::VALUE_BYTES) as u64))?;
        let mut buf = vec![0u8; range.len() * Self::VALUE_BYTES];
        file.read_exact(&mut buf)?;
        Ok(buf
            .chunks_exact(Self::VALUE_BYTES)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect())
    }
}

/// A source plus the lock that serialises reads on it.
#[derive(Debug)]
pub struct ChannelHandle {
    source: Arc<dyn ChannelSource>,
    lock: Mutex<()>,
}

impl ChannelHandle {
    pub fn len(&self) -> usize { self.source.len() }

    pub fn read(&self, range: VoxelRange) -> io::Result<Vec<f64>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.source.read(range)
    }
}

/// Channel name -> data handle.
#[derive(Debug, Clone, Default)]
pub struct ChannelSet {
    channels: HashMap<String, Arc<ChannelHandle>>,
}

impl ChannelSet {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, name: &str, source: impl ChannelSource + 'static) {
        self.insert_shared(name, Arc::new(source));
    }

    pub fn insert_shared(&mut self, name: &str, source: Arc<dyn ChannelSource>) {
        let handle = ChannelHandle { source, lock: Mutex::new(()) };
        self.channels.insert(name.to_string(), Arc::new(handle));
    }

    pub fn with(mut self, name: &str, source: impl ChannelSource + 'static) -> Self {
        self.insert(name, source);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ChannelHandle>> { self.channels.get(name) }

    pub fn contains(&self, name: &str) -> bool { self.channels.contains_key(name) }

    /// File-backed channels from a `grid_paths` mapping.
    pub fn open_raw(grid_paths: &BTreeMap<String, PathBuf>) -> Result<Self, ConfigurationError> {
        let mut set = Self::new();
        for (name, path) in grid_paths {
            set.insert(name, RawFileChannel::open(path)?);
        }
        Ok(set)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: Duration::from_millis(10) }
    }
}

/// Errors that say nothing about the data itself are worth another try.
fn is_transient(err: &io::Error) -> bool {
    !matches!(
        err.kind(),
        io::ErrorKind::NotFound
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::InvalidData
            | io::ErrorKind::Unsupported
    )
}

/// Counters for one run. `resident`/`peak_resident` count f64 values held
/// in windows, including the batch buffer while a batch is being split.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub reads: usize,
    pub values_read: usize,
    pub retries: usize,
    pub resident: usize,
    pub peak_resident: usize,
}

impl LoadStats {
    /// Combines stats of loaders that ran side by side; peaks add up.
    pub fn merge(&mut self, other: &LoadStats) {
        self.reads += other.reads;
        self.values_read += other.values_read;
        self.retries += other.retries;
        self.resident += other.resident;
        self.peak_resident += other.peak_resident;
    }

    fn hold(&mut self, values: usize) {
        self.resident += values;
        self.peak_resident = self.peak_resident.max(self.resident);
    }

    fn drop_values(&mut self, values: usize) {
        self.resident = self.resident.saturating_sub(values);
    }
}

type Window = Result<Vec<f64>, ComputationError>;

pub struct WindowLoader<'a> {
    graph: &'a DependencyGraph,
    intervals: &'a IntervalIndex,
    channels: &'a ChannelSet,
    policy: RetryPolicy,
    capacity: Option<usize>,
    overlaps: HashMap<&'static str, BTreeMap<(StructureId, Hemisphere), StructureId>>,
    windows: HashMap<NodeId, Window>,
    pending: HashMap<NodeId, usize>,
    stats: LoadStats,
}

impl<'a> WindowLoader<'a> {
    pub fn new(
        graph: &'a DependencyGraph,
        intervals: &'a IntervalIndex,
        channels: &'a ChannelSet,
        policy: RetryPolicy,
        capacity: Option<usize>,
    ) -> Self {
        Self {
            graph,
            intervals,
            channels,
            policy,
            capacity,
            overlaps: HashMap::new(),
            windows: HashMap::new(),
            pending: HashMap::new(),
            stats: LoadStats::default(),
        }
    }

    pub fn stats(&self) -> &LoadStats { &self.stats }

    pub fn resident_windows(&self) -> usize { self.windows.len() }

    /// Loads a run of consecutive `Load` steps. Ranges on the same channel
    /// are coalesced so touching windows cost one read.
    ///
    /// Per-interval problems (no range, overlap, out of bounds) are stored
    /// as that window's error. Only exhausted I/O retries fail the batch.
    pub fn load_batch(&mut self, nodes: &[NodeId]) -> Result<(), UnionizeError> {
        let mut by_channel: BTreeMap<&'static str, Vec<(NodeId, VoxelRange)>> = BTreeMap::new();

        for &node in nodes {
            let key = match self.graph.node(node) {
                PlanNode::Load(key) => *key,
                _ => continue,
            };
            self.pending.insert(node, self.graph.consumers(node).count());
            match self.resolve(&key)? {
                Ok(range) if range.is_empty() => {
                    self.windows.insert(node, Ok(Vec::new()));
                }
                Ok(range) => by_channel.entry(key.channel).or_default().push((node, range)),
                Err(err) => {
                    warn!(interval = %key, error = %err, "interval unavailable");
                    self.windows.insert(node, Err(err));
                }
            }
        }

        for (channel, wanted) in by_channel {
            let handle = self.handle(channel)?;
            for merged in coalesce(wanted.iter().map(|(_, r)| *r)) {
                let buffer = self.read_with_retry(channel, &handle, merged)?;
                self.stats.reads += 1;
                self.stats.values_read += buffer.len();
                self.stats.hold(buffer.len());

                for &(node, range) in wanted.iter().filter(|(_, r)| merged.contains_range(r)) {
                    let window = buffer[range.low - merged.low..range.high - merged.low].to_vec();
                    self.stats.hold(window.len());
                    self.windows.insert(node, Ok(window));
                }
                self.stats.drop_values(buffer.len());
                debug!(channel, range = %merged, "window batch loaded");
            }
        }
        Ok(())
    }

    /// Range for a load, or the per-interval error that makes it unusable.
    fn resolve(&mut self, key: &IntervalKey) -> Result<Result<VoxelRange, ComputationError>, UnionizeError> {
        let Some(range) = self.intervals.get(key) else {
            return Ok(Err(ComputationError::MissingInterval { structure_id: key.structure_id, channel: key.channel }));
        };

        let intervals = self.intervals;
        let overlaps = self.overlaps.entry(key.channel).or_insert_with(|| intervals.overlaps(key.channel));
        if let Some(&other) = overlaps.get(&(key.structure_id, key.hemisphere)) {
            return Ok(Err(ComputationError::Overlap { channel: key.channel, range, other }));
        }

        let handle = self.handle(key.channel)?;
        let len = self.capacity.map_or(handle.len(), |cap| cap.min(handle.len()));
        if range.high > len || range.low > range.high {
            return Ok(Err(ComputationError::OutOfBounds { channel: key.channel, range, len }));
        }
        Ok(Ok(range))
    }

    fn handle(&self, channel: &str) -> Result<Arc<ChannelHandle>, UnionizeError> {
        self.channels
            .get(channel)
            .cloned()
            .ok_or_else(|| ConfigurationError::MissingChannel(channel.to_string()).into())
    }

    fn read_with_retry(&mut self, channel: &str, handle: &ChannelHandle, range: VoxelRange) -> Result<Vec<f64>, UnionizeError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = handle.read(range).and_then(|data| {
                if data.len() == range.len() {
                    Ok(data)
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("short read: {} of {} values", data.len(), range.len()),
                    ))
                }
            });
            match result {
                Ok(data) => return Ok(data),
                Err(err) if attempt < self.policy.max_attempts && is_transient(&err) => {
                    warn!(channel, range = %range, attempt, error = %err, "retrying channel read");
                    self.stats.retries += 1;
                    thread::sleep(self.policy.backoff * attempt);
                }
                Err(source) => {
                    return Err(UnionizeError::Io { channel: channel.to_string(), range, attempts: attempt, source });
                }
            }
        }
    }

    /// The loaded window for a `Load` node.
    pub fn window(&self, node: NodeId) -> Result<&[f64], ComputationError> {
        match self.windows.get(&node) {
            Some(Ok(data)) => Ok(data),
            Some(Err(err)) => Err(err.clone()),
            None => Err(ComputationError::MissingInput(self.graph.node(node).to_string())),
        }
    }

    /// Marks one consumer of `node` as done; the window is dropped with the
    /// last one.
    pub fn release(&mut self, node: NodeId) {
        let Some(remaining) = self.pending.get_mut(&node) else { return };
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.pending.remove(&node);
            if let Some(Ok(data)) = self.windows.remove(&node) {
                self.stats.drop_values(data.len());
            }
            trace!(node = %self.graph.node(node), "window released");
        }
    }
}
