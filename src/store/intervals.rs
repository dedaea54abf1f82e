//! intervals.rs
//! Maps (structure, hemisphere, channel) to a half-open voxel range.
//!
//! Channels are usually flattened in the same voxel order, so one range per
//! (structure, hemisphere) serves every channel. Channel-specific entries
//! override the shared one.

use super::types::{Hemisphere, IntervalKey, StructureId, VoxelRange};
use std::collections::{BTreeMap, HashMap};

type Slot = (StructureId, Hemisphere);

#[derive(Debug, Clone, Default)]
pub struct IntervalIndex {
    shared: BTreeMap<Slot, VoxelRange>,
    per_channel: HashMap<String, BTreeMap<Slot, VoxelRange>>,
}

impl IntervalIndex {
    pub fn new() -> Self { Self::default() }

    /// Registers a range used by every channel of this structure/hemisphere.
    pub fn insert(&mut self, structure_id: StructureId, hemisphere: Hemisphere, range: VoxelRange) {
        self.shared.insert((structure_id, hemisphere), range);
    }

    pub fn insert_channel(&mut self, channel: &str, structure_id: StructureId, hemisphere: Hemisphere, range: VoxelRange) {
        self.per_channel
            .entry(channel.to_string())
            .or_default()
            .insert((structure_id, hemisphere), range);
    }

    pub fn get(&self, key: &IntervalKey) -> Option<VoxelRange> {
        let slot = (key.structure_id, key.hemisphere);
        self.per_channel
            .get(key.channel)
            .and_then(|m| m.get(&slot))
            .or_else(|| self.shared.get(&slot))
            .copied()
    }

    /// Builds an index from a label array in which each structure's voxels
    /// are stored contiguously. Label 0 is background.
    ///
    /// A label that reappears after another label gets the hull of all its
    /// runs, which then shows up in `overlaps` against the labels it spans.
    pub fn from_sorted_labels(hemisphere: Hemisphere, labels: &[StructureId]) -> Self {
        let mut index = Self::new();
        let mut start = 0;
        while start < labels.len() {
            let label = labels[start];
            let mut end = start + 1;
            while end < labels.len() && labels[end] == label {
                end += 1;
            }
            if label != 0 {
                let entry = index.shared.entry((label, hemisphere)).or_insert(VoxelRange::new(start, end));
                entry.low = entry.low.min(start);
                entry.high = entry.high.max(end);
            }
            start = end;
        }
        index
    }

    /// Merges another index into this one; `other` wins on conflicts.
    pub fn extend(&mut self, other: IntervalIndex) {
        self.shared.extend(other.shared);
        for (channel, entries) in other.per_channel {
            self.per_channel.entry(channel).or_default().extend(entries);
        }
    }

    fn effective(&self, channel: &str) -> BTreeMap<Slot, VoxelRange> {
        let mut ranges = self.shared.clone();
        if let Some(overrides) = self.per_channel.get(channel) {
            ranges.extend(overrides.iter().map(|(k, v)| (*k, *v)));
        }
        ranges
    }

    /// Structures whose range in `channel` intersects another structure's
    /// range in the same hemisphere, mapped to one structure they collide with.
    ///
    /// Sweep over ranges sorted by `low`, tracking the furthest `high` seen.
    pub fn overlaps(&self, channel: &str) -> BTreeMap<(StructureId, Hemisphere), StructureId> {
        let mut by_hemisphere: BTreeMap<Hemisphere, Vec<(VoxelRange, StructureId)>> = BTreeMap::new();
        for ((sid, hemi), range) in self.effective(channel) {
            if !range.is_empty() {
                by_hemisphere.entry(hemi).or_default().push((range, sid));
            }
        }

        let mut out = BTreeMap::new();
        for (hemi, mut ranges) in by_hemisphere {
            ranges.sort();
            let mut reach: Option<(usize, StructureId)> = None;
            for (range, sid) in ranges {
                if let Some((high, owner)) = reach {
                    if range.low < high {
                        out.entry((sid, hemi)).or_insert(owner);
                        out.entry((owner, hemi)).or_insert(sid);
                    }
                    if range.high > high {
                        reach = Some((range.high, sid));
                    }
                } else {
                    reach = Some((range.high, sid));
                }
            }
        }
        out
    }

    /// Entries whose range ends beyond `capacity` voxels.
    pub fn check_bounds(&self, capacity: usize) -> Vec<(StructureId, Hemisphere, VoxelRange)> {
        let mut out: Vec<_> = self
            .shared
            .iter()
            .chain(self.per_channel.values().flat_map(|m| m.iter()))
            .filter(|(_, r)| r.high > capacity)
            .map(|(&(sid, hemi), &r)| (sid, hemi, r))
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

/// Merges overlapping or touching ranges. Output is sorted and disjoint.
pub fn coalesce(ranges: impl IntoIterator<Item = VoxelRange>) -> Vec<VoxelRange> {
    let mut sorted: Vec<VoxelRange> = ranges.into_iter().filter(|r| !r.is_empty()).collect();
    sorted.sort();

    let mut merged: Vec<VoxelRange> = Vec::with_capacity(sorted.len());
    for r in sorted {
        match merged.last_mut() {
            Some(last) if r.low <= last.high => last.high = last.high.max(r.high),
            _ => merged.push(r),
        }
    }
    merged
}
