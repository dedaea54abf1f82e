use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a structure in the ontology.
pub type StructureId = u32;

/// Name of a per-voxel data channel (e.g. `sum_pixels`).
pub type Channel = &'static str;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Hemisphere {
    Left = 1,
    Right = 2,
    Both = 3,
}

impl Hemisphere {
    pub const ALL: [Hemisphere; 3] = [Hemisphere::Left, Hemisphere::Right, Hemisphere::Both];

    #[inline(always)]
    pub fn id(self) -> u8 { self as u8 }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Hemisphere::Left),
            2 => Some(Hemisphere::Right),
            3 => Some(Hemisphere::Both),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Hemisphere {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::from_id(id as i64).ok_or_else(|| format!("unknown hemisphere id {}", id))
    }
}

impl From<Hemisphere> for u8 {
    fn from(h: Hemisphere) -> u8 { h.id() }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hemisphere::Left => "left",
            Hemisphere::Right => "right",
            Hemisphere::Both => "both",
        };
        f.write_str(name)
    }
}

/// Identity of one Field instance.
///
/// Field order is significant: the derived `Ord` sorts by
/// `(structure_id, hemisphere, injection, field_name)`, which is the
/// tie-break order used when scheduling independent work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub structure_id: StructureId,
    pub hemisphere: Hemisphere,
    pub injection: bool,
    pub field_name: String,
}

impl Key {
    pub fn new(structure_id: StructureId, hemisphere: Hemisphere, injection: bool, field_name: impl Into<String>) -> Self {
        Self { structure_id, hemisphere, injection, field_name: field_name.into() }
    }

    /// Same location and field, other side of the injection split.
    pub fn with_injection(&self, injection: bool) -> Self {
        Self { injection, ..self.clone() }
    }

    /// Co-located key of another field type.
    pub fn with_name(&self, field_name: &str) -> Self {
        Self { field_name: field_name.to_string(), ..self.clone() }
    }

    pub fn at_structure(&self, structure_id: StructureId) -> Self {
        Self { structure_id, ..self.clone() }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[structure={}, hemisphere={}, injection={}]",
            self.field_name, self.structure_id, self.hemisphere, self.injection
        )
    }
}

/// Identity of one interval load: a structure's voxels in one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalKey {
    pub structure_id: StructureId,
    pub hemisphere: Hemisphere,
    pub channel: Channel,
}

impl fmt::Display for IntervalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[structure={}, hemisphere={}]", self.channel, self.structure_id, self.hemisphere)
    }
}

/// Half-open index range `[low, high)` into a flattened voxel channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct VoxelRange {
    pub low: usize,
    pub high: usize,
}

impl VoxelRange {
    pub fn new(low: usize, high: usize) -> Self { Self { low, high } }

    #[inline(always)]
    pub fn len(&self) -> usize { self.high.saturating_sub(self.low) }

    pub fn is_empty(&self) -> bool { self.high <= self.low }

    /// True if the two ranges share at least one index.
    pub fn intersects(&self, other: &VoxelRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.low < other.high && other.low < self.high
    }

    pub fn contains_range(&self, other: &VoxelRange) -> bool {
        other.is_empty() || (self.low <= other.low && other.high <= self.high)
    }
}

impl fmt::Display for VoxelRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order_is_structure_first() {
        let a = Key::new(1, Hemisphere::Right, false, "sum_pixels");
        let b = Key::new(2, Hemisphere::Left, true, "projection_density");
        let c = Key::new(1, Hemisphere::Right, true, "projection_density");
        let mut keys = vec![b.clone(), c.clone(), a.clone()];
        keys.sort();
        assert_eq!(keys, vec![a, c, b]);
    }

    #[test]
    fn test_hemisphere_ids_round_trip_through_serde() {
        let json = serde_json::to_string(&Hemisphere::Right).unwrap();
        assert_eq!(json, "2");
        let back: Hemisphere = serde_json::from_str("3").unwrap();
        assert_eq!(back, Hemisphere::Both);
        assert!(serde_json::from_str::<Hemisphere>("7").is_err());
    }

    #[test]
    fn test_range_intersection_is_half_open() {
        let a = VoxelRange::new(0, 10);
        let b = VoxelRange::new(10, 25);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&VoxelRange::new(9, 11)));
        assert!(!a.intersects(&VoxelRange::new(3, 3)));
        assert!(VoxelRange::new(0, 25).contains_range(&b));
    }
}
