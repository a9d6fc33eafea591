//! Read-only feature correspondences consumed by the reconstruction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sfm_core::{Pt2, Real};

use crate::error::{Result, SfmError};

/// Index of an image in the input set.
pub type ImageId = usize;

/// Detected feature location in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: Real,
    pub y: Real,
}

impl Keypoint {
    pub fn new(x: Real, y: Real) -> Self {
        Self { x, y }
    }

    pub fn to_point(self) -> Pt2 {
        Pt2::new(self.x, self.y)
    }
}

impl From<Pt2> for Keypoint {
    fn from(p: Pt2) -> Self {
        Self::new(p.x, p.y)
    }
}

/// One correspondence of a canonical pair.
///
/// `query_idx` indexes the keypoints of the lower image id, `train_idx` those
/// of the higher one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub query_idx: usize,
    pub train_idx: usize,
}

impl Match {
    pub fn new(query_idx: usize, train_idx: usize) -> Self {
        Self {
            query_idx,
            train_idx,
        }
    }
}

/// Canonical unordered image pair with `lo < hi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub lo: ImageId,
    pub hi: ImageId,
}

impl PairKey {
    /// Canonical key of `{a, b}`; `None` when `a == b`.
    pub fn new(a: ImageId, b: ImageId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { lo: a, hi: b }),
            std::cmp::Ordering::Greater => Some(Self { lo: b, hi: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// The image of the pair that is not `image`.
    pub fn other(&self, image: ImageId) -> Option<ImageId> {
        if image == self.lo {
            Some(self.hi)
        } else if image == self.hi {
            Some(self.lo)
        } else {
            None
        }
    }
}

/// Serialize a pair-keyed map as a list of entries, so that formats with
/// string-only map keys (JSON) can hold it.
mod pair_map {
    use super::PairKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S, V>(map: &BTreeMap<PairKey, V>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        s.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D, V>(d: D) -> Result<BTreeMap<PairKey, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        let entries = Vec::<(PairKey, V)>::deserialize(d)?;
        Ok(entries.into_iter().collect())
    }
}

/// Keypoints, pairwise matches and adjacency counts for a set of images.
///
/// Every stored match index is validated against the keypoint lists at
/// construction, so accessors never hand out dangling indices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "StoreRecord")]
pub struct CorrespondenceStore {
    keypoints: Vec<Vec<Keypoint>>,
    #[serde(serialize_with = "pair_map::serialize")]
    matches: BTreeMap<PairKey, Vec<Match>>,
    adjacency: Vec<Vec<usize>>,
}

/// Unchecked serialized form; deserialization goes through
/// [`CorrespondenceStore::new`].
#[derive(Deserialize)]
struct StoreRecord {
    keypoints: Vec<Vec<Keypoint>>,
    #[serde(with = "pair_map")]
    matches: BTreeMap<PairKey, Vec<Match>>,
    adjacency: Vec<Vec<usize>>,
}

impl TryFrom<StoreRecord> for CorrespondenceStore {
    type Error = SfmError;

    fn try_from(record: StoreRecord) -> Result<Self> {
        Self::new(record.keypoints, record.matches)?.with_adjacency(record.adjacency)
    }
}

impl CorrespondenceStore {
    /// Build a store and derive adjacency from match counts.
    pub fn new(
        keypoints: Vec<Vec<Keypoint>>,
        matches: BTreeMap<PairKey, Vec<Match>>,
    ) -> Result<Self> {
        let n = keypoints.len();
        for (pair, list) in &matches {
            if pair.lo >= pair.hi {
                return Err(SfmError::InvalidConfig(format!(
                    "match key ({}, {}) is not canonical",
                    pair.lo, pair.hi
                )));
            }
            if pair.hi >= n {
                return Err(SfmError::UnknownImage { image: pair.hi });
            }
            for m in list {
                check_index(&keypoints, pair.lo, m.query_idx)?;
                check_index(&keypoints, pair.hi, m.train_idx)?;
            }
        }

        let mut adjacency = vec![vec![0; n]; n];
        for (pair, list) in &matches {
            adjacency[pair.lo][pair.hi] = list.len();
            adjacency[pair.hi][pair.lo] = list.len();
        }

        Ok(Self {
            keypoints,
            matches,
            adjacency,
        })
    }

    /// Replace the derived adjacency with an externally supplied count matrix.
    ///
    /// The matrix is informational only; it must be square and sized to the
    /// number of images.
    pub fn with_adjacency(mut self, adjacency: Vec<Vec<usize>>) -> Result<Self> {
        let n = self.num_images();
        if adjacency.len() != n || adjacency.iter().any(|row| row.len() != n) {
            return Err(SfmError::InvalidConfig(format!(
                "adjacency must be {n}x{n}"
            )));
        }
        self.adjacency = adjacency;
        Ok(self)
    }

    pub fn num_images(&self) -> usize {
        self.keypoints.len()
    }

    pub fn keypoints(&self, image: ImageId) -> Result<&[Keypoint]> {
        self.keypoints
            .get(image)
            .map(Vec::as_slice)
            .ok_or(SfmError::UnknownImage { image })
    }

    /// Bounds-checked keypoint lookup.
    pub fn keypoint(&self, image: ImageId, index: usize) -> Result<Keypoint> {
        check_index(&self.keypoints, image, index)?;
        Ok(self.keypoints[image][index])
    }

    /// Matches of the unordered pair `{a, b}` in canonical orientation.
    ///
    /// Empty when the pair has no matches or `a == b`.
    pub fn matches(&self, a: ImageId, b: ImageId) -> &[Match] {
        PairKey::new(a, b)
            .and_then(|key| self.matches.get(&key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Matches of `{from, to}` as `(index in from, index in to)` pairs.
    pub fn oriented_matches(&self, from: ImageId, to: ImageId) -> Vec<(usize, usize)> {
        let flip = from > to;
        self.matches(from, to)
            .iter()
            .map(|m| {
                if flip {
                    (m.train_idx, m.query_idx)
                } else {
                    (m.query_idx, m.train_idx)
                }
            })
            .collect()
    }

    /// Number of raw matches between `a` and `b`.
    pub fn num_matches(&self, a: ImageId, b: ImageId) -> usize {
        self.matches(a, b).len()
    }

    /// All pairs with matches, in canonical key order.
    pub fn pairs(&self) -> impl Iterator<Item = (PairKey, &[Match])> + '_ {
        self.matches.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn adjacency(&self, a: ImageId, b: ImageId) -> usize {
        self.adjacency
            .get(a)
            .and_then(|row| row.get(b))
            .copied()
            .unwrap_or(0)
    }
}

fn check_index(keypoints: &[Vec<Keypoint>], image: ImageId, index: usize) -> Result<()> {
    let list = keypoints
        .get(image)
        .ok_or(SfmError::UnknownImage { image })?;
    if index >= list.len() {
        return Err(SfmError::KeypointOutOfBounds {
            image,
            index,
            len: list.len(),
        });
    }
    Ok(())
}
