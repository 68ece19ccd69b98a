use log::trace;

use crate::bit_reader::BitSource;
use crate::PacketError;

/// A tag tree represents a 2d-array of natural numbers.
///
/// B.10.2 A tag tree is a way of representing a two-dimensional array of non-negative integers in
/// a hierarchical way. It successively creates reduced resolution levels of this two-dimensional
/// array, forming a tree. At every node of this tree the minimum integer of the (up to four) nodes
/// below it is recorded. Figure B.12 shows an example of this representation. The notation, qi(m,
/// n), is the value at the node that is mth from the left and nth from the top, at the ith level.
/// Level 0 is the lowest level of the tag tree; it contains the top node.
///
/// The tree is decoded lazily: every node only knows a lower bound of its value until a 1-bit
/// marks the bound as exact. Bounds never decrease and exact nodes never become inexact again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagTree {
    /// levels is a Vec containing data (width, nodes) for each level of the tree.
    levels: Vec<(usize, Vec<TagTreeNode>)>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TagTreeNode {
    lower_bound: u32,
    is_exact: bool,
}

impl TagTreeNode {
    pub fn lower_bound(&self) -> u32 {
        self.lower_bound
    }

    pub fn is_exact(&self) -> bool {
        self.is_exact
    }
}

impl TagTree {
    pub fn new(width: usize, height: usize) -> Self {
        let mut mw = width;
        let mut mh = height;
        let mut levels = Vec::new();
        // Determine depth by dividing out groups of 4
        while mw > 1 || mh > 1 {
            let w = mw.max(1);
            let size = w * mh.max(1);
            levels.push((w, vec![TagTreeNode::default(); size]));
            mw = mw.div_ceil(2);
            mh = mh.div_ceil(2);
        }
        levels.push((1, vec![TagTreeNode::default(); 1]));
        levels.reverse(); // reverse in place so level 0 is at index 0

        TagTree { levels }
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn node(&self, level: usize, x: usize, y: usize) -> Option<TagTreeNode> {
        let (width, nodes) = self.levels.get(level)?;
        nodes.get(y * width + x).copied()
    }

    // Node index of (x, y) at every level, root first.
    fn path(&self, x: usize, y: usize) -> Vec<usize> {
        let max_depth = self.levels.len() - 1;
        self.levels
            .iter()
            .enumerate()
            .map(|(level, (width, _))| {
                let shift = max_depth - level;
                (y >> shift) * width + (x >> shift)
            })
            .collect()
    }

    /// Is the value at (x, y) less than or equal to `threshold`?
    ///
    /// Reads only the bits needed to decide. On [`PacketError::NeedMoreData`] no node changes.
    pub fn query_le<B: BitSource>(
        &mut self,
        x: usize,
        y: usize,
        threshold: u32,
        bits: &mut B,
    ) -> Result<bool, PacketError> {
        Ok(self.decode(x, y, threshold, bits)?.is_some())
    }

    /// Resolves the value at (x, y) completely.
    pub fn exact_value<B: BitSource>(
        &mut self,
        x: usize,
        y: usize,
        bits: &mut B,
    ) -> Result<u32, PacketError> {
        match self.decode(x, y, u32::MAX, bits)? {
            Some(value) => Ok(value),
            None => Err(PacketError::Usage {
                reason: "tag tree leaf left unresolved",
            }),
        }
    }

    // Walks root to leaf on copies of the path nodes and publishes them only once the walk
    // finished. Returns the leaf value when it is known to be <= threshold.
    fn decode<B: BitSource>(
        &mut self,
        x: usize,
        y: usize,
        threshold: u32,
        bits: &mut B,
    ) -> Result<Option<u32>, PacketError> {
        let path = self.path(x, y);
        let mut nodes: Vec<TagTreeNode> = path
            .iter()
            .enumerate()
            .map(|(level, &index)| self.levels[level].1[index])
            .collect();

        let mut parent_value = 0;
        let mut leaf_value = None;
        for node in nodes.iter_mut() {
            if node.lower_bound < parent_value {
                node.lower_bound = parent_value;
            }
            while !node.is_exact && node.lower_bound <= threshold {
                if bits.shift_bit()? == 1 {
                    node.is_exact = true;
                } else {
                    node.lower_bound += 1;
                }
            }
            if !node.is_exact || node.lower_bound > threshold {
                leaf_value = None;
                break;
            }
            parent_value = node.lower_bound;
            leaf_value = Some(node.lower_bound);
        }

        for (level, (&index, node)) in path.iter().zip(nodes).enumerate() {
            self.levels[level].1[index] = node;
        }
        trace!("tag tree ({}, {}) <= {}: {:?}", x, y, threshold, leaf_value);
        Ok(leaf_value)
    }
}
