//! SVDAG builder: recursive octant subdivision with hash-consing.
//!
//! Structurally identical subtrees collapse to one node: after building a
//! subtree its canonical words are looked up in a cons table and reused if
//! already allocated. The table is keyed on the exact words, so equality is
//! structural, not a hash digest that could collide on the wire.

use std::collections::HashMap;

use super::dag::{Svdag, TAG_INNER, TAG_LEAF};
use crate::voxel::chunk::{VoxelGrid, CHUNK_SIZE};

/// Builds a deduplicated SVDAG from a dense 32^3 voxel grid.
pub struct SvdagBuilder {
    nodes: Vec<u32>,
    leaves: Vec<u32>,
    node_count: u32,
    /// Canonical node words -> node word offset.
    cons: HashMap<Box<[u32]>, u32>,
    /// Block ID -> leaf table index.
    leaf_ids: HashMap<u32, u32>,
}

impl SvdagBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            leaves: Vec::new(),
            node_count: 0,
            cons: HashMap::new(),
            leaf_ids: HashMap::new(),
        }
    }

    /// Build the DAG for a voxel grid. All-air grids produce the canonical
    /// empty DAG (`node_count == 0`).
    pub fn build(mut self, grid: &VoxelGrid) -> Svdag {
        let root = self.build_cell(grid, 0, 0, 0, CHUNK_SIZE);

        match root {
            None => Svdag::empty(),
            Some(root) => {
                log::trace!(
                    "svdag: {} logical nodes ({} words), {} leaves",
                    self.node_count,
                    self.nodes.len(),
                    self.leaves.len(),
                );
                Svdag {
                    nodes: self.nodes,
                    leaves: self.leaves,
                    root,
                    node_count: self.node_count,
                }
            }
        }
    }

    /// Build the subtree for the cube at (x0, y0, z0) with edge `size`.
    /// Returns the node's word offset, or None when the cube is all air.
    fn build_cell(
        &mut self,
        grid: &VoxelGrid,
        x0: u32,
        y0: u32,
        z0: u32,
        size: u32,
    ) -> Option<u32> {
        if size == 1 {
            let block = grid.get(x0, y0, z0);
            if block == 0 {
                return None;
            }
            let leaf_idx = self.intern_leaf(block);
            return Some(self.intern_node(&[TAG_LEAF, leaf_idx]));
        }

        let half = size / 2;
        let mut mask = 0u32;
        let mut children = [0u32; 8];
        let mut child_count = 0usize;

        // Ascending octant order: child slots must match mask bit order,
        // which is what the traversal's popcount indexing assumes.
        for octant in 0..8u32 {
            let ox = x0 + (octant & 1) * half;
            let oy = y0 + ((octant >> 1) & 1) * half;
            let oz = z0 + ((octant >> 2) & 1) * half;

            if let Some(child) = self.build_cell(grid, ox, oy, oz, half) {
                mask |= 1 << octant;
                children[child_count] = child;
                child_count += 1;
            }
        }

        if mask == 0 {
            return None;
        }

        let mut key = Vec::with_capacity(2 + child_count);
        key.push(TAG_INNER);
        key.push(mask);
        key.extend_from_slice(&children[..child_count]);
        Some(self.intern_node(&key))
    }

    fn intern_leaf(&mut self, block: u32) -> u32 {
        if let Some(&idx) = self.leaf_ids.get(&block) {
            return idx;
        }
        let idx = self.leaves.len() as u32;
        self.leaves.push(block);
        self.leaf_ids.insert(block, idx);
        idx
    }

    fn intern_node(&mut self, words: &[u32]) -> u32 {
        if let Some(&off) = self.cons.get(words) {
            return off;
        }
        let off = self.nodes.len() as u32;
        self.nodes.extend_from_slice(words);
        self.node_count += 1;
        self.cons.insert(words.into(), off);
        off
    }
}

impl Default for SvdagBuilder {
    fn default() -> Self {
        Self::new()
    }
}
