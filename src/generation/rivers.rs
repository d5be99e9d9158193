//! River extraction by flow accumulation.
//!
//! Every cell receives one unit of rainfall and passes its accumulated
//! flow to its lowest 8-neighbor. Processing cells from highest to lowest
//! makes a single pass sufficient; no pathfinding is involved, so the
//! result is a pure function of the heightmap.

use super::heightmap::HeightField;

const NEIGHBORS: [(isize, isize); 8] = [
    (-1, -1), (0, -1), (1, -1),
    (-1, 0),           (1, 0),
    (-1, 1),  (0, 1),  (1, 1),
];

/// Accumulated flow per cell, same layout as the heightmap.
pub fn flow_accumulation(height: &HeightField) -> Vec<f32> {
    let size = height.size();
    let mut flow = vec![1.0f32; size * size];

    // Highest first; ties broken by index so ordering is deterministic.
    let mut order: Vec<usize> = (0..size * size).collect();
    order.sort_by(|&a, &b| {
        height.data()[b]
            .total_cmp(&height.data()[a])
            .then(a.cmp(&b))
    });

    for idx in order {
        let x = (idx % size) as isize;
        let z = (idx / size) as isize;
        let h = height.data()[idx];

        let mut best: Option<(usize, f32)> = None;
        for (dx, dz) in NEIGHBORS {
            let (nx, nz) = (x + dx, z + dz);
            if nx < 0 || nz < 0 || nx >= size as isize || nz >= size as isize {
                continue;
            }
            let nidx = nz as usize * size + nx as usize;
            let nh = height.data()[nidx];
            if nh < h && best.map_or(true, |(_, bh)| nh < bh) {
                best = Some((nidx, nh));
            }
        }

        if let Some((nidx, _)) = best {
            flow[nidx] += flow[idx];
        }
    }

    flow
}

/// Binary river mask: 1 where accumulated flow exceeds `threshold` and the
/// cell sits below `snow_line` (normalized height). High-altitude cells
/// carry flow but render as valleys, not water.
pub fn river_mask(height: &HeightField, threshold: f32, snow_line: f32) -> Vec<u8> {
    let flow = flow_accumulation(height);
    flow.iter()
        .zip(height.data())
        .map(|(&f, &h)| u8::from(f > threshold && h < snow_line))
        .collect()
}
