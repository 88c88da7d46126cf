//! Level of detail sampling.
//!
//! A node's LOD is a stride sample: with `n` candidates and a budget of `m`,
//! everything is kept when `n <= m`, otherwise the candidates at
//! `floor(i * n / m)` for `i` in `0..m`. The rule depends only on `n` and
//! `m`, so rebuilding a tree from the same input yields the same LOD.

use crate::model::chunk::Chunk;

pub fn sample_indices(n: usize, m: usize) -> Vec<usize> {
	if n <= m {
		return (0..n).collect();
	}
	(0..m).map(|i| ((i as u128 * n as u128) / m as u128) as usize).collect()
}

/// Stride sample of `chunk`. Every attribute follows the kept positions.
pub fn sample(chunk: &Chunk, m: usize) -> Chunk {
	if chunk.len() <= m {
		return chunk.clone();
	}
	chunk.subset(&sample_indices(chunk.len(), m))
}
