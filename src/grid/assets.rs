//! Asset grid with nodes clustered near the borrowing limit

use crate::error::{ModelError, ModelResult};

/// Tolerance for treating two asset levels as the same node
const NODE_TOL: f64 = 1e-10;

/// Ordered, strictly increasing asset grid
#[derive(Debug, Clone, PartialEq)]
pub struct AssetGrid {
    nodes: Vec<f64>,
}

impl AssetGrid {
    /// Build a power-spaced grid on [a_min, a_max] and insert kink nodes.
    ///
    /// Node i sits at `a_min + (a_max - a_min) * (i / (n - 1))^curvature`, so a
    /// curvature above one concentrates nodes near `a_min`. Kinks inside the
    /// range (borrowing limits, zero) are added if not already present.
    pub fn build(
        n: usize,
        a_min: f64,
        a_max: f64,
        curvature: f64,
        kinks: &[f64],
    ) -> ModelResult<Self> {
        if n < 2 {
            return Err(ModelError::config(format!("asset grid needs at least 2 nodes, got {}", n)));
        }
        if !(a_min < a_max) || !a_min.is_finite() || !a_max.is_finite() {
            return Err(ModelError::config(format!(
                "asset grid bounds must satisfy a_min < a_max, got [{}, {}]",
                a_min, a_max
            )));
        }
        if !(curvature >= 1.0) {
            return Err(ModelError::config(format!("grid curvature must be >= 1, got {}", curvature)));
        }

        let span = a_max - a_min;
        let mut nodes: Vec<f64> = (0..n)
            .map(|i| {
                let frac = i as f64 / (n - 1) as f64;
                a_min + span * frac.powf(curvature)
            })
            .collect();
        // Pin the end points exactly
        nodes[0] = a_min;
        nodes[n - 1] = a_max;

        for &k in kinks {
            if k > a_min && k < a_max && !nodes.iter().any(|&x| (x - k).abs() <= NODE_TOL * span.max(1.0)) {
                nodes.push(k);
            }
        }
        nodes.sort_by(|a, b| a.total_cmp(b));

        Ok(Self { nodes })
    }

    /// Use explicit nodes, which must be finite and strictly increasing
    pub fn from_nodes(nodes: Vec<f64>) -> ModelResult<Self> {
        if nodes.len() < 2 {
            return Err(ModelError::config("asset grid needs at least 2 nodes"));
        }
        if nodes.iter().any(|x| !x.is_finite()) {
            return Err(ModelError::config("asset grid nodes must be finite"));
        }
        if nodes.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ModelError::config("asset grid nodes must be strictly increasing"));
        }
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, i: usize) -> f64 {
        self.nodes[i]
    }

    pub fn min(&self) -> f64 {
        self.nodes[0]
    }

    pub fn max(&self) -> f64 {
        self.nodes[self.nodes.len() - 1]
    }

    /// First node at or above `x` (within tolerance)
    pub fn first_at_or_above(&self, x: f64) -> Option<usize> {
        let idx = self.nodes.partition_point(|&a| a < x - NODE_TOL);
        (idx < self.nodes.len()).then_some(idx)
    }

    /// Last node at or below `x` (within tolerance)
    pub fn last_at_or_below(&self, x: f64) -> Option<usize> {
        let idx = self.nodes.partition_point(|&a| a <= x + NODE_TOL);
        idx.checked_sub(1)
    }

    /// Bracketing interval for linear interpolation.
    ///
    /// Returns `(i, w)` with `x = (1 - w) * a[i] + w * a[i + 1]`; points
    /// outside the grid are clamped to the end intervals with `w` in {0, 1}.
    pub fn locate(&self, x: f64) -> (usize, f64) {
        let n = self.nodes.len();
        if x <= self.nodes[0] {
            return (0, 0.0);
        }
        if x >= self.nodes[n - 1] {
            return (n - 2, 1.0);
        }
        let hi = self.nodes.partition_point(|&a| a <= x);
        let lo = hi - 1;
        let w = (x - self.nodes[lo]) / (self.nodes[hi] - self.nodes[lo]);
        (lo, w)
    }

    /// Linear interpolation of values defined on the nodes
    pub fn interpolate(&self, values: &[f64], x: f64) -> f64 {
        let (i, w) = self.locate(x);
        if w == 0.0 {
            values[i]
        } else if w == 1.0 {
            values[i + 1]
        } else {
            (1.0 - w) * values[i] + w * values[i + 1]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_uniform_grid() {
        let grid = AssetGrid::build(5, -1.0, 3.0, 1.0, &[]).unwrap();
        assert_eq!(grid.nodes(), &[-1.0, 0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_curved_grid_is_denser_near_min() {
        let grid = AssetGrid::build(10, -1.0, 9.0, 2.0, &[]).unwrap();
        let first_gap = grid.get(1) - grid.get(0);
        let last_gap = grid.get(9) - grid.get(8);
        assert!(first_gap < last_gap);
        assert!(grid.nodes().windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_kinks_are_inserted() {
        let grid = AssetGrid::build(4, -2.0, 4.0, 1.0, &[-0.5, 0.0, 2.0, 10.0]).unwrap();
        // 0.0 and 2.0 already nodes, 10.0 outside range
        assert_eq!(grid.nodes(), &[-2.0, -0.5, 0.0, 2.0, 4.0]);
        assert_eq!(grid.first_at_or_above(-0.5).map(|i| grid.get(i)), Some(-0.5));
    }

    #[test]
    fn test_rejects_bad_bounds() {
        assert!(AssetGrid::build(5, 1.0, 1.0, 1.0, &[]).is_err());
        assert!(AssetGrid::build(1, 0.0, 1.0, 1.0, &[]).is_err());
        assert!(AssetGrid::from_nodes(vec![0.0, 0.0, 1.0]).is_err());
    }

    #[test]
    fn test_node_search() {
        let grid = AssetGrid::from_nodes(vec![-1.0, 0.0, 1.0, 2.0]).unwrap();
        assert_eq!(grid.first_at_or_above(-1.0), Some(0));
        assert_eq!(grid.first_at_or_above(-0.5), Some(1));
        assert_eq!(grid.first_at_or_above(2.5), None);
        assert_eq!(grid.last_at_or_below(0.7), Some(1));
        assert_eq!(grid.last_at_or_below(-1.5), None);
    }

    #[test]
    fn test_locate_and_interpolate() {
        let grid = AssetGrid::from_nodes(vec![0.0, 1.0, 3.0]).unwrap();
        let (i, w) = grid.locate(2.0);
        assert_eq!(i, 1);
        assert_relative_eq!(w, 0.5);

        let values = [0.0, 10.0, 30.0];
        assert_relative_eq!(grid.interpolate(&values, 2.0), 20.0);
        assert_relative_eq!(grid.interpolate(&values, -1.0), 0.0);
        assert_relative_eq!(grid.interpolate(&values, 5.0), 30.0);
    }
}
