//! Tauchen discretization of log productivity
//!
//! All sectors share one set of nodes so that sector switches map a node to
//! itself; each sector gets its own transition matrix from its own innovation
//! variance.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{ModelError, ModelResult};
use crate::params::Sector;

/// Row-stochastic matrix stored row-major
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    n: usize,
    probs: Vec<f64>,
}

impl TransitionMatrix {
    pub fn identity(n: usize) -> Self {
        let mut probs = vec![0.0; n * n];
        for i in 0..n {
            probs[i * n + i] = 1.0;
        }
        Self { n, probs }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.probs[i * self.n..(i + 1) * self.n]
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.probs[i * self.n + j]
    }

    /// Draw the next node from row `i` given a uniform draw `u` in [0, 1)
    pub fn sample_next(&self, i: usize, u: f64) -> usize {
        let mut cum = 0.0;
        for (j, &p) in self.row(i).iter().enumerate() {
            cum += p;
            if u < cum {
                return j;
            }
        }
        // Rounding left u above the final cumulative sum
        self.row(i).iter().rposition(|&p| p > 0.0).unwrap_or(self.n - 1)
    }

    /// Largest deviation of a row sum from one
    pub fn max_row_error(&self) -> f64 {
        (0..self.n)
            .map(|i| (self.row(i).iter().sum::<f64>() - 1.0).abs())
            .fold(0.0, f64::max)
    }
}

/// Productivity nodes plus per-sector transition matrices
#[derive(Debug, Clone, PartialEq)]
pub struct ProductivityGrid {
    nodes: Vec<f64>,
    rho: f64,
    transitions: Vec<TransitionMatrix>,
}

impl ProductivityGrid {
    /// Discretize `z' = rho * z + eta_s`, `eta_s ~ N(0, sigma_s^2)`.
    ///
    /// The node range is `+/- n_std` standard deviations of the widest sector
    /// process: the unconditional deviation when `rho < 1`, the deviation
    /// accumulated over `periods` steps for the random walk.
    pub fn tauchen(
        n: usize,
        n_std: f64,
        rho: f64,
        periods: usize,
        sigmas: [f64; 2],
    ) -> ModelResult<Self> {
        if n == 0 {
            return Err(ModelError::config("productivity grid needs at least 1 node"));
        }
        if n == 1 {
            return Ok(Self {
                nodes: vec![0.0],
                rho,
                transitions: vec![TransitionMatrix::identity(1); Sector::ALL.len()],
            });
        }

        let sigma_max = sigmas[0].max(sigmas[1]);
        if !(sigma_max > 0.0) {
            return Err(ModelError::config(
                "more than one productivity node requires a positive permanent variance",
            ));
        }
        let spread = if rho < 1.0 {
            sigma_max / (1.0 - rho * rho).sqrt()
        } else {
            sigma_max * (periods.max(1) as f64).sqrt()
        };
        let half_width = n_std * spread;
        let step = 2.0 * half_width / (n - 1) as f64;
        let nodes: Vec<f64> = (0..n).map(|j| -half_width + step * j as f64).collect();

        let mut grid = Self { nodes, rho, transitions: Vec::with_capacity(Sector::ALL.len()) };
        for sigma in sigmas {
            let matrix = grid.transition_for(sigma)?;
            grid.transitions.push(matrix);
        }
        Ok(grid)
    }

    /// Copy with one sector's matrix rebuilt from a new innovation deviation, nodes unchanged
    pub fn with_sector_sigma(&self, sector: Sector, sigma: f64) -> ModelResult<Self> {
        let mut out = self.clone();
        out.transitions[sector.index()] = if self.nodes.len() == 1 {
            TransitionMatrix::identity(1)
        } else {
            self.transition_for(sigma)?
        };
        Ok(out)
    }

    fn transition_for(&self, sigma: f64) -> ModelResult<TransitionMatrix> {
        let n = self.nodes.len();
        if sigma == 0.0 {
            // Deterministic: all mass on the node nearest rho * z
            let mut probs = vec![0.0; n * n];
            for i in 0..n {
                let j = self.nearest_index(self.rho * self.nodes[i]);
                probs[i * n + j] = 1.0;
            }
            return Ok(TransitionMatrix { n, probs });
        }

        let normal = Normal::new(0.0, sigma)
            .map_err(|e| ModelError::config(format!("invalid innovation deviation {}: {}", sigma, e)))?;
        let half_step = (self.nodes[1] - self.nodes[0]) / 2.0;
        let mut probs = vec![0.0; n * n];

        for i in 0..n {
            let mean = self.rho * self.nodes[i];
            for j in 0..n {
                let upper = if j == n - 1 { 1.0 } else { normal.cdf(self.nodes[j] + half_step - mean) };
                let lower = if j == 0 { 0.0 } else { normal.cdf(self.nodes[j] - half_step - mean) };
                probs[i * n + j] = (upper - lower).max(0.0);
            }
            let total: f64 = probs[i * n..(i + 1) * n].iter().sum();
            for p in &mut probs[i * n..(i + 1) * n] {
                *p /= total;
            }
        }

        Ok(TransitionMatrix { n, probs })
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

    pub fn transition(&self, sector: Sector) -> &TransitionMatrix {
        &self.transitions[sector.index()]
    }

    pub fn nearest_index(&self, z: f64) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (j, &node) in self.nodes.iter().enumerate() {
            let d = (node - z).abs();
            if d < best_dist {
                best = j;
                best_dist = d;
            }
        }
        best
    }
}
