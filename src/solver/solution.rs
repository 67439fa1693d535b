//! Value and policy functions produced by backward induction

use std::sync::Arc;

use crate::grid::StateGrid;
use crate::params::Sector;

/// Best savings choice conditional on a next-period sector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectorChoice {
    /// u(c) + beta * E[V'] at the optimum
    pub value: f64,
    pub savings_idx: usize,
    /// Next-period assets a'
    pub savings: f64,
    pub consumption: f64,
    /// Expected income in the chosen sector at this state
    pub income: f64,
    /// Switching cost paid for this choice
    pub switching_cost: f64,
}

/// Optimal policy at one grid point and age
#[derive(Debug, Clone, PartialEq)]
pub struct StatePolicy {
    pub value: f64,
    /// Argmax sector s'*
    pub sector: Sector,
    /// Probability of choosing the informal sector (0 or 1 without taste shocks)
    pub informal_prob: f64,
    /// Sector-conditional optima, indexed by `Sector::index`; None if infeasible
    pub choices: [Option<SectorChoice>; 2],
}

impl StatePolicy {
    /// Placeholder for a grid point below its own sector's borrowing limit
    pub fn unreachable() -> Self {
        Self {
            value: f64::NEG_INFINITY,
            sector: Sector::Formal,
            informal_prob: 0.0,
            choices: [None, None],
        }
    }

    pub fn is_feasible(&self) -> bool {
        self.choices.iter().any(Option::is_some)
    }

    pub fn choice(&self, sector: Sector) -> Option<&SectorChoice> {
        self.choices[sector.index()].as_ref()
    }

    /// The argmax choice
    pub fn best(&self) -> Option<&SectorChoice> {
        self.choice(self.sector)
    }

    pub fn savings(&self) -> Option<f64> {
        self.best().map(|c| c.savings)
    }

    pub fn consumption(&self) -> Option<f64> {
        self.best().map(|c| c.consumption)
    }
}

/// Policies for every grid point at one age
#[derive(Debug, Clone)]
pub struct AgeSolution {
    pub age: usize,
    pub states: Vec<StatePolicy>,
}

/// Complete solution over ages 1..=T plus the terminal value at T + 1
#[derive(Debug, Clone)]
pub struct Solution {
    pub grid: Arc<StateGrid>,
    /// `ages[t - 1]` holds age t
    pub ages: Vec<AgeSolution>,
    pub terminal_values: Vec<f64>,
}

impl Solution {
    pub fn periods(&self) -> usize {
        self.ages.len()
    }

    pub fn policy(&self, age: usize, idx: usize) -> &StatePolicy {
        &self.ages[age - 1].states[idx]
    }

    pub fn policy_at(&self, age: usize, asset_idx: usize, productivity_idx: usize, sector: Sector) -> &StatePolicy {
        self.policy(age, self.grid.index(asset_idx, productivity_idx, sector))
    }

    /// V_t over the whole grid; age T + 1 returns the terminal values
    pub fn values(&self, age: usize) -> Vec<f64> {
        if age == self.periods() + 1 {
            self.terminal_values.clone()
        } else {
            self.ages[age - 1].states.iter().map(|p| p.value).collect()
        }
    }

    /// V_t(., z, s) along the asset dimension
    pub fn value_slice(&self, age: usize, productivity_idx: usize, sector: Sector) -> Vec<f64> {
        let range = self.grid.slice_range(productivity_idx, sector);
        if age == self.periods() + 1 {
            self.terminal_values[range].to_vec()
        } else {
            self.ages[age - 1].states[range].iter().map(|p| p.value).collect()
        }
    }

    /// Savings policy along the asset dimension for one sector's choice.
    /// Infeasible entries are NaN.
    pub fn savings_slice(&self, age: usize, productivity_idx: usize, sector: Sector, next: Sector) -> Vec<f64> {
        let range = self.grid.slice_range(productivity_idx, sector);
        self.ages[age - 1].states[range]
            .iter()
            .map(|p| p.choice(next).map_or(f64::NAN, |c| c.savings))
            .collect()
    }
}
