//! Dynamic-programming solver for the sector-choice lifecycle model
//!
//! A `Model` bundles immutable parameters with the grid and income process
//! they are solved on. Grid and income are reference-counted so that
//! counterfactual variants can share the baseline objects.

mod bellman;
mod solution;
mod utility;

pub use bellman::BellmanSolver;
pub use solution::{AgeSolution, SectorChoice, Solution, StatePolicy};
pub use utility::{crra, smoothed_max};

use std::sync::Arc;

use crate::error::{ModelError, ModelResult};
use crate::grid::StateGrid;
use crate::income::IncomeProcess;
use crate::params::{GridConfig, Parameters};

#[derive(Debug, Clone)]
pub struct Model {
    pub params: Parameters,
    pub grid: Arc<StateGrid>,
    pub income: Arc<IncomeProcess>,
}

impl Model {
    /// Validate parameters and build a fresh grid and income process
    pub fn build(params: Parameters, grid_config: &GridConfig) -> ModelResult<Self> {
        params.validate()?;
        let grid = StateGrid::build(grid_config, &params)?;
        let income = IncomeProcess::new(&params);
        Ok(Self { params, grid: Arc::new(grid), income: Arc::new(income) })
    }

    /// Reuse existing grid and income objects with new parameters.
    ///
    /// The grid must still reach the looser borrowing limit.
    pub fn from_parts(
        params: Parameters,
        grid: Arc<StateGrid>,
        income: Arc<IncomeProcess>,
    ) -> ModelResult<Self> {
        params.validate()?;
        if grid.assets.min() > params.natural_asset_min() + 1e-10 {
            return Err(ModelError::config(format!(
                "asset grid starts at {} above the borrowing limit {}",
                grid.assets.min(),
                params.natural_asset_min()
            )));
        }
        Ok(Self { params, grid, income })
    }

    pub fn solve(&self) -> ModelResult<Solution> {
        BellmanSolver::new(self).solve()
    }
}
