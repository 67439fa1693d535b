//! State-space discretization: assets, productivity, sectors, ages

mod assets;
mod tauchen;

pub use assets::AssetGrid;
pub use tauchen::{ProductivityGrid, TransitionMatrix};

use crate::error::ModelResult;
use crate::params::{GridConfig, Parameters, Sector, SectorSet};

/// One node of the (a, z, s) state space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridPoint {
    pub asset_idx: usize,
    pub productivity_idx: usize,
    pub sector: Sector,
}

/// Full discretized state space for one model
#[derive(Debug, Clone, PartialEq)]
pub struct StateGrid {
    pub assets: AssetGrid,
    pub productivity: ProductivityGrid,
    pub sectors: SectorSet,
    /// Working-life horizon T; ages run 1..=T with a terminal age T + 1
    pub periods: usize,
}

impl StateGrid {
    /// Build from configuration, placing a_min at the looser borrowing limit
    pub fn build(config: &GridConfig, params: &Parameters) -> ModelResult<Self> {
        let a_min = params.natural_asset_min();
        let kinks = [-params.b_formal, -params.b_informal, 0.0];
        let assets = AssetGrid::build(config.n_assets, a_min, config.a_max, config.curvature, &kinks)?;
        let productivity = ProductivityGrid::tauchen(
            config.n_productivity,
            config.n_std,
            params.rho,
            config.periods,
            [params.formal.sigma_permanent(), params.informal.sigma_permanent()],
        )?;
        Ok(Self { assets, productivity, sectors: config.sectors, periods: config.periods })
    }

    /// Assemble from pre-built components
    pub fn from_parts(
        assets: AssetGrid,
        productivity: ProductivityGrid,
        sectors: SectorSet,
        periods: usize,
    ) -> Self {
        Self { assets, productivity, sectors, periods }
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn n_productivity(&self) -> usize {
        self.productivity.len()
    }

    pub fn n_sectors(&self) -> usize {
        self.sectors.len()
    }

    pub fn n_states(&self) -> usize {
        self.n_assets() * self.n_productivity() * self.n_sectors()
    }

    /// Flat index; assets vary fastest so one (z, s) slice is contiguous
    pub fn index(&self, asset_idx: usize, productivity_idx: usize, sector: Sector) -> usize {
        (sector.index() * self.n_productivity() + productivity_idx) * self.n_assets() + asset_idx
    }

    pub fn point(&self, idx: usize) -> GridPoint {
        let n_a = self.n_assets();
        let n_z = self.n_productivity();
        let asset_idx = idx % n_a;
        let productivity_idx = (idx / n_a) % n_z;
        let sector_idx = idx / (n_a * n_z);
        GridPoint {
            asset_idx,
            productivity_idx,
            sector: Sector::from_index(sector_idx).unwrap_or(Sector::Formal),
        }
    }

    /// Contiguous range of flat indices for one (z, s) slice
    pub fn slice_range(&self, productivity_idx: usize, sector: Sector) -> std::ops::Range<usize> {
        let start = self.index(0, productivity_idx, sector);
        start..start + self.n_assets()
    }

    /// Ages in backward-induction order: T, T-1, ..., 1
    pub fn ages_backward(&self) -> impl Iterator<Item = usize> {
        (1..=self.periods).rev()
    }
}
