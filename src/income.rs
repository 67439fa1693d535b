//! Sector income process
//!
//! Income in sector s at log productivity z is `y = w_s * exp(z + eps)` with
//! a transitory shock `eps ~ N(0, var_transitory_s)`. The solver works with
//! expected income; the simulator draws realizations.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::params::{Parameters, Sector, SectorIncome};

#[derive(Debug, Clone, PartialEq)]
pub struct IncomeProcess {
    sectors: [SectorIncome; 2],
}

impl IncomeProcess {
    pub fn new(params: &Parameters) -> Self {
        Self { sectors: [params.formal, params.informal] }
    }

    pub fn sector(&self, sector: Sector) -> &SectorIncome {
        &self.sectors[sector.index()]
    }

    /// E[y | z, s] = w_s * exp(z + var_transitory_s / 2)
    pub fn expected(&self, log_productivity: f64, sector: Sector) -> f64 {
        let inc = self.sector(sector);
        inc.wage * (log_productivity + 0.5 * inc.var_transitory).exp()
    }

    /// Income for a given standard-normal draw.
    ///
    /// Zero transitory variance makes the draw irrelevant rather than dividing by zero.
    pub fn realize(&self, log_productivity: f64, sector: Sector, std_normal: f64) -> f64 {
        let inc = self.sector(sector);
        let shock = if inc.var_transitory > 0.0 { inc.sigma_transitory() * std_normal } else { 0.0 };
        inc.wage * (log_productivity + shock).exp()
    }

    pub fn sample<R: Rng + ?Sized>(&self, log_productivity: f64, sector: Sector, rng: &mut R) -> f64 {
        let e: f64 = rng.sample(StandardNormal);
        self.realize(log_productivity, sector, e)
    }

    /// Copy with the informal shock variances set to the formal ones
    pub fn with_equal_risk(&self) -> Self {
        let formal = self.sectors[Sector::Formal.index()];
        let mut informal = self.sectors[Sector::Informal.index()];
        informal.var_permanent = formal.var_permanent;
        informal.var_transitory = formal.var_transitory;
        Self { sectors: [formal, informal] }
    }

    /// Ratio of expected formal to informal income at the same productivity
    pub fn wage_ratio(&self) -> f64 {
        self.expected(0.0, Sector::Formal) / self.expected(0.0, Sector::Informal)
    }
}
