//! Structural parameters and run configuration
//!
//! `Parameters` is immutable once a solve begins; every component receives it
//! by reference. Estimation works on the subset `Theta` and produces new
//! `Parameters` values rather than mutating a shared one.

mod config;

pub use config::{
    EstimationConfig, GridConfig, ParameterBounds, RunConfig, SectorSet, SimulationConfig,
};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Labor-market sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sector {
    Formal,
    Informal,
}

impl Sector {
    pub const ALL: [Sector; 2] = [Sector::Formal, Sector::Informal];

    /// Position in sector-indexed arrays
    pub fn index(self) -> usize {
        match self {
            Sector::Formal => 0,
            Sector::Informal => 1,
        }
    }

    pub fn from_index(idx: usize) -> Option<Sector> {
        Sector::ALL.get(idx).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Sector::Formal => "formal",
            Sector::Informal => "informal",
        }
    }

    pub fn parse(s: &str) -> Option<Sector> {
        match s.trim().to_ascii_lowercase().as_str() {
            "formal" | "f" | "0" => Some(Sector::Formal),
            "informal" | "i" | "1" => Some(Sector::Informal),
            _ => None,
        }
    }
}

/// Wage level and shock variances for one sector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectorIncome {
    /// Sector wage level w_s
    pub wage: f64,
    /// Variance of the permanent (productivity) innovation
    pub var_permanent: f64,
    /// Variance of the transitory income shock
    pub var_transitory: f64,
}

impl SectorIncome {
    pub fn sigma_permanent(&self) -> f64 {
        self.var_permanent.sqrt()
    }

    pub fn sigma_transitory(&self) -> f64 {
        self.var_transitory.sqrt()
    }
}

/// Structural parameters of the lifecycle model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    /// Discount factor
    pub beta: f64,
    /// CRRA coefficient
    pub gamma: f64,
    /// Interest rate on assets and debt
    pub interest_rate: f64,
    /// Persistence of log productivity (1.0 = random walk)
    pub rho: f64,
    pub formal: SectorIncome,
    pub informal: SectorIncome,
    /// Borrowing limit in the formal sector (assets may fall to -b_formal)
    pub b_formal: f64,
    pub b_informal: f64,
    /// Switching cost, consumption units
    pub kappa: f64,
    /// Scale of extreme-value sector taste shocks
    pub sigma_pref: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self::default_calibration()
    }
}

impl Parameters {
    /// Externally calibrated baseline with mid-range values for the estimated block
    pub fn default_calibration() -> Self {
        Self {
            beta: 0.95,
            gamma: 2.0,
            interest_rate: 0.03,
            rho: 1.0,
            formal: SectorIncome { wage: 1.0, var_permanent: 0.002, var_transitory: 0.01 },
            informal: SectorIncome { wage: 0.75, var_permanent: 0.004, var_transitory: 0.03 },
            b_formal: 0.4,
            b_informal: 0.1,
            kappa: 0.05,
            sigma_pref: 0.05,
        }
    }

    pub fn income(&self, sector: Sector) -> &SectorIncome {
        match sector {
            Sector::Formal => &self.formal,
            Sector::Informal => &self.informal,
        }
    }

    pub fn income_mut(&mut self, sector: Sector) -> &mut SectorIncome {
        match sector {
            Sector::Formal => &mut self.formal,
            Sector::Informal => &mut self.informal,
        }
    }

    pub fn borrowing_limit(&self, sector: Sector) -> f64 {
        match sector {
            Sector::Formal => self.b_formal,
            Sector::Informal => self.b_informal,
        }
    }

    /// Lowest admissible asset position for a sector
    pub fn asset_floor(&self, sector: Sector) -> f64 {
        -self.borrowing_limit(sector)
    }

    /// a_min = -max(b_formal, b_informal)
    pub fn natural_asset_min(&self) -> f64 {
        -self.b_formal.max(self.b_informal)
    }

    pub fn switching_cost(&self, from: Sector, to: Sector) -> f64 {
        if from == to { 0.0 } else { self.kappa }
    }

    pub fn theta(&self) -> Theta {
        Theta {
            b_formal: self.b_formal,
            b_informal: self.b_informal,
            kappa: self.kappa,
            sigma_pref: self.sigma_pref,
        }
    }

    /// Copy with the estimated block replaced
    pub fn with_theta(&self, theta: &Theta) -> Self {
        Self {
            b_formal: theta.b_formal,
            b_informal: theta.b_informal,
            kappa: theta.kappa,
            sigma_pref: theta.sigma_pref,
            ..self.clone()
        }
    }

    /// Reject parameter sets that cannot be solved
    pub fn validate(&self) -> ModelResult<()> {
        if !(self.beta > 0.0 && self.beta <= 1.0) {
            return Err(ModelError::config(format!("beta must lie in (0, 1], got {}", self.beta)));
        }
        if !(self.gamma > 0.0 && self.gamma.is_finite()) {
            return Err(ModelError::config(format!("gamma must be positive, got {}", self.gamma)));
        }
        if !(self.interest_rate > -1.0 && self.interest_rate.is_finite()) {
            return Err(ModelError::config(format!(
                "interest rate must exceed -1, got {}",
                self.interest_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.rho) {
            return Err(ModelError::config(format!("rho must lie in [0, 1], got {}", self.rho)));
        }
        for sector in Sector::ALL {
            let inc = self.income(sector);
            if !(inc.wage > 0.0 && inc.wage.is_finite()) {
                return Err(ModelError::config(format!(
                    "{} wage must be positive, got {}",
                    sector.name(),
                    inc.wage
                )));
            }
            // Zero variance is the degenerate no-risk case and is allowed
            if !(inc.var_permanent >= 0.0 && inc.var_permanent.is_finite())
                || !(inc.var_transitory >= 0.0 && inc.var_transitory.is_finite())
            {
                return Err(ModelError::config(format!(
                    "{} income variances must be non-negative and finite",
                    sector.name()
                )));
            }
            let b = self.borrowing_limit(sector);
            if !(b >= 0.0 && b.is_finite()) {
                return Err(ModelError::config(format!(
                    "{} borrowing limit must be non-negative, got {}",
                    sector.name(),
                    b
                )));
            }
        }
        if self.b_informal > self.b_formal {
            return Err(ModelError::config(format!(
                "informal borrowing limit {} exceeds formal limit {}",
                self.b_informal, self.b_formal
            )));
        }
        if !(self.kappa >= 0.0 && self.kappa.is_finite()) {
            return Err(ModelError::config(format!("kappa must be non-negative, got {}", self.kappa)));
        }
        if !(self.sigma_pref >= 0.0 && self.sigma_pref.is_finite()) {
            return Err(ModelError::config(format!(
                "sigma_pref must be non-negative, got {}",
                self.sigma_pref
            )));
        }
        Ok(())
    }
}

/// Estimated parameter block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Theta {
    pub b_formal: f64,
    pub b_informal: f64,
    pub kappa: f64,
    pub sigma_pref: f64,
}

impl Theta {
    pub const DIM: usize = 4;
    pub const NAMES: [&'static str; Theta::DIM] = ["b_formal", "b_informal", "kappa", "sigma_pref"];

    pub fn to_array(&self) -> [f64; Theta::DIM] {
        [self.b_formal, self.b_informal, self.kappa, self.sigma_pref]
    }

    pub fn from_array(x: &[f64; Theta::DIM]) -> Self {
        Self { b_formal: x[0], b_informal: x[1], kappa: x[2], sigma_pref: x[3] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_calibration_is_valid() {
        let params = Parameters::default_calibration();
        assert!(params.validate().is_ok());
        assert!(params.formal.wage > params.informal.wage);
        assert!(params.b_informal < params.b_formal);
    }

    #[test]
    fn test_natural_asset_min() {
        let params = Parameters { b_formal: 1.5, b_informal: 0.5, ..Parameters::default() };
        assert_eq!(params.natural_asset_min(), -1.5);
        assert_eq!(params.asset_floor(Sector::Informal), -0.5);
    }

    #[test]
    fn test_rejects_inverted_borrowing_limits() {
        let params = Parameters { b_formal: 0.5, b_informal: 1.0, ..Parameters::default() };
        assert!(matches!(params.validate(), Err(ModelError::Configuration(_))));
    }

    #[test]
    fn test_rejects_negative_variance() {
        let mut params = Parameters::default();
        params.informal.var_transitory = -0.1;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_theta_round_trip() {
        let params = Parameters::default();
        let theta = Theta { b_formal: 2.0, b_informal: 0.1, kappa: 0.3, sigma_pref: 0.0 };
        let updated = params.with_theta(&theta);
        assert_eq!(updated.theta(), theta);
        assert_eq!(updated.beta, params.beta);
        assert_eq!(Theta::from_array(&theta.to_array()), theta);
    }

    #[test]
    fn test_switching_cost() {
        let params = Parameters { kappa: 0.4, ..Parameters::default() };
        assert_eq!(params.switching_cost(Sector::Formal, Sector::Formal), 0.0);
        assert_eq!(params.switching_cost(Sector::Formal, Sector::Informal), 0.4);
    }

    #[test]
    fn test_sector_parse() {
        assert_eq!(Sector::parse("Informal"), Some(Sector::Informal));
        assert_eq!(Sector::parse("0"), Some(Sector::Formal));
        assert_eq!(Sector::parse("public"), None);
    }
}
