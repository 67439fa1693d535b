//! Moment calculator: panel -> named moment vector
//!
//! The same definitions apply to simulated and empirical panels. A moment
//! with too few observations is stored as a `MissingMomentError` value
//! instead of a number.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{MissingMomentError, ModelError, ModelResult};
use crate::panel::{Observation, Panel};
use crate::params::{Parameters, Sector};
use crate::targets::MomentId;

/// A computed moment or the reason it could not be computed
pub type MomentValue = Result<f64, MissingMomentError>;

/// Income growth variance below this is treated as no variation
const MIN_REGRESSOR_VARIANCE: f64 = 1e-14;

/// Options shared by simulated and empirical moment computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentOptions {
    /// Minimum observations behind any single moment
    pub min_observations: usize,
    /// Assets must exceed -b_s by this margin to count as having credit access
    pub credit_margin: f64,
}

impl Default for MomentOptions {
    fn default() -> Self {
        Self { min_observations: 30, credit_margin: 0.0 }
    }
}

impl MomentOptions {
    pub fn validate(&self) -> ModelResult<()> {
        if self.min_observations < 2 {
            return Err(ModelError::config("min_observations must be at least 2"));
        }
        if !(self.credit_margin >= 0.0 && self.credit_margin.is_finite()) {
            return Err(ModelError::config("credit_margin must be non-negative"));
        }
        Ok(())
    }
}

/// Named moments computed from one panel
#[derive(Debug, Clone, PartialEq)]
pub struct MomentVector {
    values: BTreeMap<MomentId, MomentValue>,
}

impl MomentVector {
    pub fn get(&self, id: MomentId) -> Option<&MomentValue> {
        self.values.get(&id)
    }

    /// The value if it was computed
    pub fn value(&self, id: MomentId) -> Option<f64> {
        self.values.get(&id).and_then(|v| v.as_ref().ok().copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = (MomentId, &MomentValue)> {
        self.values.iter().map(|(&id, v)| (id, v))
    }

    pub fn missing(&self) -> impl Iterator<Item = &MissingMomentError> {
        self.values.values().filter_map(|v| v.as_ref().err())
    }

    /// Computed moments only
    pub fn estimates(&self) -> BTreeMap<MomentId, f64> {
        self.values
            .iter()
            .filter_map(|(&id, v)| v.as_ref().ok().map(|&x| (id, x)))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct MomentCalculator {
    options: MomentOptions,
    /// Sector borrowing limits for the asset-based credit-access proxy
    borrowing_limits: Option<[f64; 2]>,
}

impl MomentCalculator {
    /// Credit access is then taken only from observed `has_credit` flags
    pub fn new(options: MomentOptions) -> Self {
        Self { options, borrowing_limits: None }
    }

    /// Enable the asset-based credit-access proxy using the model's limits
    pub fn with_borrowing_limits(options: MomentOptions, params: &Parameters) -> Self {
        Self {
            options,
            borrowing_limits: Some([params.b_formal, params.b_informal]),
        }
    }

    pub fn options(&self) -> &MomentOptions {
        &self.options
    }

    pub fn compute(&self, panel: &Panel) -> MomentVector {
        let mut values = BTreeMap::new();
        values.insert(MomentId::InformalityRate, self.informality_rate(panel));
        values.insert(MomentId::WageRatio, self.wage_ratio(panel));
        for sector in Sector::ALL {
            values.insert(MomentId::SmoothingBeta(sector), self.smoothing_beta(panel, sector));
            values.insert(
                MomentId::ConsumptionGrowthVar(sector),
                self.require(
                    MomentId::ConsumptionGrowthVar(sector),
                    &growth_pairs(panel, Some(sector)).iter().map(|g| g.consumption).collect::<Vec<_>>(),
                    sample_variance,
                ),
            );
            values.insert(MomentId::CreditAccess(sector), self.credit_access(panel, sector));
            values.insert(MomentId::Transition(sector), self.transition_rate(panel, sector));
        }
        MomentVector { values }
    }

    fn informality_rate(&self, panel: &Panel) -> MomentValue {
        let flags: Vec<f64> = panel
            .observations()
            .map(|o| if o.sector == Sector::Informal { 1.0 } else { 0.0 })
            .collect();
        self.require(MomentId::InformalityRate, &flags, mean)
    }

    fn wage_ratio(&self, panel: &Panel) -> MomentValue {
        let id = MomentId::WageRatio;
        let incomes = |s: Sector| -> Vec<f64> {
            panel.observations().filter(|o| o.sector == s).map(|o| o.income).collect()
        };
        let formal = self.require(id, &incomes(Sector::Formal), mean)?;
        let informal = self.require(id, &incomes(Sector::Informal), mean)?;
        Ok(formal / informal)
    }

    fn smoothing_beta(&self, panel: &Panel, sector: Sector) -> MomentValue {
        let id = MomentId::SmoothingBeta(sector);
        let pairs = growth_pairs(panel, Some(sector));
        self.check_count(id, pairs.len())?;

        let x: Vec<f64> = pairs.iter().map(|g| g.income).collect();
        let y: Vec<f64> = pairs.iter().map(|g| g.consumption).collect();
        ols_slope(&x, &y).ok_or_else(|| MissingMomentError::new(id, "no variation in income growth"))
    }

    fn credit_access(&self, panel: &Panel, sector: Sector) -> MomentValue {
        let flags: Vec<f64> = panel
            .observations()
            .filter(|o| o.sector == sector)
            .filter_map(|o| self.has_credit(o))
            .map(|c| if c { 1.0 } else { 0.0 })
            .collect();
        self.require(MomentId::CreditAccess(sector), &flags, mean)
    }

    /// Observed flag first, then the asset proxy a > -b_s + margin
    fn has_credit(&self, obs: &Observation) -> Option<bool> {
        if let Some(flag) = obs.has_credit {
            return Some(flag);
        }
        let limits = self.borrowing_limits?;
        let assets = obs.assets?;
        Some(assets > -limits[obs.sector.index()] + self.options.credit_margin)
    }

    fn transition_rate(&self, panel: &Panel, from: Sector) -> MomentValue {
        let switches: Vec<f64> = panel
            .trajectories
            .iter()
            .flat_map(|t| t.consecutive())
            .filter(|(prev, _)| prev.sector == from)
            .map(|(_, cur)| if cur.sector != from { 1.0 } else { 0.0 })
            .collect();
        self.require(MomentId::Transition(from), &switches, mean)
    }

    fn check_count(&self, id: MomentId, n: usize) -> Result<(), MissingMomentError> {
        if n < self.options.min_observations {
            return Err(MissingMomentError::new(
                id,
                format!("{} observations, need {}", n, self.options.min_observations),
            ));
        }
        Ok(())
    }

    fn require(&self, id: MomentId, data: &[f64], stat: fn(&[f64]) -> f64) -> MomentValue {
        self.check_count(id, data.len())?;
        Ok(stat(data))
    }
}

/// Log growth of income and consumption between adjacent periods
#[derive(Debug, Clone, Copy)]
struct Growth {
    income: f64,
    consumption: f64,
}

/// Growth pairs whose current period is in `sector` (all pairs when None)
fn growth_pairs(panel: &Panel, sector: Option<Sector>) -> Vec<Growth> {
    panel
        .trajectories
        .iter()
        .flat_map(|t| t.consecutive())
        .filter(|(_, cur)| sector.map_or(true, |s| cur.sector == s))
        .map(|(prev, cur)| Growth {
            income: cur.income.ln() - prev.income.ln(),
            consumption: cur.consumption.ln() - prev.consumption.ln(),
        })
        .collect()
}

/// Var(Delta ln C) for one sector, or pooled over both when `sector` is None
pub fn consumption_growth_variance(panel: &Panel, sector: Option<Sector>) -> Option<f64> {
    let growth: Vec<f64> = growth_pairs(panel, sector).iter().map(|g| g.consumption).collect();
    (growth.len() >= 2).then(|| sample_variance(&growth))
}

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

/// Unbiased sample variance
fn sample_variance(data: &[f64]) -> f64 {
    let m = mean(data);
    data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64
}

fn ols_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    let mx = mean(x);
    let my = mean(y);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        sxy += (xi - mx) * (yi - my);
        sxx += (xi - mx) * (xi - mx);
    }
    (sxx / x.len() as f64 > MIN_REGRESSOR_VARIANCE).then(|| sxy / sxx)
}
