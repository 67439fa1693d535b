//! Calibration targets supplied by the empirical-moments provider
//!
//! Targets arrive as a CSV with one row per moment:
//!
//! ```text
//! schema_version,moment,estimate,std_error
//! 1,informality_rate,0.52,0.01
//! 1,wage_ratio,1.35,
//! ```
//!
//! The moment set is fixed. Required moments must be present; optional
//! ones may be omitted and are then left out of the objective. The file is
//! validated once, on load.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{ModelError, ModelResult};
use crate::params::Sector;

/// Version of the targets CSV layout this crate reads
pub const SCHEMA_VERSION: u32 = 1;

/// Identifier of one target moment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MomentId {
    /// Share of person-periods in the informal sector
    InformalityRate,
    /// Mean formal income over mean informal income
    WageRatio,
    /// OLS slope of consumption growth on income growth within a sector
    SmoothingBeta(Sector),
    /// Variance of consumption growth within a sector
    ConsumptionGrowthVar(Sector),
    /// Share of periods with assets above the sector borrowing limit
    CreditAccess(Sector),
    /// Probability of leaving the given sector between consecutive periods
    Transition(Sector),
}

impl MomentId {
    pub const ALL: [MomentId; 10] = [
        MomentId::InformalityRate,
        MomentId::WageRatio,
        MomentId::SmoothingBeta(Sector::Formal),
        MomentId::SmoothingBeta(Sector::Informal),
        MomentId::ConsumptionGrowthVar(Sector::Formal),
        MomentId::ConsumptionGrowthVar(Sector::Informal),
        MomentId::CreditAccess(Sector::Formal),
        MomentId::CreditAccess(Sector::Informal),
        MomentId::Transition(Sector::Formal),
        MomentId::Transition(Sector::Informal),
    ];

    /// Credit access and transition rates may be absent from a target file
    pub fn is_required(self) -> bool {
        !matches!(self, MomentId::CreditAccess(_) | MomentId::Transition(_))
    }

    pub fn name(self) -> String {
        match self {
            MomentId::InformalityRate => "informality_rate".to_string(),
            MomentId::WageRatio => "wage_ratio".to_string(),
            MomentId::SmoothingBeta(s) => format!("smoothing_beta_{}", s.name()),
            MomentId::ConsumptionGrowthVar(s) => format!("consumption_growth_var_{}", s.name()),
            MomentId::CreditAccess(s) => format!("credit_access_{}", s.name()),
            MomentId::Transition(Sector::Formal) => "transition_formal_to_informal".to_string(),
            MomentId::Transition(Sector::Informal) => "transition_informal_to_formal".to_string(),
        }
    }

    pub fn parse(s: &str) -> Option<MomentId> {
        let key = s.trim().to_ascii_lowercase();
        MomentId::ALL.into_iter().find(|id| id.name() == key)
    }
}

impl fmt::Display for MomentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Serialize for MomentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One named target with its point estimate and standard error
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationTarget {
    pub moment: MomentId,
    pub estimate: f64,
    /// None when the provider has no standard error
    pub std_error: Option<f64>,
}

impl CalibrationTarget {
    /// Diagonal weight: 1 / SE^2, or 1 when no SE is available
    pub fn weight(&self) -> f64 {
        match self.std_error {
            Some(se) => 1.0 / (se * se),
            None => 1.0,
        }
    }
}

/// Raw CSV row of the targets file
#[derive(Debug, Deserialize)]
struct CsvRow {
    schema_version: u32,
    moment: String,
    estimate: f64,
    std_error: Option<f64>,
}

/// Validated set of calibration targets, keyed by moment
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSet {
    targets: BTreeMap<MomentId, CalibrationTarget>,
}

impl TargetSet {
    /// Build from targets already in memory, validating as if loaded from a file
    pub fn new(targets: impl IntoIterator<Item = CalibrationTarget>) -> ModelResult<Self> {
        let mut map = BTreeMap::new();
        for target in targets {
            if !target.estimate.is_finite() {
                return Err(ModelError::schema(format!(
                    "target {} has a non-finite estimate",
                    target.moment
                )));
            }
            if let Some(se) = target.std_error {
                if !(se > 0.0 && se.is_finite()) {
                    return Err(ModelError::schema(format!(
                        "target {} has non-positive standard error {}",
                        target.moment, se
                    )));
                }
            }
            if map.insert(target.moment, target).is_some() {
                return Err(ModelError::schema(format!("duplicate target {}", target.moment)));
            }
        }

        let set = Self { targets: map };
        let missing: Vec<String> = MomentId::ALL
            .into_iter()
            .filter(|id| id.is_required() && !set.targets.contains_key(id))
            .map(|id| id.name())
            .collect();
        if !missing.is_empty() {
            return Err(ModelError::schema(format!(
                "required targets missing: {}",
                missing.join(", ")
            )));
        }
        Ok(set)
    }

    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> ModelResult<Self> {
        let reader = csv::Reader::from_path(path)?;
        Self::from_csv(reader)
    }

    pub fn from_reader<R: Read>(rdr: R) -> ModelResult<Self> {
        Self::from_csv(csv::Reader::from_reader(rdr))
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> ModelResult<Self> {
        let mut targets = Vec::new();
        for result in reader.deserialize() {
            let row: CsvRow = result?;
            if row.schema_version != SCHEMA_VERSION {
                return Err(ModelError::schema(format!(
                    "unsupported schema version {} (expected {})",
                    row.schema_version, SCHEMA_VERSION
                )));
            }
            let moment = MomentId::parse(&row.moment)
                .ok_or_else(|| ModelError::schema(format!("unknown moment: {}", row.moment)))?;
            targets.push(CalibrationTarget { moment, estimate: row.estimate, std_error: row.std_error });
        }
        Self::new(targets)
    }

    pub fn get(&self, moment: MomentId) -> Option<&CalibrationTarget> {
        self.targets.get(&moment)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalibrationTarget> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Same weights with new point estimates, as for a bootstrap draw.
    ///
    /// Moments absent from `estimates` are dropped for this draw.
    pub fn with_estimates(&self, estimates: &BTreeMap<MomentId, f64>) -> Self {
        let targets = self
            .targets
            .iter()
            .filter_map(|(&id, t)| {
                estimates.get(&id).map(|&estimate| (id, CalibrationTarget { estimate, ..*t }))
            })
            .collect();
        Self { targets }
    }

    /// Targets equal to a computed moment set, without standard errors
    pub fn from_estimates(estimates: &BTreeMap<MomentId, f64>) -> ModelResult<Self> {
        Self::new(estimates.iter().map(|(&moment, &estimate)| CalibrationTarget {
            moment,
            estimate,
            std_error: None,
        }))
    }
}
