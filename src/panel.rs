//! Person-period panels
//!
//! The simulator and the empirical loader both produce a `Panel`, so the
//! moment calculator sees one data shape regardless of origin.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::params::Sector;

/// One person-period
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Age or survey wave; consecutive periods differ by one
    pub period: usize,
    /// Sector worked in this period
    pub sector: Sector,
    pub income: f64,
    pub consumption: f64,
    /// Beginning-of-period assets, when observed
    pub assets: Option<f64>,
    /// Direct credit-access indicator, when observed
    pub has_credit: Option<bool>,
    /// Only known for simulated agents
    pub log_productivity: Option<f64>,
}

/// All periods for one person, ordered by period
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub person_id: u64,
    pub observations: Vec<Observation>,
}

impl Trajectory {
    /// Pairs (t-1, t) of observations with adjacent periods
    pub fn consecutive(&self) -> impl Iterator<Item = (&Observation, &Observation)> {
        self.observations
            .windows(2)
            .filter(|w| w[1].period == w[0].period + 1)
            .map(|w| (&w[0], &w[1]))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Panel {
    pub trajectories: Vec<Trajectory>,
}

/// Raw CSV row, one per person-period
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    person_id: u64,
    period: usize,
    sector: String,
    income: f64,
    consumption: f64,
    assets: Option<f64>,
    has_credit: Option<u8>,
}

impl CsvRow {
    fn to_observation(&self) -> ModelResult<Observation> {
        let sector = Sector::parse(&self.sector).ok_or_else(|| {
            ModelError::schema(format!("person {}: unknown sector {:?}", self.person_id, self.sector))
        })?;
        if !(self.income > 0.0 && self.consumption > 0.0) {
            return Err(ModelError::schema(format!(
                "person {} period {}: income and consumption must be positive",
                self.person_id, self.period
            )));
        }
        let has_credit = match self.has_credit {
            None => None,
            Some(0) => Some(false),
            Some(1) => Some(true),
            Some(other) => {
                return Err(ModelError::schema(format!(
                    "person {}: has_credit must be 0 or 1, got {}",
                    self.person_id, other
                )))
            }
        };
        Ok(Observation {
            period: self.period,
            sector,
            income: self.income,
            consumption: self.consumption,
            assets: self.assets,
            has_credit,
            log_productivity: None,
        })
    }
}

impl Panel {
    pub fn new(trajectories: Vec<Trajectory>) -> Self {
        Self { trajectories }
    }

    pub fn n_persons(&self) -> usize {
        self.trajectories.len()
    }

    pub fn n_observations(&self) -> usize {
        self.trajectories.iter().map(|t| t.observations.len()).sum()
    }

    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.trajectories.iter().flat_map(|t| t.observations.iter())
    }

    /// Draw persons with replacement; each draw keeps the whole trajectory
    pub fn resample<R: Rng + ?Sized>(&self, rng: &mut R) -> Panel {
        let n = self.trajectories.len();
        if n == 0 {
            return Panel::default();
        }
        let trajectories = (0..n)
            .map(|_| self.trajectories[rng.random_range(0..n)].clone())
            .collect();
        Panel { trajectories }
    }

    /// Load an empirical panel, one row per person-period
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> ModelResult<Self> {
        Self::from_csv(csv::Reader::from_path(path)?)
    }

    pub fn from_reader<R: Read>(rdr: R) -> ModelResult<Self> {
        Self::from_csv(csv::Reader::from_reader(rdr))
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> ModelResult<Self> {
        let mut persons: BTreeMap<u64, Vec<Observation>> = BTreeMap::new();
        for result in reader.deserialize() {
            let row: CsvRow = result?;
            let obs = row.to_observation()?;
            persons.entry(row.person_id).or_default().push(obs);
        }

        let mut trajectories = Vec::with_capacity(persons.len());
        for (person_id, mut observations) in persons {
            observations.sort_by_key(|o| o.period);
            if observations.windows(2).any(|w| w[0].period == w[1].period) {
                return Err(ModelError::schema(format!("person {} has duplicate periods", person_id)));
            }
            trajectories.push(Trajectory { person_id, observations });
        }
        Ok(Panel { trajectories })
    }

    /// Write in the same layout `from_reader` accepts
    pub fn write_csv<W: Write>(&self, wtr: W) -> ModelResult<()> {
        let mut writer = csv::Writer::from_writer(wtr);
        for traj in &self.trajectories {
            for obs in &traj.observations {
                writer.serialize(CsvRow {
                    person_id: traj.person_id,
                    period: obs.period,
                    sector: obs.sector.name().to_string(),
                    income: obs.income,
                    consumption: obs.consumption,
                    assets: obs.assets,
                    has_credit: obs.has_credit.map(u8::from),
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    const PANEL: &str = "person_id,period,sector,income,consumption,assets,has_credit
2,1,informal,0.8,0.7,,
1,2,formal,1.1,0.95,0.3,1
1,1,formal,1.0,0.9,0.2,0
2,3,formal,1.2,1.0,,
";

    #[test]
    fn test_load_groups_and_sorts() {
        let panel = Panel::from_reader(PANEL.as_bytes()).unwrap();
        assert_eq!(panel.n_persons(), 2);
        assert_eq!(panel.n_observations(), 4);

        let first = &panel.trajectories[0];
        assert_eq!(first.person_id, 1);
        assert_eq!(first.observations[0].period, 1);
        assert_eq!(first.observations[0].has_credit, Some(false));
        assert_eq!(first.observations[1].assets, Some(0.3));
    }

    #[test]
    fn test_consecutive_skips_gaps() {
        let panel = Panel::from_reader(PANEL.as_bytes()).unwrap();
        assert_eq!(panel.trajectories[0].consecutive().count(), 1);
        // Person 2 is observed in periods 1 and 3 only
        assert_eq!(panel.trajectories[1].consecutive().count(), 0);
    }

    #[test]
    fn test_rejects_unknown_sector() {
        let csv = PANEL.replace("informal", "public");
        assert!(matches!(Panel::from_reader(csv.as_bytes()), Err(ModelError::Schema(_))));
    }

    #[test]
    fn test_rejects_duplicate_periods() {
        let csv = format!("{}1,1,formal,1.0,0.9,,\n", PANEL);
        assert!(Panel::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_csv_write_then_load() {
        let panel = Panel::from_reader(PANEL.as_bytes()).unwrap();
        let mut buf = Vec::new();
        panel.write_csv(&mut buf).unwrap();
        let reloaded = Panel::from_reader(buf.as_slice()).unwrap();
        assert_eq!(reloaded, panel);
    }

    #[test]
    fn test_resample_keeps_size_and_whole_trajectories() {
        let panel = Panel::from_reader(PANEL.as_bytes()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let draw = panel.resample(&mut rng);
        assert_eq!(draw.n_persons(), panel.n_persons());
        for traj in &draw.trajectories {
            assert!(panel.trajectories.contains(traj));
        }
    }
}
