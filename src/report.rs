//! Tabular exports: parameter table, moment fit, counterfactual tables

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::moments::MomentVector;
use crate::params::{Parameters, Sector, Theta};
use crate::solver::Solution;
use crate::targets::MomentId;

/// Write any serializable rows as CSV with a header
pub fn write_rows<T: Serialize, W: Write>(rows: &[T], wtr: W) -> ModelResult<()> {
    let mut wtr = csv::Writer::from_writer(wtr);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_rows_to_path<T: Serialize, P: AsRef<Path>>(rows: &[T], path: P) -> ModelResult<()> {
    write_rows(rows, File::create(path)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterSource {
    Calibrated,
    Estimated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRow {
    pub parameter: String,
    pub value: f64,
    pub bootstrap_se: Option<f64>,
    pub source: ParameterSource,
}

/// Every structural parameter, flagged as externally calibrated or estimated
pub fn parameter_table(params: &Parameters, std_errors: Option<&Theta>) -> Vec<ParameterRow> {
    let calibrated = |parameter: String, value: f64| ParameterRow {
        parameter,
        value,
        bootstrap_se: None,
        source: ParameterSource::Calibrated,
    };

    let mut rows = vec![
        calibrated("beta".to_string(), params.beta),
        calibrated("gamma".to_string(), params.gamma),
        calibrated("interest_rate".to_string(), params.interest_rate),
        calibrated("rho".to_string(), params.rho),
    ];
    for sector in Sector::ALL {
        let inc = params.income(sector);
        rows.push(calibrated(format!("wage_{}", sector.name()), inc.wage));
        rows.push(calibrated(format!("var_permanent_{}", sector.name()), inc.var_permanent));
        rows.push(calibrated(format!("var_transitory_{}", sector.name()), inc.var_transitory));
    }

    let estimated = params.theta().to_array();
    let se = std_errors.map(Theta::to_array);
    for (i, name) in Theta::NAMES.iter().enumerate() {
        rows.push(ParameterRow {
            parameter: name.to_string(),
            value: estimated[i],
            bootstrap_se: se.map(|s| s[i]),
            source: ParameterSource::Estimated,
        });
    }
    rows
}

/// Read a parameter table written by [`parameter_table`]
pub fn read_parameter_rows<R: Read>(rdr: R) -> ModelResult<Vec<ParameterRow>> {
    let mut reader = csv::Reader::from_reader(rdr);
    let rows = reader.deserialize().collect::<Result<Vec<ParameterRow>, _>>()?;
    Ok(rows)
}

pub fn read_parameter_rows_from_path<P: AsRef<Path>>(path: P) -> ModelResult<Vec<ParameterRow>> {
    read_parameter_rows(File::open(path)?)
}

/// `base` with the value of every row substituted, e.g. an estimate's parameters.csv
pub fn apply_parameter_rows(base: &Parameters, rows: &[ParameterRow]) -> ModelResult<Parameters> {
    let mut params = base.clone();
    for row in rows {
        let slot = parameter_slot(&mut params, &row.parameter)
            .ok_or_else(|| ModelError::config(format!("unknown parameter '{}'", row.parameter)))?;
        *slot = row.value;
    }
    params.validate()?;
    Ok(params)
}

fn parameter_slot<'p>(params: &'p mut Parameters, name: &str) -> Option<&'p mut f64> {
    let slot = match name {
        "beta" => &mut params.beta,
        "gamma" => &mut params.gamma,
        "interest_rate" => &mut params.interest_rate,
        "rho" => &mut params.rho,
        "b_formal" => &mut params.b_formal,
        "b_informal" => &mut params.b_informal,
        "kappa" => &mut params.kappa,
        "sigma_pref" => &mut params.sigma_pref,
        _ => {
            let (field, sector) = name.rsplit_once('_')?;
            let inc = params.income_mut(Sector::parse(sector)?);
            match field {
                "wage" => &mut inc.wage,
                "var_permanent" => &mut inc.var_permanent,
                "var_transitory" => &mut inc.var_transitory,
                _ => return None,
            }
        }
    };
    Some(slot)
}

/// Optimal policy at one reachable grid point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyRow {
    pub age: usize,
    pub assets: f64,
    pub log_productivity: f64,
    pub sector: &'static str,
    pub value: f64,
    pub next_sector: &'static str,
    pub informal_prob: f64,
    pub savings: Option<f64>,
    pub consumption: Option<f64>,
}

/// Flatten a solution into rows, skipping states below their own borrowing limit
pub fn policy_table(solution: &Solution) -> Vec<PolicyRow> {
    let grid = &solution.grid;
    let mut rows = Vec::with_capacity(solution.periods() * grid.n_states());
    for age_solution in &solution.ages {
        for (idx, policy) in age_solution.states.iter().enumerate() {
            if !policy.is_feasible() {
                continue;
            }
            let point = grid.point(idx);
            rows.push(PolicyRow {
                age: age_solution.age,
                assets: grid.assets.get(point.asset_idx),
                log_productivity: grid.productivity.get(point.productivity_idx),
                sector: point.sector.name(),
                value: policy.value,
                next_sector: policy.sector.name(),
                informal_prob: policy.informal_prob,
                savings: policy.savings(),
                consumption: policy.consumption(),
            });
        }
    }
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MomentRow {
    pub moment: MomentId,
    pub value: Option<f64>,
    pub missing_reason: Option<String>,
}

pub fn moment_table(moments: &MomentVector) -> Vec<MomentRow> {
    moments
        .iter()
        .map(|(moment, value)| match value {
            Ok(v) => MomentRow { moment, value: Some(*v), missing_reason: None },
            Err(e) => MomentRow { moment, value: None, missing_reason: Some(e.reason.clone()) },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_table_flags_sources() {
        let params = Parameters::default();
        let rows = parameter_table(&params, None);
        assert_eq!(rows.len(), 4 + 6 + Theta::DIM);
        assert_eq!(rows.iter().filter(|r| r.source == ParameterSource::Estimated).count(), Theta::DIM);
        let kappa = rows.iter().find(|r| r.parameter == "kappa").unwrap();
        assert_eq!(kappa.value, params.kappa);
        assert!(rows.iter().all(|r| r.bootstrap_se.is_none()));
    }

    #[test]
    fn test_parameter_table_carries_std_errors() {
        let params = Parameters::default();
        let se = Theta { b_formal: 0.01, b_informal: 0.02, kappa: 0.03, sigma_pref: 0.04 };
        let rows = parameter_table(&params, Some(&se));
        let b_informal = rows.iter().find(|r| r.parameter == "b_informal").unwrap();
        assert_eq!(b_informal.bootstrap_se, Some(0.02));
        let beta = rows.iter().find(|r| r.parameter == "beta").unwrap();
        assert_eq!(beta.bootstrap_se, None);
    }

    #[test]
    fn test_policy_table_covers_reachable_states() {
        use crate::params::{GridConfig, SectorSet};
        use crate::solver::Model;

        let config = GridConfig {
            n_assets: 6,
            a_max: 3.0,
            curvature: 1.5,
            n_productivity: 3,
            n_std: 2.0,
            periods: 2,
            sectors: SectorSet::Both,
        };
        let model = Model::build(Parameters::default(), &config).unwrap();
        let solution = model.solve().unwrap();
        let rows = policy_table(&solution);

        // Every formal state is reachable; informal ones below -b_informal may not be
        let per_sector = model.grid.n_productivity() * model.grid.n_assets();
        let formal = rows.iter().filter(|r| r.sector == "formal").count();
        assert_eq!(formal, solution.periods() * per_sector);
        assert!(rows.len() <= solution.periods() * model.grid.n_states());
        assert!(rows.iter().all(|r| r.value.is_finite() && r.consumption.unwrap() > 0.0));
    }

    #[test]
    fn test_parameter_table_reads_back() {
        let mut estimated = Parameters::default();
        estimated.b_formal = 0.3127;
        estimated.kappa = 0.0815;
        estimated.informal.var_transitory = 0.041;
        let mut buf = Vec::new();
        write_rows(&parameter_table(&estimated, None), &mut buf).unwrap();

        let rows = read_parameter_rows(buf.as_slice()).unwrap();
        assert_eq!(rows.len(), 4 + 6 + Theta::DIM);
        let params = apply_parameter_rows(&Parameters::default(), &rows).unwrap();
        assert_eq!(params, estimated);
    }

    #[test]
    fn test_apply_parameter_rows_rejects_unknown_names() {
        let row = |parameter: &str| ParameterRow {
            parameter: parameter.to_string(),
            value: 0.2,
            bootstrap_se: None,
            source: ParameterSource::Estimated,
        };
        let base = Parameters::default();
        assert!(apply_parameter_rows(&base, &[row("delta")]).is_err());
        assert!(apply_parameter_rows(&base, &[row("wage_public")]).is_err());
        assert_eq!(apply_parameter_rows(&base, &[row("kappa")]).unwrap().kappa, 0.2);
    }

    #[test]
    fn test_write_rows_csv() {
        let rows = parameter_table(&Parameters::default(), None);
        let mut buf = Vec::new();
        write_rows(&rows[..1], &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("parameter,value,bootstrap_se,source"));
        assert_eq!(lines.next(), Some("beta,0.95,,calibrated"));
    }
}
