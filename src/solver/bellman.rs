//! Finite-horizon backward induction
//!
//! Ages are solved strictly in descending order. Within one age every grid
//! point is independent, so the point-wise maximization runs as a parallel
//! map over the grid that only reads the published age t+1 values.

use log::debug;
use rayon::prelude::*;

use super::solution::{AgeSolution, SectorChoice, Solution, StatePolicy};
use super::utility::{crra, smoothed_max};
use super::Model;
use crate::error::{ModelError, ModelResult};
use crate::params::Sector;

/// Slack when comparing assets against a borrowing limit
const LIMIT_TOL: f64 = 1e-10;

pub struct BellmanSolver<'a> {
    model: &'a Model,
}

impl<'a> BellmanSolver<'a> {
    pub fn new(model: &'a Model) -> Self {
        Self { model }
    }

    /// Run backward induction from T + 1 down to age 1
    pub fn solve(&self) -> ModelResult<Solution> {
        let grid = &self.model.grid;
        let terminal_values = self.terminal_values()?;

        let mut ages: Vec<Option<AgeSolution>> = vec![None; grid.periods];
        let mut next_values = terminal_values.clone();

        for age in grid.ages_backward() {
            let continuation = self.expected_continuation(&next_values);

            let states = (0..grid.n_states())
                .into_par_iter()
                .map(|idx| self.solve_point(age, idx, &continuation))
                .collect::<ModelResult<Vec<StatePolicy>>>()?;

            next_values = states.iter().map(|p| p.value).collect();
            debug!(
                "age {} solved: {} states, {} unreachable",
                age,
                states.len(),
                states.iter().filter(|p| !p.is_feasible()).count()
            );
            ages[age - 1] = Some(AgeSolution { age, states });
        }

        Ok(Solution {
            grid: grid.clone(),
            ages: ages.into_iter().flatten().collect(),
            terminal_values,
        })
    }

    /// V_{T+1}(a, z, s) = u((1 + r) a + y): consume everything, no continuation
    fn terminal_values(&self) -> ModelResult<Vec<f64>> {
        let grid = &self.model.grid;
        let params = &self.model.params;
        let terminal_age = grid.periods + 1;

        (0..grid.n_states())
            .map(|idx| {
                let p = grid.point(idx);
                let a = grid.assets.get(p.asset_idx);
                let z = grid.productivity.get(p.productivity_idx);
                let resources = (1.0 + params.interest_rate) * a + self.model.income.expected(z, p.sector);
                if resources > 0.0 {
                    Ok(crra(resources, params.gamma))
                } else if a < params.asset_floor(p.sector) - LIMIT_TOL {
                    Ok(f64::NEG_INFINITY)
                } else {
                    Err(ModelError::InfeasibleState {
                        age: terminal_age,
                        assets: a,
                        log_productivity: z,
                        sector: p.sector,
                    })
                }
            })
            .collect()
    }

    /// E[V_{t+1}(a_k, z', s') | z, s'] for every (a_k, z, s'), laid out like the state grid
    fn expected_continuation(&self, next_values: &[f64]) -> Vec<f64> {
        let grid = &self.model.grid;
        let n_a = grid.n_assets();
        let n_z = grid.n_productivity();
        let mut out = vec![0.0; grid.n_states()];

        for &sector in grid.sectors.sectors() {
            let pi = grid.productivity.transition(sector);
            for z in 0..n_z {
                let row = pi.row(z);
                for k in 0..n_a {
                    let mut ev = 0.0;
                    for (z_next, &prob) in row.iter().enumerate() {
                        // Skip zero-probability nodes so 0 * -inf never poisons the sum
                        if prob > 0.0 {
                            ev += prob * next_values[grid.index(k, z_next, sector)];
                        }
                    }
                    out[grid.index(k, z, sector)] = ev;
                }
            }
        }
        out
    }

    /// Two-level maximization at one grid point: over a' per sector, then over s'
    fn solve_point(&self, age: usize, idx: usize, continuation: &[f64]) -> ModelResult<StatePolicy> {
        let grid = &self.model.grid;
        let params = &self.model.params;
        let point = grid.point(idx);
        let a = grid.assets.get(point.asset_idx);
        let z = grid.productivity.get(point.productivity_idx);
        let gross = (1.0 + params.interest_rate) * a;

        let mut choices: [Option<SectorChoice>; 2] = [None, None];
        let mut values = [f64::NEG_INFINITY; 2];

        for &next in grid.sectors.sectors() {
            let income = self.model.income.expected(z, next);
            let switching_cost = params.switching_cost(point.sector, next);
            let cash = gross + income - switching_cost;

            let Some(first) = grid.assets.first_at_or_above(params.asset_floor(next)) else {
                continue;
            };

            let mut best: Option<SectorChoice> = None;
            for k in first..grid.n_assets() {
                let savings = grid.assets.get(k);
                let consumption = cash - savings;
                if consumption <= 0.0 {
                    // Grid is increasing, so every larger a' is infeasible too
                    break;
                }
                let ev = continuation[grid.index(k, point.productivity_idx, next)];
                if ev == f64::NEG_INFINITY {
                    continue;
                }
                let value = crra(consumption, params.gamma) + params.beta * ev;
                if best.map_or(true, |b| value > b.value) {
                    best = Some(SectorChoice {
                        value,
                        savings_idx: k,
                        savings,
                        consumption,
                        income,
                        switching_cost,
                    });
                }
            }

            if let Some(choice) = best {
                values[next.index()] = choice.value;
                choices[next.index()] = Some(choice);
            }
        }

        let mut probs = [0.0; 2];
        let value = smoothed_max(&values, params.sigma_pref, &mut probs);

        if value == f64::NEG_INFINITY {
            if a < params.asset_floor(point.sector) - LIMIT_TOL {
                return Ok(StatePolicy::unreachable());
            }
            return Err(ModelError::InfeasibleState {
                age,
                assets: a,
                log_productivity: z,
                sector: point.sector,
            });
        }

        let sector = if values[Sector::Informal.index()] > values[Sector::Formal.index()] {
            Sector::Informal
        } else {
            Sector::Formal
        };

        Ok(StatePolicy {
            value,
            sector,
            informal_prob: probs[Sector::Informal.index()],
            choices,
        })
    }
}
