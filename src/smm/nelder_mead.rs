//! Box-constrained Nelder-Mead simplex search
//!
//! Derivative-free, since the simulated objective is piecewise constant in
//! places because of the discrete grid. Trial points are projected onto the
//! box before evaluation.

use log::debug;

use super::budget::Budget;
use crate::error::{ConvergenceStatus, ModelResult};

// Standard coefficients
const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct NelderMeadOptions<const D: usize> {
    /// Converged when the objective spread across the simplex falls below this
    pub f_tolerance: f64,
    /// ... and every vertex lies within this distance of the best, per coordinate
    pub x_tolerance: [f64; D],
    /// Edge length of the initial simplex along each axis
    pub initial_step: [f64; D],
}

#[derive(Debug, Clone)]
pub struct NelderMeadResult<const D: usize> {
    pub x: [f64; D],
    pub f: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub status: ConvergenceStatus,
}

/// Minimize `f` over the box `[lower, upper]` starting from `x0`.
///
/// Errors from `f` abort the search. Budget exhaustion does not: the best
/// vertex found so far is returned tagged `NotConverged`.
pub fn minimize<const D: usize, F>(
    mut f: F,
    x0: [f64; D],
    lower: [f64; D],
    upper: [f64; D],
    options: &NelderMeadOptions<D>,
    budget: &Budget,
) -> ModelResult<NelderMeadResult<D>>
where
    F: FnMut(&[f64; D]) -> ModelResult<f64>,
{
    let project = |x: [f64; D]| -> [f64; D] { std::array::from_fn(|i| x[i].clamp(lower[i], upper[i])) };
    let mut evaluations = 0;
    let mut eval = |x: &[f64; D]| -> ModelResult<f64> {
        evaluations += 1;
        let v = f(x)?;
        Ok(if v.is_nan() { f64::INFINITY } else { v })
    };

    // Initial simplex: x0 plus one step along each axis, stepping inward at the upper bound
    let x0 = project(x0);
    let mut simplex: Vec<([f64; D], f64)> = Vec::with_capacity(D + 1);
    simplex.push((x0, eval(&x0)?));
    for i in 0..D {
        let mut x = x0;
        x[i] = if x0[i] + options.initial_step[i] <= upper[i] {
            x0[i] + options.initial_step[i]
        } else {
            x0[i] - options.initial_step[i]
        };
        let x = project(x);
        simplex.push((x, eval(&x)?));
    }

    let mut iterations = 0;
    let status = loop {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));

        if converged(&simplex, options) {
            break ConvergenceStatus::Converged;
        }
        if let Some(reason) = budget.check(iterations) {
            break ConvergenceStatus::NotConverged { reason };
        }
        iterations += 1;

        let (worst_x, worst_f) = simplex[D];
        let second_worst_f = simplex[D - 1].1;
        let best_f = simplex[0].1;

        let mut centroid = [0.0; D];
        for (x, _) in &simplex[..D] {
            for i in 0..D {
                centroid[i] += x[i] / D as f64;
            }
        }
        let along = |t: f64, from: &[f64; D]| -> [f64; D] {
            project(std::array::from_fn(|i| centroid[i] + t * (from[i] - centroid[i])))
        };

        let xr = along(-REFLECTION, &worst_x);
        let fr = eval(&xr)?;

        if fr < best_f {
            let xe = along(-REFLECTION * EXPANSION, &worst_x);
            let fe = eval(&xe)?;
            simplex[D] = if fe < fr { (xe, fe) } else { (xr, fr) };
        } else if fr < second_worst_f {
            simplex[D] = (xr, fr);
        } else {
            // Outside contraction toward the reflected point, inside toward the worst
            let (xc, bound) = if fr < worst_f {
                (along(-REFLECTION * CONTRACTION, &worst_x), fr)
            } else {
                (along(CONTRACTION, &worst_x), worst_f)
            };
            let fc = eval(&xc)?;
            if fc < bound {
                simplex[D] = (xc, fc);
            } else {
                let best_x = simplex[0].0;
                for vertex in simplex.iter_mut().skip(1) {
                    let x = project(std::array::from_fn(|i| best_x[i] + SHRINK * (vertex.0[i] - best_x[i])));
                    *vertex = (x, eval(&x)?);
                }
            }
        }
    };

    let (x, fx) = simplex[0];
    debug!("nelder-mead stopped after {} iterations, {} evaluations, f = {:.6e}", iterations, evaluations, fx);
    Ok(NelderMeadResult { x, f: fx, iterations, evaluations, status })
}

fn converged<const D: usize>(simplex: &[([f64; D], f64)], options: &NelderMeadOptions<D>) -> bool {
    let best = &simplex[0];
    let worst_f = simplex[simplex.len() - 1].1;
    if !best.1.is_finite() || !worst_f.is_finite() {
        return false;
    }
    let f_spread = worst_f - best.1;
    let x_spread_ok = simplex
        .iter()
        .all(|(x, _)| (0..D).all(|i| (x[i] - best.0[i]).abs() <= options.x_tolerance[i]));
    f_spread <= options.f_tolerance && x_spread_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StopReason;
    use crate::smm::budget::CancelToken;
    use approx::assert_abs_diff_eq;

    fn options() -> NelderMeadOptions<2> {
        NelderMeadOptions { f_tolerance: 1e-12, x_tolerance: [1e-6; 2], initial_step: [0.5; 2] }
    }

    fn budget(iters: usize) -> Budget {
        Budget::new(iters, None, CancelToken::new())
    }

    #[test]
    fn test_quadratic_bowl() {
        let f = |x: &[f64; 2]| Ok((x[0] - 1.0).powi(2) + 3.0 * (x[1] + 0.5).powi(2));
        let res = minimize(f, [0.0, 0.0], [-5.0, -5.0], [5.0, 5.0], &options(), &budget(500)).unwrap();
        assert!(res.status.is_converged());
        assert_abs_diff_eq!(res.x[0], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(res.x[1], -0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_rosenbrock() {
        let f = |x: &[f64; 2]| Ok(100.0 * (x[1] - x[0] * x[0]).powi(2) + (1.0 - x[0]).powi(2));
        let res = minimize(f, [-1.2, 1.0], [-3.0, -3.0], [3.0, 3.0], &options(), &budget(5000)).unwrap();
        assert_abs_diff_eq!(res.x[0], 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(res.x[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_minimum_outside_box_lands_on_boundary() {
        let f = |x: &[f64; 2]| Ok((x[0] - 4.0).powi(2) + x[1].powi(2));
        let res = minimize(f, [0.5, 0.5], [0.0, -1.0], [2.0, 1.0], &options(), &budget(500)).unwrap();
        assert_abs_diff_eq!(res.x[0], 2.0, epsilon = 1e-4);
        assert!(res.x[0] <= 2.0);
    }

    #[test]
    fn test_iteration_budget_returns_best_so_far() {
        let f = |x: &[f64; 2]| Ok((x[0] - 1.0).powi(2) + (x[1] - 1.0).powi(2));
        let res = minimize(f, [0.0, 0.0], [-5.0, -5.0], [5.0, 5.0], &options(), &budget(2)).unwrap();
        assert_eq!(res.status, ConvergenceStatus::NotConverged { reason: StopReason::MaxIterations });
        assert_eq!(res.iterations, 2);
        assert!(res.f < 2.0);
    }

    #[test]
    fn test_cancelled_before_first_iteration() {
        let token = CancelToken::new();
        token.cancel();
        let budget = Budget::new(100, None, token);
        let f = |x: &[f64; 2]| Ok(x[0] * x[0] + x[1] * x[1]);
        let res = minimize(f, [1.0, 1.0], [-5.0, -5.0], [5.0, 5.0], &options(), &budget).unwrap();
        assert_eq!(res.status, ConvergenceStatus::NotConverged { reason: StopReason::Cancelled });
        assert_eq!(res.evaluations, 3);
    }

    #[test]
    fn test_infinite_penalty_is_avoided() {
        // Region x0 >= x1 is forbidden
        let f = |x: &[f64; 2]| {
            if x[0] >= x[1] {
                Ok(f64::INFINITY)
            } else {
                Ok((x[0] - 1.0).powi(2) + (x[1] - 0.5).powi(2))
            }
        };
        let res = minimize(f, [0.0, 1.0], [-2.0, -2.0], [2.0, 2.0], &options(), &budget(2000)).unwrap();
        assert!(res.x[0] < res.x[1]);
        assert!(res.f.is_finite());
    }
}
