//! CRRA period utility

/// Treat gamma this close to one as log utility
const LOG_UTILITY_TOL: f64 = 1e-10;

/// `u(c) = c^(1 - gamma) / (1 - gamma)`, or `ln(c)` when gamma = 1.
///
/// Non-positive consumption returns negative infinity, which callers treat as infeasible.
pub fn crra(consumption: f64, gamma: f64) -> f64 {
    if !(consumption > 0.0) {
        return f64::NEG_INFINITY;
    }
    if (gamma - 1.0).abs() < LOG_UTILITY_TOL {
        consumption.ln()
    } else {
        consumption.powf(1.0 - gamma) / (1.0 - gamma)
    }
}

/// Log-sum-exp expected maximum over choice-specific values with
/// extreme-value taste shocks of scale `sigma`, and the implied choice
/// probabilities. Entries equal to negative infinity get probability zero.
///
/// `sigma = 0` degenerates to a hard maximum with ties resolved in favour of
/// the earliest entry.
pub fn smoothed_max(values: &[f64], sigma: f64, probs: &mut [f64]) -> f64 {
    let (best_idx, best) = values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) });

    probs.iter_mut().for_each(|p| *p = 0.0);
    if best == f64::NEG_INFINITY {
        return best;
    }
    if sigma <= 0.0 {
        probs[best_idx] = 1.0;
        return best;
    }

    let mut total = 0.0;
    for (p, &v) in probs.iter_mut().zip(values) {
        *p = if v == f64::NEG_INFINITY { 0.0 } else { ((v - best) / sigma).exp() };
        total += *p;
    }
    probs.iter_mut().for_each(|p| *p /= total);
    best + sigma * total.ln()
}
