//! Descriptive statistics and Pearson correlation with a two-tailed
//! Student-t significance.

const BETA_CF_MAX_ITERATIONS: usize = 300;
const BETA_CF_EPSILON: f64 = 3.0e-16;
const BETA_CF_TINY: f64 = 1.0e-300;

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFICIENTS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pearson {
    pub r: f64,
    pub p_value: f64,
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let sum_sq = values
        .iter()
        .map(|value| (value - mean) * (value - mean))
        .sum::<f64>();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Returns `None` when fewer than two pairs are given or either variable
/// is constant.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<Pearson> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    if is_constant(xs) || is_constant(ys) {
        return None;
    }

    let mean_x = mean(xs)?;
    let mean_y = mean(ys)?;

    let mut num = 0.0;
    let mut denom_x = 0.0;
    let mut denom_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        num += dx * dy;
        denom_x += dx * dx;
        denom_y += dy * dy;
    }

    if denom_x == 0.0 || denom_y == 0.0 {
        return None;
    }

    let r = (num / (denom_x * denom_y).sqrt()).clamp(-1.0, 1.0);
    Some(Pearson {
        r,
        p_value: pearson_p_value(r, n),
    })
}

// Exact comparison: the deviation sums of an inexact constant such as 0.1
// are tiny but non-zero.
fn is_constant(values: &[f64]) -> bool {
    values.iter().all(|value| *value == values[0])
}

/// Two-tailed p-value of `r` under the null of zero correlation, using
/// t = r * sqrt(df / (1 - r^2)) with df = n - 2.
pub fn pearson_p_value(r: f64, n: usize) -> f64 {
    if n <= 2 {
        return 1.0;
    }
    if r.abs() >= 1.0 {
        return 0.0;
    }

    let df = (n - 2) as f64;
    let t_sq = r * r * df / (1.0 - r * r);
    regularized_incomplete_beta(df / 2.0, 0.5, df / (df + t_sq)).clamp(0.0, 1.0)
}

pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut acc = LANCZOS_COEFFICIENTS[0];
    for (i, coefficient) in LANCZOS_COEFFICIENTS.iter().enumerate().skip(1) {
        acc += coefficient / (x + i as f64);
    }
    let t = x + LANCZOS_G + 0.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

/// I_x(a, b), evaluated with the continued fraction on whichever side
/// converges fastest.
pub fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front =
        ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();

    if x < (a + 1.0) / (a + b + 2.0) {
        ln_front.exp() * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - ln_front.exp() * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = guard_tiny(1.0 - qab * x / qap).recip();
    let mut h = d;

    for m in 1..=BETA_CF_MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let even = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = guard_tiny(1.0 + even * d).recip();
        c = guard_tiny(1.0 + even / c);
        h *= d * c;

        let odd = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = guard_tiny(1.0 + odd * d).recip();
        c = guard_tiny(1.0 + odd / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < BETA_CF_EPSILON {
            break;
        }
    }

    h
}

fn guard_tiny(value: f64) -> f64 {
    if value.abs() < BETA_CF_TINY {
        BETA_CF_TINY
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(actual: f64, expected: f64, tolerance: f64) -> bool {
        (actual - expected).abs() <= tolerance
    }

    #[test]
    fn mean_and_sample_std_dev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&values), Some(5.0));
        assert!(close(sample_std_dev(&values).unwrap(), 2.138_089_935, 1e-9));
        assert_eq!(mean(&[]), None);
        assert_eq!(sample_std_dev(&[3.0]), None);
    }

    #[test]
    fn pearson_rejects_constants_that_are_inexact_in_binary() {
        assert!(pearson(&[0.1, 0.1, 0.1], &[1.0, 2.0, 4.0]).is_none());
        assert!(pearson(&[1.0, 2.0, 4.0], &[0.7, 0.7, 0.7, 0.7]).is_none());
        assert!(pearson(&[0.1, 0.1, 0.2], &[1.0, 2.0, 4.0]).is_some());
    }

    #[test]
    fn ln_gamma_matches_factorials() {
        assert!(close(ln_gamma(1.0), 0.0, 1e-12));
        assert!(close(ln_gamma(5.0), 24.0_f64.ln(), 1e-12));
        assert!(close(ln_gamma(0.5), std::f64::consts::PI.sqrt().ln(), 1e-12));
    }

    #[test]
    fn incomplete_beta_edges_and_symmetry() {
        assert_eq!(regularized_incomplete_beta(2.0, 3.0, 0.0), 0.0);
        assert_eq!(regularized_incomplete_beta(2.0, 3.0, 1.0), 1.0);
        // I_x(1, 1) is the uniform CDF.
        assert!(close(regularized_incomplete_beta(1.0, 1.0, 0.3), 0.3, 1e-12));
        let left = regularized_incomplete_beta(2.5, 1.5, 0.4);
        let right = regularized_incomplete_beta(1.5, 2.5, 0.6);
        assert!(close(left + right, 1.0, 1e-12));
    }

    #[test]
    fn pearson_perfect_and_inverse() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let up = pearson(&xs, &[2.0, 4.0, 6.0, 8.0]).unwrap();
        assert!(close(up.r, 1.0, 1e-12));
        assert!(up.p_value < 1e-12);

        let down = pearson(&xs, &[4.0, 3.0, 2.0, 1.0]).unwrap();
        assert!(close(down.r, -1.0, 1e-12));
    }

    #[test]
    fn pearson_p_value_matches_reference_values() {
        let result = pearson(&[1.0, 2.0, 3.0, 4.0, 5.0], &[2.0, 1.0, 4.0, 3.0, 5.0]).unwrap();
        assert!(close(result.r, 0.8, 1e-12));
        assert!(close(result.p_value, 0.104_088, 1e-5));

        assert!(close(pearson_p_value(0.5, 10), 0.141_113, 1e-5));
        assert!(close(pearson_p_value(0.0, 10), 1.0, 1e-12));
        assert!(close(pearson_p_value(-0.5, 10), pearson_p_value(0.5, 10), 1e-15));
    }

    #[test]
    fn pearson_with_two_points_has_unit_p_value() {
        let result = pearson(&[1.0, 2.0], &[5.0, 3.0]).unwrap();
        assert!(close(result.r, -1.0, 1e-12));
        assert_eq!(result.p_value, 1.0);
    }

    #[test]
    fn pearson_rejects_degenerate_input() {
        assert_eq!(pearson(&[1.0], &[2.0]), None);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);
        assert_eq!(pearson(&[1.0, 2.0, 3.0], &[4.0, 4.0, 4.0]), None);
    }
}
