//! Dense least-squares solver shared by the linear regressor and the stacking
//! meta-model.

use super::{ModelError, ModelResult};

/// Ridge regression with an intercept, solved through the normal equations.
///
/// `x` is `n × p`, `y` is `n × k`. Returns a `(p + 1) × k` coefficient matrix
/// whose last row is the intercept. The intercept is not penalised.
pub fn ridge_fit(x: &[Vec<f64>], y: &[Vec<f64>], alpha: f64) -> ModelResult<Vec<Vec<f64>>> {
    if x.is_empty() || x.len() != y.len() {
        return Err(ModelError::InvalidInput(format!(
            "ridge needs matching non-empty inputs, got {} rows and {} targets",
            x.len(),
            y.len()
        )));
    }
    let p = x[0].len();
    let k = y[0].len();
    let dim = p + 1;

    // Normal equations: (AᵀA + αI) W = AᵀY with A = [x | 1].
    let mut ata = vec![vec![0.0; dim]; dim];
    let mut aty = vec![vec![0.0; k]; dim];
    for (row, target) in x.iter().zip(y) {
        if row.len() != p || target.len() != k {
            return Err(ModelError::InvalidInput("ragged ridge input".to_string()));
        }
        for i in 0..dim {
            let ai = if i < p { row[i] } else { 1.0 };
            for j in 0..dim {
                let aj = if j < p { row[j] } else { 1.0 };
                ata[i][j] += ai * aj;
            }
            for (c, t) in target.iter().enumerate() {
                aty[i][c] += ai * t;
            }
        }
    }
    for (i, row) in ata.iter_mut().enumerate().take(p) {
        row[i] += alpha.max(1e-9);
    }

    solve(ata, aty)
}

/// Apply coefficients from [`ridge_fit`] to one feature row.
pub fn ridge_apply(coefficients: &[Vec<f64>], row: &[f64]) -> Vec<f64> {
    let p = coefficients.len() - 1;
    let k = coefficients[p].len();
    (0..k)
        .map(|c| {
            row.iter()
                .zip(coefficients)
                .map(|(v, w)| v * w[c])
                .sum::<f64>()
                + coefficients[p][c]
        })
        .collect()
}

/// Gauss–Jordan elimination with partial pivoting for `A X = B`.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<Vec<f64>>) -> ModelResult<Vec<Vec<f64>>> {
    let n = a.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .ok_or(ModelError::Singular)?;
        if a[pivot][col].abs() < 1e-12 {
            return Err(ModelError::Singular);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        let diag = a[col][col];
        for v in a[col].iter_mut() {
            *v /= diag;
        }
        for v in b[col].iter_mut() {
            *v /= diag;
        }

        let pivot_a = a[col].clone();
        let pivot_b = b[col].clone();
        for r in 0..n {
            if r == col {
                continue;
            }
            let factor = a[r][col];
            if factor == 0.0 {
                continue;
            }
            for (v, p) in a[r].iter_mut().zip(&pivot_a) {
                *v -= factor * p;
            }
            for (v, p) in b[r].iter_mut().zip(&pivot_b) {
                *v -= factor * p;
            }
        }
    }
    Ok(b)
}
