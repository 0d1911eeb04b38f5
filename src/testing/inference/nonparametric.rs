use super::GeneTest;
use crate::data::ValueScale;
use crate::error::BackendError;
use crate::testing::effect::avg_log2_fold_change;
use crate::testing::{Alternative, TestResult};
use statrs::distribution::{ContinuousCDF, Normal};
use std::cmp::Ordering;

/// Exact p-values are used below this many samples per group when there are
/// no ties.
const EXACT_LIMIT: usize = 50;

/// Wilcoxon rank-sum backend.
///
/// The null distribution of U for the group sizes of a run is tabulated once
/// and shared by all genes; genes with tied values fall back to the normal
/// approximation with tie and continuity correction.
pub struct RankSumTest {
    scale: ValueScale,
    exact: Option<ExactRankSum>,
}

impl RankSumTest {
    pub fn new(n1: usize, n2: usize, scale: ValueScale) -> Self {
        let exact = (n1 < EXACT_LIMIT && n2 < EXACT_LIMIT).then(|| ExactRankSum::new(n1, n2));
        RankSumTest { scale, exact }
    }
}

impl GeneTest for RankSumTest {
    fn name(&self) -> &'static str {
        "wilcox"
    }

    fn test(&self, group1: &[f64], group2: &[f64]) -> Result<TestResult<f64>, BackendError> {
        let result = rank_sum(group1, group2, Alternative::TwoSided, self.exact.as_ref())?;
        Ok(result.effect(avg_log2_fold_change(group1, group2, self.scale)))
    }
}

/// Mann-Whitney U test of `x` against `y` using the normal approximation.
///
/// Ties receive average ranks and the variance is tie-corrected. When every
/// value is identical the test carries no information and `p = 1`.
pub fn mann_whitney(x: &[f64], y: &[f64], alternative: Alternative) -> Result<TestResult<f64>, BackendError> {
    rank_sum(x, y, alternative, None)
}

fn rank_sum(
    x: &[f64],
    y: &[f64],
    alternative: Alternative,
    exact: Option<&ExactRankSum>,
) -> Result<TestResult<f64>, BackendError> {
    let nx = x.len();
    let ny = y.len();
    if nx == 0 || ny == 0 {
        return Err(BackendError::Untestable {
            reason: "rank-sum test needs values in both groups".to_string(),
        });
    }
    if x.iter().chain(y).any(|v| v.is_nan()) {
        return Err(BackendError::Numerical {
            reason: "NaN expression value".to_string(),
        });
    }

    let ranks = average_ranks(x, y);
    let rank_sum_x: f64 = ranks.ranks[..nx].iter().sum();
    let u_x = rank_sum_x - (nx * (nx + 1)) as f64 / 2.0;

    let n = (nx + ny) as f64;
    let mean_u = (nx * ny) as f64 / 2.0;
    let tie_term = ranks.tie_term / (n * (n - 1.0));
    let var_u = (nx * ny) as f64 / 12.0 * ((n + 1.0) - tie_term);

    if var_u <= 0.0 {
        return Ok(TestResult::new(u_x, 1.0)
            .with_metadata("z_score", 0.0)
            .with_metadata("var_u", 0.0));
    }

    if let Some(table) = exact.filter(|t| ranks.tie_term == 0.0 && t.matches(nx, ny)) {
        let p_value = table.p_value(u_x, alternative);
        return Ok(TestResult::new(u_x, p_value).with_metadata("exact", 1.0));
    }

    let diff = u_x - mean_u;
    let correction = match alternative {
        // f64::signum(0.0) is 1.0; no shift gets no correction.
        Alternative::TwoSided if diff == 0.0 => 0.0,
        Alternative::TwoSided => 0.5 * diff.signum(),
        Alternative::Greater => 0.5,
        Alternative::Less => -0.5,
    };
    let z = (diff - correction) / var_u.sqrt();

    let normal = Normal::new(0.0, 1.0).map_err(|e| BackendError::Numerical {
        reason: e.to_string(),
    })?;
    let p_value = match alternative {
        Alternative::TwoSided => 2.0 * normal.cdf(z).min(normal.sf(z)),
        Alternative::Greater => normal.sf(z),
        Alternative::Less => normal.cdf(z),
    };

    Ok(TestResult::new(u_x, p_value.min(1.0))
        .with_standard_error(var_u.sqrt())
        .with_metadata("z_score", z)
        .with_metadata("mean_u", mean_u)
        .with_metadata("var_u", var_u))
}

struct Ranks {
    /// Average ranks, `x` values first then `y`.
    ranks: Vec<f64>,
    /// `sum(t^3 - t)` over tie groups.
    tie_term: f64,
}

fn average_ranks(x: &[f64], y: &[f64]) -> Ranks {
    let combined: Vec<f64> = x.iter().chain(y).copied().collect();
    let mut order: Vec<usize> = (0..combined.len()).collect();
    order.sort_by(|&a, &b| combined[a].partial_cmp(&combined[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; combined.len()];
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < order.len() {
        let value = combined[order[i]];
        let mut j = i + 1;
        while j < order.len() && combined[order[j]] == value {
            j += 1;
        }
        // Average of the 1-based ranks i+1..=j
        let rank = (i + j + 1) as f64 / 2.0;
        for &k in &order[i..j] {
            ranks[k] = rank;
        }
        let t = (j - i) as f64;
        tie_term += t * t * t - t;
        i = j;
    }
    Ranks { ranks, tie_term }
}

/// Exact null distribution of U for fixed group sizes without ties.
struct ExactRankSum {
    n1: usize,
    n2: usize,
    /// `cumulative[u]` = P(U <= u)
    cumulative: Vec<f64>,
}

impl ExactRankSum {
    fn new(n1: usize, n2: usize) -> Self {
        let max_u = n1 * n2;
        // ways[k][u]: subsets of size k from the items seen so far whose
        // U contribution is u. Item i (0-based) placed in group 1 adds
        // (number of group-2 items before it) = i - (k - 1).
        let mut ways = vec![vec![0.0f64; max_u + 1]; n1 + 1];
        ways[0][0] = 1.0;
        for item in 0..(n1 + n2) {
            let top = n1.min(item + 1);
            for k in (1..=top).rev() {
                let below = item + 1 - k;
                if below > n2 {
                    continue;
                }
                for u in (below..=max_u).rev() {
                    let add = ways[k - 1][u - below];
                    ways[k][u] += add;
                }
            }
        }
        let counts = &ways[n1];
        let total: f64 = counts.iter().sum();
        let mut cumulative = Vec::with_capacity(max_u + 1);
        let mut acc = 0.0;
        for c in counts {
            acc += c / total;
            cumulative.push(acc.min(1.0));
        }
        ExactRankSum { n1, n2, cumulative }
    }

    fn matches(&self, n1: usize, n2: usize) -> bool {
        self.n1 == n1 && self.n2 == n2
    }

    fn lower(&self, u: f64) -> f64 {
        if u < 0.0 {
            return 0.0;
        }
        let idx = (u.floor() as usize).min(self.cumulative.len() - 1);
        self.cumulative[idx]
    }

    fn upper(&self, u: f64) -> f64 {
        // P(U >= u) = 1 - P(U <= u - 1)
        (1.0 - self.lower(u - 1.0)).max(0.0)
    }

    fn p_value(&self, u: f64, alternative: Alternative) -> f64 {
        match alternative {
            Alternative::Greater => self.upper(u),
            Alternative::Less => self.lower(u),
            Alternative::TwoSided => {
                let half = (self.n1 * self.n2) as f64 / 2.0;
                let p = if u > half { self.upper(u) } else { self.lower(u) };
                (2.0 * p).min(1.0)
            }
        }
    }
}
