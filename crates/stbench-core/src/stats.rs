//! Summary statistics and the matching matrix printed in results logs.

use std::fmt;

/// Percentile reported as the tail of a distribution.
pub const TAIL_PERCENTILE: usize = 99;

/// Distribution summary of a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub name: String,
    pub units: String,
    pub n: usize,
    pub median: f64,
    pub mean: f64,
    /// Sample standard deviation; needs two values.
    pub stdev: Option<f64>,
    /// [`TAIL_PERCENTILE`]th percentile; needs two values.
    pub tail: Option<f64>,
    pub max: f64,
}

impl Summary {
    /// `None` for an empty sample.
    pub fn new(name: &str, values: impl IntoIterator<Item = f64>, units: &str) -> Option<Self> {
        let mut values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);

        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            values[n / 2]
        } else {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        };
        let stdev = (n > 1).then(|| {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        });

        Some(Self {
            name: name.to_string(),
            units: units.to_string(),
            n,
            median,
            mean,
            stdev,
            tail: percentile(&values, TAIL_PERCENTILE),
            max: values[n - 1],
        })
    }
}

/// The `p`th of 100 cut points of sorted `values`, using the exclusive
/// method (the sample is treated as drawn from a larger population).
pub fn percentile(sorted: &[f64], p: usize) -> Option<f64> {
    const N: usize = 100;
    let len = sorted.len();
    if len < 2 || p == 0 || p >= N {
        return None;
    }
    let m = len + 1;
    let j = (p * m / N).clamp(1, len - 1);
    let delta = (p * m) as f64 - (j * N) as f64;
    Some((sorted[j - 1] * (N as f64 - delta) + sorted[j] * delta) / N as f64)
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let u = &self.units;
        writeln!(f, "{}", self.name)?;
        writeln!(f, "- n =\t{}", self.n)?;
        writeln!(f, "- med\t{} {u}", self.median)?;
        match self.stdev {
            Some(sd) => writeln!(f, "- mean\t{:.2}±{sd:.2} {u}", self.mean)?,
            None => writeln!(f, "- mean\t{:.2} {u}", self.mean)?,
        }
        match self.tail {
            Some(t) => writeln!(f, "- {TAIL_PERCENTILE}pi\t{t:.2} {u}")?,
            None => writeln!(f, "- {TAIL_PERCENTILE}pi\tn/a")?,
        }
        write!(f, "- max\t{} {u}", self.max)
    }
}

/// Agreement between a left and a right tool over the same matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchingMatrix {
    pub lhs: String,
    pub rhs: String,
    /// Found by the left tool only.
    pub included: u64,
    pub both: u64,
    /// Found by the right tool only.
    pub excluded: u64,
}

impl MatchingMatrix {
    pub fn new(lhs: &str, included: u64, both: u64, excluded: u64, rhs: &str) -> Self {
        Self {
            lhs: lhs.to_string(),
            rhs: rhs.to_string(),
            included,
            both,
            excluded,
        }
    }

    pub fn left_total(&self) -> u64 {
        self.included + self.both
    }

    pub fn right_total(&self) -> u64 {
        self.both + self.excluded
    }

    pub fn overall(&self) -> u64 {
        self.included + self.both + self.excluded
    }

    pub fn included_pct(&self) -> f64 {
        pct(self.included, self.left_total())
    }

    pub fn excluded_pct(&self) -> f64 {
        pct(self.excluded, self.right_total())
    }
}

fn pct(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

impl fmt::Display for MatchingMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "matching matrix")?;
        writeln!(
            f,
            "- {}\t{} total, {} ({:.2}%) included",
            self.lhs,
            self.left_total(),
            self.included,
            self.included_pct()
        )?;
        writeln!(
            f,
            "- {}\t{} total, {} ({:.2}%) excluded",
            self.rhs,
            self.right_total(),
            self.excluded,
            self.excluded_pct()
        )?;
        write!(f, "- joint\t{} both, {} overall", self.both, self.overall())
    }
}
