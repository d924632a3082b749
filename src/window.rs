use std::ops::Range;

use crate::error::{Result, SldscError};

pub use crate::config::DEFAULT_WINDOW_CM;

/// Reference SNPs `left..end` within the cM window of one query SNP.
/// An empty window has `end == left`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub left: usize,
    pub end: usize,
}

impl Window {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.left)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.left..self.end.max(self.left)
    }

    /// Closed upper bound; `None` for an empty window.
    pub fn right(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.end - 1)
    }
}

/// Two-pointer sweep over ascending cM positions: for each query SNP, the
/// reference SNPs at distance at most `window_cm`.
pub fn window_bounds(query: &[f64], reference: &[f64], window_cm: f64) -> Result<Vec<Window>> {
    if !(window_cm >= 0.0) {
        return Err(SldscError::InvalidArgument(format!(
            "window must be a non-negative distance, got {window_cm}"
        )));
    }
    ensure_ascending(query, "query")?;
    ensure_ascending(reference, "reference")?;

    let mut out = Vec::with_capacity(query.len());
    let mut left = 0usize;
    let mut end = 0usize;
    for &pos in query {
        while end < reference.len() && reference[end] - pos <= window_cm {
            end += 1;
        }
        while left < reference.len() && pos - reference[left] > window_cm {
            left += 1;
        }
        out.push(Window {
            left,
            end: end.max(left),
        });
    }
    Ok(out)
}

fn ensure_ascending(values: &[f64], label: &str) -> Result<()> {
    if let Some(i) = values.windows(2).position(|w| !(w[0] <= w[1])) {
        return Err(SldscError::Precondition(format!(
            "{label} cM positions are not ascending at index {}",
            i + 1
        )));
    }
    Ok(())
}
