//! Decaying character budget shared across several sessions.
//!
//! Sessions are visited newest first. Each gets `remaining * decay` (or all
//! of `remaining` once that drops to the floor), but only what it actually
//! used is charged, so an under-filled allocation carries forward to older
//! sessions.

use crate::transcript::Extract;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    pub total: usize,
    pub min_session: usize,
    pub decay: f64,
}

impl Budget {
    /// `decay` is clamped into `(0, 1]`; a non-finite or non-positive value
    /// falls back to 1 (each session may take everything that is left).
    pub fn new(total: usize, min_session: usize, decay: f64) -> Self {
        let decay = if decay.is_finite() && decay > 0.0 {
            decay.min(1.0)
        } else {
            1.0
        };
        Self {
            total,
            min_session,
            decay,
        }
    }

    /// Allowance for the next session given what is left.
    pub fn limit_for(&self, remaining: usize) -> usize {
        if remaining <= self.min_session {
            remaining
        } else {
            (remaining as f64 * self.decay).floor() as usize
        }
    }
}

/// What one session received and consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation<T> {
    pub session: T,
    pub extract: Extract,
    pub limit: usize,
    pub remaining_after: usize,
}

impl<T> Allocation<T> {
    pub fn used(&self) -> usize {
        self.extract.used()
    }
}

/// Run `extract` over `sessions` (given oldest first) newest first under
/// `budget`, skipping `current`. Stops once the budget is spent. The
/// allocations come back oldest first.
pub fn allocate<T, F>(
    sessions: Vec<T>,
    current: Option<&str>,
    id_of: impl Fn(&T) -> &str,
    budget: &Budget,
    mut extract: F,
) -> Vec<Allocation<T>>
where
    F: FnMut(&T, usize) -> Extract,
{
    let mut remaining = budget.total;
    let mut results = Vec::new();

    for session in sessions.into_iter().rev() {
        if current.is_some_and(|c| !c.is_empty() && id_of(&session) == c) {
            continue;
        }
        if remaining == 0 {
            break;
        }
        let limit = budget.limit_for(remaining);
        let result = extract(&session, limit);
        remaining = remaining.saturating_sub(result.used());
        tracing::debug!(
            session = id_of(&session),
            limit,
            used = result.used(),
            remaining,
            "allocated session budget"
        );
        results.push(Allocation {
            session,
            extract: result,
            limit,
            remaining_after: remaining,
        });
    }

    results.reverse();
    results
}
