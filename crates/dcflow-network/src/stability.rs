//! Network-wide stability accounting.
//!
//! Every node declares pending work by invalidating and clears it by
//! validating; the network is stable exactly when no invalidation is
//! outstanding. Read-only consistency regions (snapshots, counter
//! advancement) run under [`StabilityValidator::check_is_stable_while`],
//! during which any invalidation is a fatal misuse.

use std::cell::RefCell;
use std::rc::Rc;

#[derive(Default)]
struct ValidatorState {
    invalid: usize,
    should_be_stable: usize,
}

/// Shared stability accounting for one network.
#[derive(Clone, Default)]
pub struct StabilityValidator {
    state: Rc<RefCell<ValidatorState>>,
}

impl StabilityValidator {
    /// Creates a validator with no outstanding invalidations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the per-node invalidation handle.
    pub(crate) fn invalidator(&self) -> Invalidator {
        Invalidator {
            state: self.state.clone(),
            valid: true,
        }
    }

    /// Whether no invalidation is outstanding.
    pub fn is_stable(&self) -> bool {
        self.state.borrow().invalid == 0
    }

    /// Number of outstanding invalidations.
    pub fn invalid_count(&self) -> usize {
        self.state.borrow().invalid
    }

    /// Runs `block` inside a must-be-stable region.
    ///
    /// Panics if the network is not stable on entry, and any `invalidate`
    /// issued while `block` runs panics as well. Not unwind-safe: a panic
    /// inside `block` leaves the region marked, which is fine because such a
    /// panic fails the run.
    pub fn check_is_stable_while<R>(&self, block: impl FnOnce() -> R) -> R {
        {
            let mut state = self.state.borrow_mut();
            assert!(
                state.invalid == 0,
                "must-be-stable region entered with {} outstanding invalidations",
                state.invalid
            );
            state.should_be_stable += 1;
        }
        let result = block();
        self.state.borrow_mut().should_be_stable -= 1;
        result
    }

    /// Discards all in-flight invalidations. Only used when tearing down
    /// and rebuilding; the owning network must also reset its node handles.
    pub(crate) fn reset(&self) {
        let mut state = self.state.borrow_mut();
        state.invalid = 0;
        state.should_be_stable = 0;
    }
}

/// Per-node handle onto the validator.
///
/// Tracks whether the node currently holds an invalidation, so repeated
/// signals coalesce into a single outstanding count.
pub struct Invalidator {
    state: Rc<RefCell<ValidatorState>>,
    valid: bool,
}

impl Invalidator {
    /// Declares pending work. No-op when already invalid. Fatal inside a
    /// must-be-stable region.
    pub(crate) fn invalidate(&mut self) {
        if !self.valid {
            return;
        }
        let mut state = self.state.borrow_mut();
        assert!(
            state.should_be_stable == 0,
            "illegal invalidate inside a must-be-stable region"
        );
        state.invalid += 1;
        self.valid = false;
    }

    /// Declares the pending work drained. No-op when already valid.
    pub(crate) fn validate(&mut self) {
        if self.valid {
            return;
        }
        self.state.borrow_mut().invalid -= 1;
        self.valid = true;
    }

    /// Whether this node currently holds no invalidation.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn reset(&mut self) {
        self.valid = true;
    }
}
