//! Structural self-checks for the migration buffers.
//!
//! [`DebugInvariants::validate_invariants`] is always compiled and returns the
//! first violation it finds. [`DebugInvariants::debug_assert_invariants`]
//! panics on a violation, but only in builds with `debug_assertions` or one of
//! the `check-invariants` / `strict-invariants` features.

use crate::migrate_error::MigrateError;

pub trait DebugInvariants {
    /// Name printed in front of a violation.
    const LABEL: &'static str;

    fn validate_invariants(&self) -> Result<(), MigrateError>;

    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), Self::LABEL);
    }

    /// Hand `self` back only if its invariants hold.
    fn checked(self) -> Result<Self, MigrateError>
    where
        Self: Sized,
    {
        self.validate_invariants()?;
        Ok(self)
    }
}

/// Run a fallible check and panic on error when invariant checking is
/// compiled in. Expands to nothing otherwise.
#[macro_export]
macro_rules! debug_invariants {
    ($check:expr, $label:expr) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = $check {
            panic!("[invariants] {}: {}", $label, e);
        }
    };
}
