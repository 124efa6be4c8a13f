//! Assertion macros with different levels of checking.
//!
//! The simple level is always active and guards cheap invariants. The
//! moderate and advanced levels are only compiled in when the `debug-checks`
//! feature is enabled, since they may be expensive to evaluate in the inner
//! search loops.

/// Cheap sanity checks that are always compiled in.
#[macro_export]
macro_rules! bop_assert_simple {
    ($($arg:tt)*) => {
        assert!($($arg)*);
    };
}

/// Checks with a runtime cost that is acceptable during debugging but not in
/// release runs.
#[macro_export]
macro_rules! bop_assert_moderate {
    ($($arg:tt)*) => {
        #[cfg(feature = "debug-checks")]
        assert!($($arg)*);
    };
}

/// Expensive checks, e.g. scanning a whole data structure to verify an
/// invariant.
#[macro_export]
macro_rules! bop_assert_advanced {
    ($($arg:tt)*) => {
        #[cfg(feature = "debug-checks")]
        assert!($($arg)*);
    };
}

#[macro_export]
macro_rules! bop_assert_eq_simple {
    ($($arg:tt)*) => {
        assert_eq!($($arg)*);
    };
}

#[macro_export]
macro_rules! bop_assert_eq_moderate {
    ($($arg:tt)*) => {
        #[cfg(feature = "debug-checks")]
        assert_eq!($($arg)*);
    };
}
