//! Internal testing utilities for the milc crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

/// Utility for creating parametrized (aka. table-driven) tests.
///
/// A table-driven test declares a `Case` struct describing one scenario,
/// builds a collection of cases (conventionally named `cases`) and then
/// calls one of the `test_each*` methods with a closure that checks a single
/// case:
///
/// ```
/// use milc_testing::TestCases;
///
/// // Add #[test] attribute
/// fn test_broadcast_rank() {
///   #[derive(Debug)]
///   struct Case {
///     lhs_rank: usize,
///     rhs_rank: usize,
///     expected: usize,
///   }
///
///   let cases = [
///     Case { lhs_rank: 1, rhs_rank: 3, expected: 3 },
///     Case { lhs_rank: 2, rhs_rank: 0, expected: 2 },
///   ];
///
///   cases.test_each(|case| {
///     assert_eq!(case.lhs_rank.max(case.rhs_rank), case.expected);
///   });
/// }
/// # test_broadcast_rank();
/// ```
///
/// Every case is run even if an earlier one fails. Panics are caught, and
/// after all cases have run the test panics with the number of failures and
/// the debug representation of each failing case.
///
/// ## Passing cases by reference vs. value
///
/// `test_each` passes cases by reference so that the failing case can still
/// be printed after the closure panics. Use `test_each_clone` if the closure
/// needs an owned copy, or `test_each_value` when cases are not `Clone`. The
/// latter formats each case up-front.
///
/// ## Unwind safety
///
/// Cases and anything captured by the test closure must be
/// [unwind safe](https://doc.rust-lang.org/std/panic/fn.catch_unwind.html).
/// Builders and programs used by milc tests are plain data, so this is rarely
/// an issue. Where a field has interior mutability, describe how to create it
/// in the case and construct it inside the closure, or wrap it in
/// [`AssertUnwindSafe`](std::panic::AssertUnwindSafe).
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Call `test` with a reference to each case, catching panics.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Variant of [`test_each`](TestCases::test_each) which passes a clone of
    /// each case to the test function.
    fn test_each_clone(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe;

    /// Variant of [`test_each`](TestCases::test_each) which passes each case
    /// by value. The debug representation of the case is captured before the
    /// test function runs.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;
}

/// Panic with a summary of failures, if there were any.
fn report_failures<F: Debug>(failures: &[F]) {
    assert!(
        failures.is_empty(),
        "{} test cases failed: {:?}",
        failures.len(),
        failures
    );
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let failures: Vec<I::Item> = self
            .into_iter()
            .filter(|case| std::panic::catch_unwind(|| test(case)).is_err())
            .collect();
        report_failures(&failures);
    }

    fn test_each_clone(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Clone + Debug + UnwindSafe,
    {
        let test = &test;
        let failures: Vec<I::Item> = self
            .into_iter()
            .filter(|case| {
                let owned = case.clone();
                std::panic::catch_unwind(move || test(owned)).is_err()
            })
            .collect();
        report_failures(&failures);
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe,
    {
        let test = &test;
        let failures: Vec<String> = self
            .into_iter()
            .filter_map(|case| {
                let desc = format!("{:?}", case);
                std::panic::catch_unwind(move || test(case))
                    .is_err()
                    .then_some(desc)
            })
            .collect();
        report_failures(&failures);
    }
}

/// Install a logger which writes `log` records to the test output.
///
/// The level is controlled by `RUST_LOG`. Calling this more than once is
/// harmless, so each test that wants log output can call it.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
