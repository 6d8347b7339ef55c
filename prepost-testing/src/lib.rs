//! Internal testing utilities for the prepost crates.

use std::fmt::Debug;
use std::panic::RefUnwindSafe;

/// Table-driven test runner.
///
/// Put the inputs and expectations for one case in a `Debug` struct
/// (conventionally `Case`), collect the cases into an array or `Vec` and call
/// `test_each` with a closure that checks one case. Every case is run even if
/// earlier ones fail. Afterwards the runner panics with the number of failed
/// cases and their debug representations.
///
/// ```
/// use prepost_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case {
///     layout: &'static str,
///     rank: usize,
/// }
///
/// let cases = [
///     Case { layout: "NCHW", rank: 4 },
///     Case { layout: "NC", rank: 2 },
/// ];
///
/// cases.test_each(|case| {
///     assert_eq!(case.layout.len(), case.rank);
/// });
/// ```
///
/// Cases and the closure must be unwind safe, since each case runs under
/// [`catch_unwind`](std::panic::catch_unwind). Values with interior
/// mutability should be created inside the closure, or wrapped in
/// [`AssertUnwindSafe`](std::panic::AssertUnwindSafe).
pub trait TestCases {
    type Case;

    /// Run `test` with a reference to each case.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;
}

fn check_failures<T: Debug>(failures: &[T]) {
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
        let failures: Vec<_> = self
            .into_iter()
            .filter(|case| std::panic::catch_unwind(|| test(case)).is_err())
            .collect();
        check_failures(&failures);
    }
}
