//! Fan-out over independent runs
//!
//! Each run's pipeline is independent, so multi-run work is mapped in
//! parallel when the `parallel` feature is on. Output order always matches
//! input order.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Map `f` over `items`, preserving order.
#[cfg(feature = "parallel")]
pub fn map_runs<T, U, F>(items: &[T], f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    items.par_iter().map(f).collect()
}

/// Map `f` over `items`, preserving order.
#[cfg(not(feature = "parallel"))]
pub fn map_runs<T, U, F>(items: &[T], f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    items.iter().map(f).collect()
}
