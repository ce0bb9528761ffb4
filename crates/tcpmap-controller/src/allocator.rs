//! Port election
//!
//! Deterministic ascending scan: the lowest free port wins, so repeated runs
//! against the same used set elect the same port.

use std::collections::HashSet;

/// Returned when every port in the range is taken. Never a valid election.
pub const NO_PORT: i32 = 0;

/// Smallest port in `[min, max]` not contained in `used`, or [`NO_PORT`].
pub fn allocate<'a>(min: i32, max: i32, used: impl IntoIterator<Item = &'a i32>) -> i32 {
    let used: HashSet<i32> = used.into_iter().copied().collect();
    (min.max(1)..=max)
        .find(|port| !used.contains(port))
        .unwrap_or(NO_PORT)
}
