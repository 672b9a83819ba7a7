//! Deactivation target calculator.
//!
//! ```text
//! H  healthy members
//! U  unhealthy members, candidates for removal
//! D  members already deactivating
//! T  desired size
//!
//! target = max(H + U + D - T, min(MAX - D, U))
//! target = max(D, target)
//! ```
//!
//! The result counts members that should be deactivating once this cycle is
//! done, including those already on their way out. `MAX` bounds how many
//! unhealthy members may be deactivating at the same time when the cluster
//! is not over its desired size.

/// Default cap on concurrently deactivating unhealthy members.
pub const MAX_UNHEALTHY_DEACTIVATIONS: usize = 2;

pub fn calculate_deactivate_target(
    healthy: usize,
    unhealthy: usize,
    deactivating: usize,
    desired: usize,
) -> usize {
    calculate_deactivate_target_with(healthy, unhealthy, deactivating, desired, MAX_UNHEALTHY_DEACTIVATIONS)
}

/// [`calculate_deactivate_target`] with an explicit unhealthy cap.
pub fn calculate_deactivate_target_with(
    healthy: usize,
    unhealthy: usize,
    deactivating: usize,
    desired: usize,
    max_unhealthy: usize,
) -> usize {
    let (h, u, d, t, m) = (
        healthy as i64,
        unhealthy as i64,
        deactivating as i64,
        desired as i64,
        max_unhealthy as i64,
    );
    let target = (h + u + d - t).max((m - d).min(u));
    // d >= 0, so the result is never negative.
    target.max(d) as usize
}
