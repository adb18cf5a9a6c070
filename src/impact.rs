//! Windowed net-impact attribution
//!
//! Attributes the signed size change of one lifetime to a half-open analysis
//! window. This measures change, not occupancy: a resource alive across the
//! whole window contributes nothing.

/// Destroy-time sentinel for records still open when observation ended.
pub const STILL_LIVE: i64 = i64::MAX;

/// Net contribution of a lifetime to the window `[window_start, window_end)`.
///
/// * Born inside the window and still alive at its end: `+size`, charged to
///   the creation stack.
/// * Born before the window and released inside it: `-size`, charged back to
///   the creation stack (not the release stack) so gains and losses of one
///   call site net out across windows.
/// * Anything else, including born-and-released inside: `0`.
pub fn net_impact(
    size: i64,
    create_time: i64,
    destroy_time: i64,
    window_start: i64,
    window_end: i64,
) -> i64 {
    if create_time >= window_start && create_time < window_end && destroy_time >= window_end {
        size
    } else if create_time < window_start
        && destroy_time >= window_start
        && destroy_time < window_end
    {
        -size
    } else {
        0
    }
}
