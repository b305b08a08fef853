//! Year-over-year turn order resolution.

use tracing::debug;

use crate::config::{is_sentinel, DirectionPolicy};

/// Computes the turn order for `target_year`.
///
/// The base order applies as-is in `base_year`; each later year applies one
/// rotation step in `direction`. Years before `base_year` get the base order
/// unrotated. Legacy sentinel values are stripped before rotating.
pub fn resolve_for_year(
    base_order: &[String],
    base_year: i32,
    target_year: i32,
    direction: DirectionPolicy,
) -> Vec<String> {
    let mut order: Vec<String> = base_order
        .iter()
        .filter(|value| !is_sentinel(value))
        .cloned()
        .collect();

    if order.len() != base_order.len() {
        debug!(
            stripped = base_order.len() - order.len(),
            "Dropped sentinel values from rotation order"
        );
    }

    if order.is_empty() || target_year <= base_year {
        return order;
    }

    // A full cycle of len steps is the identity.
    let years_diff = (target_year - base_year) as usize;
    let steps = years_diff % order.len();

    match direction {
        DirectionPolicy::MoveFirstToLast => order.rotate_left(steps),
        DirectionPolicy::MoveLastToFirst => order.rotate_right(steps),
    }

    order
}
