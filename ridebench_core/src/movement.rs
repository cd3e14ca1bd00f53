//! Per-tick chair movement.
//!
//! A chair covers exactly `speed` units of Manhattan distance per tick until
//! it reaches its target. The budget is split randomly between the axes so
//! routes are not axis-ordered, and no axis ever overshoots.

use crate::geometry::{Coordinate, Region};
use rand::Rng;

/// Moves `value` by up to `budget` toward `target` along one axis.
///
/// Returns the new value and the unused part of the budget.
fn step_axis(value: i32, target: i32, budget: i32) -> (i32, i32) {
    match value.cmp(&target) {
        std::cmp::Ordering::Less => {
            let next = value + budget;
            if next > target {
                (target, next - target)
            } else {
                (next, 0)
            }
        }
        std::cmp::Ordering::Greater => {
            let next = value - budget;
            if next < target {
                (target, target - next)
            } else {
                (next, 0)
            }
        }
        std::cmp::Ordering::Equal => (value, budget),
    }
}

/// One tick of movement from `current` toward `target`.
pub fn step_toward<R: Rng + ?Sized>(
    current: Coordinate,
    target: Coordinate,
    speed: i32,
    rng: &mut R,
) -> Coordinate {
    let speed = speed.max(0);
    let x_budget = rng.gen_range(0..=speed);
    let y_budget = speed - x_budget;

    let (x, carried) = if current.x == target.x {
        (current.x, x_budget)
    } else {
        step_axis(current.x, target.x, x_budget)
    };
    let (y, remain) = step_axis(current.y, target.y, y_budget + carried);
    // leftover from the y axis goes back to x, clamped again
    let (x, _) = step_axis(x, target.x, remain);

    Coordinate::new(x, y)
}

/// One tick of aimless movement that stays inside `region`.
///
/// Each axis offset is reversed when applying it would leave the region.
pub fn step_free_roam<R: Rng + ?Sized>(
    current: Coordinate,
    region: &Region,
    speed: i32,
    rng: &mut R,
) -> Coordinate {
    let speed = speed.max(0);
    let mut dx = rng.gen_range(0..=speed);
    let mut dy = speed - dx;
    if rng.gen_bool(0.5) {
        dx = -dx;
    }
    if rng.gen_bool(0.5) {
        dy = -dy;
    }

    let (min_x, max_x) = region.range_x();
    let (min_y, max_y) = region.range_y();
    if !(min_x..=max_x).contains(&(current.x + dx)) {
        dx = -dx;
    }
    if !(min_y..=max_y).contains(&(current.y + dy)) {
        dy = -dy;
    }

    Coordinate::new(current.x + dx, current.y + dy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::needed_time;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_reaches_target_in_needed_time() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let target = Coordinate::new(30, 30);
        let mut position = Coordinate::new(0, 0);
        let ticks = needed_time(position.distance_to(target), 2);
        assert_eq!(ticks, 30);

        for tick in 1..=ticks {
            position = step_toward(position, target, 2, &mut rng);
            if tick < ticks {
                assert_ne!(position, target, "arrived early at tick {tick}");
            }
        }
        assert_eq!(position, target);
    }

    #[test]
    fn test_zero_distance_stays_put() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let here = Coordinate::new(-4, 9);
        assert_eq!(step_toward(here, here, 5, &mut rng), here);
    }

    #[test]
    fn test_free_roam_stays_in_region() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let region = Region::new("test", Coordinate::new(0, 0), 40, 40);
        let mut position = Coordinate::new(19, -19);
        for _ in 0..1000 {
            let next = step_free_roam(position, &region, 7, &mut rng);
            assert_eq!(position.distance_to(next), 7);
            assert!(region.contains(next), "{next} left the region");
            position = next;
        }
    }

    proptest! {
        #[test]
        fn test_step_covers_speed_until_arrival(
            seed in any::<u64>(),
            speed in 1i32..=10,
            sx in -200i32..200,
            sy in -200i32..200,
            tx in -200i32..200,
            ty in -200i32..200,
        ) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let target = Coordinate::new(tx, ty);
            let mut position = Coordinate::new(sx, sy);
            let ticks = needed_time(position.distance_to(target), speed);

            for _ in 0..ticks {
                let before = position.distance_to(target);
                let next = step_toward(position, target, speed, &mut rng);
                prop_assert_eq!(position.distance_to(next), speed.min(before));
                prop_assert_eq!(next.distance_to(target), (before - speed).max(0));
                position = next;
            }
            prop_assert_eq!(position, target);
        }
    }
}
