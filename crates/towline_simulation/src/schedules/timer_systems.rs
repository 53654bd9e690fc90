//! Timer systems для tick-based schedules
//!
//! Системы запускаются в FixedUpdate (60 Hz) и управляют запуском
//! low-frequency schedules (HealthSweep, RopeDraw) через tick counter.

use super::{FixedTickCounter, HealthSweep, RopeDraw, HEALTH_SWEEP_PERIOD_TICKS, ROPE_DRAW_PERIOD_TICKS};
use bevy::prelude::{ResMut, World};

/// System: Increment tick counter (FixedUpdate, запускается ПЕРВЫМ)
///
/// Инкрементирует глобальный tick counter каждый FixedUpdate (60 Hz).
/// Wraparound safe: u64::MAX / 60 / 60 / 60 / 24 / 365 ≈ 9.7 миллиардов лет.
pub fn increment_tick_counter(mut counter: ResMut<FixedTickCounter>) {
    counter.tick = counter.tick.wrapping_add(1); // Wraparound safe
}

/// System: Run HealthSweep schedule каждые 15 ticks (4 Hz @ 60 Hz fixed)
///
/// Exclusive system (требует &mut World для run_schedule).
/// Обход связок: валидность, авто-удлинение, авто-отцеп, тормоза.
pub fn run_health_sweep_timer(world: &mut World) {
    let tick = world.resource::<FixedTickCounter>().tick;

    if tick % HEALTH_SWEEP_PERIOD_TICKS == 0 {
        world.run_schedule(HealthSweep);
    }
}

/// System: Run RopeDraw schedule каждые 18 ticks (~3.3 Hz @ 60 Hz fixed)
///
/// Exclusive system (требует &mut World для run_schedule).
/// Генерация RopeDrawCommand-событий для слоя отрисовки.
pub fn run_rope_draw_timer(world: &mut World) {
    let tick = world.resource::<FixedTickCounter>().tick;

    if tick % ROPE_DRAW_PERIOD_TICKS == 0 {
        world.run_schedule(RopeDraw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_counter_wraps_without_panic() {
        let mut counter = FixedTickCounter { tick: u64::MAX };
        counter.tick = counter.tick.wrapping_add(1);
        assert_eq!(counter.tick, 0);
    }

    #[test]
    fn sweep_period_matches_quarter_second() {
        assert!((super::super::HEALTH_SWEEP_INTERVAL - 0.25).abs() < 1e-6);
        assert!((super::super::ROPE_DRAW_INTERVAL - 0.3).abs() < 1e-6);
    }
}
