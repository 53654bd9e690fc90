//! Custom schedules and tick counter
//!
//! Tick-based scheduling для детерминистичных low-frequency updates.
//!
//! # Архитектура
//!
//! **FixedUpdate (60 Hz)** → increment_tick_counter
//!   ├─ tick % 15 == 0 → HealthSweep (4 Hz, 0.25s)
//!   └─ tick % 18 == 0 → RopeDraw (~3.3 Hz, 0.3s)
//!
//! # Почему tick-based, а не on_timer()?
//!
//! - **Детерминизм:** Tick counter инкрементируется в FixedUpdate (не зависит от FPS)
//! - **Точность:** Modulo не дрейфует (в отличие от timer += delta)
//! - **Wraparound safe:** u64::MAX / 60 / 60 / 60 / 24 / 365 ≈ 9.7 миллиардов лет

use bevy::ecs::schedule::ScheduleLabel;
use bevy::prelude::Resource;

pub mod timer_systems;

/// Частота фиксированного тика симуляции.
pub const SIM_TICK_HZ: f32 = 60.0;

/// Шаг фиксированного тика (секунды). Вся интеграция и PD-коррекция
/// считаются от этой константы, не от wall-clock.
pub const FIXED_DT: f32 = 1.0 / SIM_TICK_HZ;

/// HealthSweep запускается каждые 15 ticks (60 Hz / 15 = 4 Hz = 0.25s).
pub const HEALTH_SWEEP_PERIOD_TICKS: u64 = 15;

/// RopeDraw запускается каждые 18 ticks (60 Hz / 18 ≈ 3.3 Hz = 0.3s).
pub const ROPE_DRAW_PERIOD_TICKS: u64 = 18;

/// Интервал между проходами HealthSweep (секунды). Темп авто-удлинения
/// троса умножается на этот интервал.
pub const HEALTH_SWEEP_INTERVAL: f32 = HEALTH_SWEEP_PERIOD_TICKS as f32 / SIM_TICK_HZ;

/// Интервал между проходами RopeDraw (секунды). Длительность сегментов
/// верёвки выводится из него.
pub const ROPE_DRAW_INTERVAL: f32 = ROPE_DRAW_PERIOD_TICKS as f32 / SIM_TICK_HZ;

/// Глобальный tick counter (детерминистичный, wraparound safe)
///
/// Инкрементируется в каждый FixedUpdate tick (60 Hz).
/// Используется для запуска low-frequency schedules (HealthSweep, RopeDraw).
///
/// # Overflow Protection
/// u64::MAX / 60 / 60 / 60 / 24 / 365 ≈ 9.7 миллиардов лет.
/// Wraparound safe: modulo автоматически handle overflow.
#[derive(Resource, Default)]
pub struct FixedTickCounter {
    pub tick: u64,
}

/// Custom schedule: HealthSweep (4 Hz = 60/15)
///
/// Медленный обход живых связок:
/// - валидность машин и джойнта
/// - авто-удлинение / авто-отцеп по дистанции
/// - поддержание ослабленных тормозов
/// - чистка осиротевших выборов крюка
///
/// Запускается каждые 15 ticks (60 Hz / 15 = 4 Hz = 0.25s)
#[derive(ScheduleLabel, Debug, Clone, PartialEq, Eq, Hash)]
pub struct HealthSweep;

/// Custom schedule: RopeDraw (~3.3 Hz = 60/18)
///
/// Read-only проход, переводящий живые связки в RopeDrawCommand-события
/// для слоя отрисовки. Не трогает ни реестр, ни физику.
///
/// Запускается каждые 18 ticks (60 Hz / 18 ≈ 3.3 Hz = 0.3s)
#[derive(ScheduleLabel, Debug, Clone, PartialEq, Eq, Hash)]
pub struct RopeDraw;
