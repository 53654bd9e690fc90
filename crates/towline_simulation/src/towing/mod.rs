//! Буксировочная связка (модуль целиком)
//!
//! ECS ответственность:
//! - Реестр связок, двухшаговый выбор, предусловия сцепки
//! - PD-ассист и выравнивание каждый тик
//! - HealthSweep: валидность, авто-удлинение, авто-отцеп
//! - RopeDraw: команды отрисовки троса
//!
//! Тактический слой (embedder):
//! - Raycast прицеливания → HookClick/HookCancel
//! - Разрыв джойнта по силе → JointSnapped
//! - Звук, chat, отрисовка линий по исходящим событиям

use bevy::prelude::*;

pub mod assist;
pub mod events;
pub mod installer;
pub mod monitor;
pub mod protocol;
pub mod release;
pub mod rope;

// Re-export основных типов
pub use assist::{compute_assist, AssistOutput, LinkKinematics};
pub use events::{
    CrewMessage, EffectRequest, HookCancel, HookClick, JointSnapped, LinkEstablished,
    LinkReleased, OperatorMessage, ReleaseReason, ReleaseRequest, RopeDrawCommand,
};
pub use installer::{AttachError, AttachOrder, RestrictedZone, RestrictedZones};
pub use monitor::{evaluate_separation, SeparationVerdict};
pub use release::request_release_all;

use crate::components::operator::tick_hook_cooldowns;
use crate::registry::{SelectionState, TowRegistry};
use crate::schedules::timer_systems::{
    increment_tick_counter, run_health_sweep_timer, run_rope_draw_timer,
};
use crate::schedules::{FixedTickCounter, HealthSweep, RopeDraw};

/// SystemSet буксировки в FixedUpdate (для внешнего упорядочивания:
/// headless-интеграция подвешивается после него)
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct TowingSet;

/// Towing Plugin
///
/// Регистрирует буксировочные системы в FixedUpdate (60 Hz).
///
/// Порядок выполнения:
/// 1. increment_tick_counter — глобальный тик
/// 2. tick_hook_cooldowns — таймеры крюка
/// 3. protocol::process_hook_input — клики → выбор/AttachOrder/отцеп
/// 4. installer::install_requested_links — предусловия + монтаж
/// 5. monitor::process_joint_breaks — JointSnapped → ReleaseRequest
/// 6. run_health_sweep_timer — каждые 15 ticks HealthSweep schedule
/// 7. release::process_release_requests — единый дренаж отцепов
/// 8. assist::apply_stabilization_assist — PD-коррекции
/// 9. run_rope_draw_timer — каждые 18 ticks RopeDraw schedule
///
/// Дренаж стоит ДО ассиста: снятая в этом тике связка не должна
/// получить ни одной коррекции.
pub struct TowingPlugin;

impl Plugin for TowingPlugin {
    fn build(&self, app: &mut App) {
        // Регистрация событий
        app.add_event::<HookClick>()
            .add_event::<HookCancel>()
            .add_event::<JointSnapped>()
            .add_event::<AttachOrder>()
            .add_event::<ReleaseRequest>()
            .add_event::<LinkEstablished>()
            .add_event::<LinkReleased>()
            .add_event::<OperatorMessage>()
            .add_event::<CrewMessage>()
            .add_event::<EffectRequest>()
            .add_event::<RopeDrawCommand>();

        // Реестры и счётчик тиков
        app.init_resource::<TowRegistry>()
            .init_resource::<SelectionState>()
            .init_resource::<RestrictedZones>()
            .init_resource::<FixedTickCounter>();

        // Low-frequency schedules
        app.init_schedule(HealthSweep).init_schedule(RopeDraw);
        app.add_systems(HealthSweep, monitor::run_health_sweep);
        app.add_systems(RopeDraw, rope::draw_rope_curves);

        // Регистрация систем в FixedUpdate
        app.add_systems(
            FixedUpdate,
            (
                // Фаза 1: Время
                increment_tick_counter,
                tick_hook_cooldowns,

                // Фаза 2: Протокол сцепки (вход → выбор → order → монтаж)
                protocol::process_hook_input,
                installer::install_requested_links,

                // Фаза 3: Надзор (разрывы каждый тик, sweep по таймеру)
                monitor::process_joint_breaks,
                run_health_sweep_timer,

                // Фаза 4: Демонтаж (до ассиста!)
                release::process_release_requests,

                // Фаза 5: Стабилизация
                assist::apply_stabilization_assist,

                // Фаза 6: Визуализация
                run_rope_draw_timer,
            )
                .chain() // Последовательное выполнение
                .in_set(TowingSet),
        );

        // Shutdown: AppExit ловится в Update, FixedUpdate может не настать
        app.add_systems(Update, release::release_links_on_exit);
    }
}
