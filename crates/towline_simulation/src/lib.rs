//! TOWLINE Simulation Core
//!
//! ECS-симуляция буксировки на Bevy 0.16 (strategic layer)
//!
//! HYBRID ARCHITECTURE:
//! - ECS = strategic layer (реестр связок, предусловия сцепки,
//!   PD-ассист, надзор за тросом)
//! - Физический бэкенд = tactical layer (солвер джойнтов, raycast
//!   прицеливания, рендер троса, звук)
//!
//! Граница проходит по событиям: тактический слой шлёт HookClick /
//! HookCancel / JointSnapped, забирает EffectRequest / RopeDrawCommand /
//! OperatorMessage / CrewMessage.

use bevy::prelude::*;

// Публичные модули
pub mod components;
pub mod config;
pub mod geometry;
pub mod logger;
pub mod physics;
pub mod registry;
pub mod schedules;
pub mod towing;

// Re-export базовых типов для удобства
pub use components::*;
pub use config::{ConfigError, TowConfig, DEFAULT_CONFIG_PATH};
pub use logger::{
    init_logger, log, log_error, log_info, log_warning, set_log_level, set_logger,
    set_logger_if_needed, ConsoleLogger, LogLevel, LogPrinter,
};
pub use physics::{spawn_tow_vehicle, HeadlessVehiclePlugin};
pub use registry::{HookSelection, SelectionState, TowLink, TowRegistry};
pub use schedules::{FixedTickCounter, HealthSweep, RopeDraw, FIXED_DT, SIM_TICK_HZ};
pub use towing::{
    request_release_all, AttachError, AttachOrder, CrewMessage, EffectRequest, HookCancel,
    HookClick, JointSnapped, LinkEstablished, LinkReleased, OperatorMessage, ReleaseReason,
    ReleaseRequest, RestrictedZone, RestrictedZones, RopeDrawCommand, TowingPlugin, TowingSet,
};

/// Главный plugin симуляции (объединяет все подсистемы)
///
/// TowConfig не перетирает: embedder может вставить свой (например,
/// загруженный с диска) ДО добавления плагина.
pub struct SimulationPlugin;

impl Plugin for SimulationPlugin {
    fn build(&self, app: &mut App) {
        app
            // Fixed timestep 60Hz для simulation tick (легче считать интервалы)
            .insert_resource(Time::<Fixed>::from_hz(SIM_TICK_HZ as f64))
            .init_resource::<TowConfig>()
            .add_plugins(TowingPlugin);
    }
}

/// Создаёт minimal Bevy App для headless симуляции
///
/// Без солвера Rapier: предел троса держит HeadlessVehiclePlugin.
/// Тики прогоняются вручную через world_mut().run_schedule(FixedUpdate).
pub fn create_headless_app(config: TowConfig) -> App {
    let mut app = App::new();
    init_logger();
    app.add_plugins(MinimalPlugins)
        .insert_resource(config)
        .add_plugins((SimulationPlugin, HeadlessVehiclePlugin));

    app
}

/// Snapshot мира для сравнения детерминизма
///
/// Компоненты сериализуются через Debug в порядке Entity ID:
/// два одинаковых прогона обязаны дать побайтово равные снимки.
pub fn world_snapshot<T: Component>(world: &mut World) -> Vec<u8>
where
    T: std::fmt::Debug,
{
    let mut query = world.query::<(Entity, &T)>();
    let mut entities: Vec<_> = query.iter(world).collect();
    entities.sort_by_key(|(entity, _)| entity.index());

    let mut snapshot = Vec::new();
    for (entity, component) in entities {
        snapshot.extend_from_slice(&entity.index().to_le_bytes());
        snapshot.extend_from_slice(format!("{:?}", component).as_bytes());
    }

    snapshot
}
