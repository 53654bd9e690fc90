//! События буксировки — граница стратегического и тактического слоёв
//!
//! Architecture:
//! - ECS: реестр связок, предусловия, PD-ассист, sweep
//! - Тактический слой: raycast прицеливания, звук, chat, отрисовка верёвки
//! - Events: HookClick/HookCancel/JointSnapped (внутрь),
//!   LinkEstablished/LinkReleased/OperatorMessage/CrewMessage/
//!   EffectRequest/RopeDrawCommand (наружу)

use bevy::prelude::*;

/// Причина отцепа. Определяет звук и текст уведомлений.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Оператор отцепил сам (клик по машине в связке)
    Manual,
    /// Джойнт разрушен физикой или пропал
    StrapBroke,
    /// Машины разошлись за буфер отцепа
    TooFarApart,
    /// Одна из машин погибла/исчезла
    VehicleDestroyed,
    /// Остановка симуляции
    Shutdown,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::Manual => "manual",
            ReleaseReason::StrapBroke => "strap_broke",
            ReleaseReason::TooFarApart => "too_far_apart",
            ReleaseReason::VehicleDestroyed => "vehicle_destroyed",
            ReleaseReason::Shutdown => "shutdown",
        }
    }
}

/// Event: клик крюком (тактический слой → ECS)
///
/// Тактический слой уже сделал raycast и проверил "крюк в руках";
/// сюда приходит готовый результат. target = entity под лучом
/// (может оказаться не машиной — тогда ищем ближайшую у hit_point).
#[derive(Event, Debug, Clone)]
pub struct HookClick {
    pub operator: Entity,
    pub target: Option<Entity>,
    /// Точка попадания луча (мир)
    pub hit_point: Vec3,
}

/// Event: отмена начатого выбора (кнопка отмены)
#[derive(Event, Debug, Clone)]
pub struct HookCancel {
    pub operator: Entity,
}

/// Event: физический бэкенд разорвал джойнт (превышен break_force)
#[derive(Event, Debug, Clone)]
pub struct JointSnapped {
    pub towed: Entity,
    /// Сила в момент разрыва (Н), для логов
    pub force: f32,
}

/// Event: запрос на отцеп (внутренний)
///
/// Единственный путь демонтажа связки. Все источники (ручной клик,
/// sweep, разрыв, shutdown) пишут сюда; дренаж идемпотентен —
/// второй запрос по снятой связке просто игнорируется.
#[derive(Event, Debug, Clone)]
pub struct ReleaseRequest {
    pub puller: Entity,
    pub reason: ReleaseReason,
}

/// Event: связка создана (ECS → тактический слой)
#[derive(Event, Debug, Clone)]
pub struct LinkEstablished {
    pub puller: Entity,
    pub towed: Entity,
    pub rope_limit: f32,
}

/// Event: связка снята (ECS → тактический слой)
#[derive(Event, Debug, Clone)]
pub struct LinkReleased {
    pub puller: Entity,
    pub towed: Entity,
    pub reason: ReleaseReason,
}

/// Event: адресное сообщение оператору (HUD/chat)
#[derive(Event, Debug, Clone)]
pub struct OperatorMessage {
    pub operator: Entity,
    pub text: String,
}

/// Event: сообщение экипажу машины (все Occupants)
#[derive(Event, Debug, Clone)]
pub struct CrewMessage {
    pub vehicle: Entity,
    pub text: String,
}

/// Event: звук/частицы в точке (ECS → тактический слой)
#[derive(Event, Debug, Clone)]
pub struct EffectRequest {
    /// Путь ассета ("fx/strap_break")
    pub path: String,
    pub position: Vec3,
    /// None = слышно всем в радиусе, Some = только этому актору
    pub only_for: Option<Entity>,
}

/// Event: сегмент верёвки для отрисовки (ECS → тактический слой)
///
/// Слой отрисовки рисует линию from→to для конкретного зрителя
/// и держит её duration секунд.
#[derive(Event, Debug, Clone)]
pub struct RopeDrawCommand {
    pub viewer: Entity,
    pub from: Vec3,
    pub to: Vec3,
    /// RGBA, компоненты 0..1
    pub color: [f32; 4],
    /// Секунды жизни сегмента
    pub duration: f32,
}
