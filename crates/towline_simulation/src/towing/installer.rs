//! Установка буксировочной связки
//!
//! Принимает AttachOrder из протокола выбора, прогоняет физические
//! предусловия и монтирует связку: rope-джойнт на буксируемой,
//! снимок исходных параметров, поднятые демпферы, ослабленные тормоза.
//!
//! Инвариант: до прохождения ВСЕХ предусловий мир не мутируется.
//! Отказ на любом шаге оставляет обе машины ровно в исходном состоянии.

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;
use std::fmt;

use crate::components::{Occupants, Operator, VehicleHealth, Wheels};
use crate::config::TowConfig;
use crate::logger::{log, log_warning};
use crate::registry::{RestoreSnapshot, TowLink, TowRegistry};
use crate::towing::events::{CrewMessage, EffectRequest, LinkEstablished, OperatorMessage};
use crate::towing::release::emit_strap_sound;

/// Запас троса над текущей дистанцией при сцепке (метры).
/// Трос не должен родиться в натяг.
pub const ATTACH_SLACK: f32 = 0.25;

/// Потолок боковой жёсткости колёс буксируемой
const STIFFNESS_CEIL: f32 = 2.0;
/// Прибавка боковой жёсткости на время буксировки
const STIFFNESS_BUMP: f32 = 0.15;

/// Отказ сцепки. Каждый вариант — своё сообщение оператору.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// Под лучом нет машины и рядом с точкой попадания тоже
    NoTarget,
    /// Оба клика пришлись на одну машину
    SamePuller,
    /// Одна из машин уже в связке (любая роль)
    AlreadyLinked,
    /// На машине нет твёрдого тела
    MissingRigidBody,
    /// Прочность ниже порога
    TooDamaged,
    /// Якорь в запретной зоне
    RestrictedZone,
    /// Кулдаун крюка ещё идёт
    OnCooldown,
    /// Машины дальше, чем может быть трос
    TooFarApart,
}

impl AttachError {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachError::NoTarget => "no_target",
            AttachError::SamePuller => "same_puller",
            AttachError::AlreadyLinked => "already_linked",
            AttachError::MissingRigidBody => "missing_rigid_body",
            AttachError::TooDamaged => "too_damaged",
            AttachError::RestrictedZone => "restricted_zone",
            AttachError::OnCooldown => "on_cooldown",
            AttachError::TooFarApart => "too_far_apart",
        }
    }

    /// Текст для HUD оператора
    pub fn user_text(&self) -> &'static str {
        match self {
            AttachError::NoTarget => "No vehicle there.",
            AttachError::SamePuller => "Select a different vehicle.",
            AttachError::AlreadyLinked => "That vehicle is already in a tow.",
            AttachError::MissingRigidBody => "That vehicle cannot be towed.",
            AttachError::TooDamaged => "Vehicle is too damaged to tow.",
            AttachError::RestrictedZone => "Cannot attach a tow here.",
            AttachError::OnCooldown => "Hook not ready yet.",
            AttachError::TooFarApart => "Vehicles are too far apart.",
        }
    }
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Запретные для сцепки зоны (охраняемые постройки и т.п.).
/// Наполняет embedder; по умолчанию пусто.
#[derive(Resource, Debug, Clone, Default)]
pub struct RestrictedZones(pub Vec<RestrictedZone>);

#[derive(Debug, Clone, Copy)]
pub struct RestrictedZone {
    pub center: Vec3,
    pub radius: f32,
}

impl RestrictedZones {
    pub fn contains(&self, point: Vec3) -> bool {
        self.0
            .iter()
            .any(|zone| point.distance_squared(zone.center) <= zone.radius * zone.radius)
    }
}

/// Event: протокол выбора одобрил пару, монтируем (внутренний)
#[derive(Event, Debug, Clone)]
pub struct AttachOrder {
    pub operator: Entity,
    pub puller: Entity,
    pub towed: Entity,
    pub anchor_puller_local: Vec3,
    pub anchor_towed_local: Vec3,
}

/// Стартовая длина троса.
///
/// max(минимум, желаемая, текущая дистанция + запас); выход за потолок —
/// отказ TooFarApart. Клампить нельзя: трос, рождённый короче дистанции,
/// лопнул бы первым же тиком.
pub fn initial_rope_length(config: &TowConfig, d0: f32) -> Result<f32, AttachError> {
    let length = config
        .rope_length_min
        .max(config.rope_length_desired)
        .max(d0 + ATTACH_SLACK);
    if length > config.rope_length_max {
        return Err(AttachError::TooFarApart);
    }
    Ok(length)
}

/// Rope-джойнт связки: дистанция ≤ rope_limit, вращение свободно.
/// Используется и при сцепке, и при перестройке после авто-удлинения.
pub fn rope_joint(link: &TowLink) -> ImpulseJoint {
    let joint = RopeJointBuilder::new(link.rope_limit)
        .local_anchor1(link.anchor_puller_local)
        .local_anchor2(link.anchor_towed_local);
    ImpulseJoint::new(link.puller, joint)
}

/// System: монтаж одобренных связок
///
/// Порядок предусловий фиксирован: занятость (перепроверка после
/// других order'ов этого же тика) → твёрдые тела → прочность →
/// запретные зоны → длина троса. Потом, и только потом, мутации.
pub fn install_requested_links(
    mut orders: EventReader<AttachOrder>,
    mut registry: ResMut<TowRegistry>,
    config: Res<TowConfig>,
    zones: Res<RestrictedZones>,
    mut commands: Commands,
    mut operators: Query<&mut Operator>,
    transforms: Query<&Transform>,
    bodies: Query<&RigidBody>,
    health: Query<&VehicleHealth>,
    occupants: Query<&Occupants>,
    mut damping: Query<&mut Damping>,
    mut wheels: Query<&mut Wheels>,
    mut sleeping: Query<&mut Sleeping>,
    mut established: EventWriter<LinkEstablished>,
    mut messages: (EventWriter<OperatorMessage>, EventWriter<CrewMessage>),
    mut effects: EventWriter<EffectRequest>,
) {
    for order in orders.read() {
        let result = try_install(
            order,
            &mut registry,
            &config,
            &zones,
            &mut commands,
            &transforms,
            &bodies,
            &health,
            &mut damping,
            &mut wheels,
            &mut sleeping,
        );

        match result {
            Ok(rope_limit) => {
                if let Ok(mut operator) = operators.get_mut(order.operator) {
                    operator.start_cooldown(config.attach_cooldown_seconds);
                }

                established.write(LinkEstablished {
                    puller: order.puller,
                    towed: order.towed,
                    rope_limit,
                });
                messages.0.write(OperatorMessage {
                    operator: order.operator,
                    text: "Tow attached.".to_string(),
                });
                messages.1.write(CrewMessage {
                    vehicle: order.puller,
                    text: "Towing a vehicle.".to_string(),
                });
                messages.1.write(CrewMessage {
                    vehicle: order.towed,
                    text: "Your vehicle is under tow.".to_string(),
                });

                if config.play_sound_on_link {
                    if let Some(link) = registry.get(order.puller) {
                        let midpoint = link_midpoint(&transforms, link);
                        let drivers = collect_drivers(&occupants, order.puller, order.towed);
                        emit_strap_sound(
                            &mut effects,
                            &config,
                            &config.sound_on_link,
                            midpoint,
                            &drivers,
                        );
                    }
                }

                if config.debug_log {
                    log(&format!(
                        "tow: attached {:?} -> {:?}, rope {:.2}",
                        order.puller, order.towed, rope_limit
                    ));
                }
            }
            Err(err) => {
                messages.0.write(OperatorMessage {
                    operator: order.operator,
                    text: err.user_text().to_string(),
                });
                if config.debug_log {
                    log(&format!(
                        "tow: attach {:?} -> {:?} rejected: {}",
                        order.puller, order.towed, err
                    ));
                }
            }
        }
    }
}

/// Предусловия + мутации одной сцепки. Ok(rope_limit) | Err(первый отказ).
#[allow(clippy::too_many_arguments)]
fn try_install(
    order: &AttachOrder,
    registry: &mut TowRegistry,
    config: &TowConfig,
    zones: &RestrictedZones,
    commands: &mut Commands,
    transforms: &Query<&Transform>,
    bodies: &Query<&RigidBody>,
    health: &Query<&VehicleHealth>,
    damping: &mut Query<&mut Damping>,
    wheels: &mut Query<&mut Wheels>,
    sleeping: &mut Query<&mut Sleeping>,
) -> Result<f32, AttachError> {
    // Другой order этого же тика мог занять одну из машин
    if registry.is_linked(order.puller) || registry.is_linked(order.towed) {
        return Err(AttachError::AlreadyLinked);
    }
    if bodies.get(order.puller).is_err() || bodies.get(order.towed).is_err() {
        return Err(AttachError::MissingRigidBody);
    }
    for vehicle in [order.puller, order.towed] {
        if let Ok(h) = health.get(vehicle) {
            if h.ratio() < config.min_health_ratio {
                return Err(AttachError::TooDamaged);
            }
        }
    }

    let (puller_tf, towed_tf) = match (transforms.get(order.puller), transforms.get(order.towed)) {
        (Ok(p), Ok(t)) => (*p, *t),
        _ => return Err(AttachError::MissingRigidBody),
    };

    let anchor_puller_world = puller_tf.transform_point(order.anchor_puller_local);
    let anchor_towed_world = towed_tf.transform_point(order.anchor_towed_local);
    if zones.contains(anchor_puller_world) || zones.contains(anchor_towed_world) {
        return Err(AttachError::RestrictedZone);
    }

    let d0 = anchor_puller_world.distance(anchor_towed_world);
    let rope_limit = initial_rope_length(config, d0)?;

    let snapshot = capture_snapshot(order, damping, wheels)?;

    // Все предусловия пройдены, дальше только мутации.
    let link = TowLink {
        puller: order.puller,
        towed: order.towed,
        anchor_puller_local: order.anchor_puller_local,
        anchor_towed_local: order.anchor_towed_local,
        rope_limit,
        snapshot,
    };

    if let Ok(mut towed_commands) = commands.get_entity(order.towed) {
        towed_commands.insert(rope_joint(&link));
    }

    if config.raise_puller_drag {
        if let Ok(mut d) = damping.get_mut(order.puller) {
            d.linear_damping += config.puller_drag_delta;
        }
    }
    if let Ok(mut d) = damping.get_mut(order.towed) {
        d.linear_damping += config.towed_drag_delta;
        d.angular_damping += config.towed_angular_drag_delta;
    }

    if let Ok(mut towed_wheels) = wheels.get_mut(order.towed) {
        for wheel in towed_wheels.0.iter_mut().filter(|w| w.enabled) {
            if config.ease_towed_brakes {
                wheel.brake_torque = wheel.brake_torque.min(config.towed_brake_torque);
            }
            wheel.sideways_stiffness =
                STIFFNESS_CEIL.min(wheel.sideways_stiffness + STIFFNESS_BUMP);
        }
    }

    if let Ok(mut s) = sleeping.get_mut(order.towed) {
        s.sleeping = false;
    }

    if !registry.insert(link) {
        // Недостижимо после проверки is_linked выше, но реестр — истина
        log_warning("tow: registry rejected a validated link");
        return Err(AttachError::AlreadyLinked);
    }
    Ok(rope_limit)
}

/// Снимок исходных параметров до любых правок
fn capture_snapshot(
    order: &AttachOrder,
    damping: &Query<&mut Damping>,
    wheels: &Query<&mut Wheels>,
) -> Result<RestoreSnapshot, AttachError> {
    let puller_damping = damping
        .get(order.puller)
        .map_err(|_| AttachError::MissingRigidBody)?;
    let towed_damping = damping
        .get(order.towed)
        .map_err(|_| AttachError::MissingRigidBody)?;

    let (brakes, stiffness) = match wheels.get(order.towed) {
        Ok(w) => (
            w.0.iter().map(|u| u.brake_torque).collect(),
            w.0.iter().map(|u| u.sideways_stiffness).collect(),
        ),
        // Машина без колёс (лодка на прицепе) — пустые массивы
        Err(_) => (Vec::new(), Vec::new()),
    };

    Ok(RestoreSnapshot {
        puller_linear_damping: puller_damping.linear_damping,
        towed_linear_damping: towed_damping.linear_damping,
        towed_angular_damping: towed_damping.angular_damping,
        towed_brake_torque: brakes,
        towed_sideways_stiffness: stiffness,
    })
}

/// Середина ремня: средняя точка мировых якорей, не кузовов.
/// Машина без transform'а уже исчезла: позиция выжившей, обе — ноль.
pub(crate) fn link_midpoint(transforms: &Query<&Transform>, link: &TowLink) -> Vec3 {
    match (transforms.get(link.puller), transforms.get(link.towed)) {
        (Ok(p), Ok(t)) => {
            (p.transform_point(link.anchor_puller_local)
                + t.transform_point(link.anchor_towed_local))
                * 0.5
        }
        (Ok(p), Err(_)) => p.translation,
        (Err(_), Ok(t)) => t.translation,
        _ => Vec3::ZERO,
    }
}

pub(crate) fn collect_drivers(
    occupants: &Query<&Occupants>,
    puller: Entity,
    towed: Entity,
) -> Vec<Entity> {
    let mut drivers = Vec::new();
    for vehicle in [puller, towed] {
        if let Ok(crew) = occupants.get(vehicle) {
            drivers.extend(crew.0.iter().copied());
        }
    }
    drivers
}
