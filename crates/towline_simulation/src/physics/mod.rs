//! Headless-физика машин (без полного шага Rapier)
//!
//! Архитектура:
//! - Компоненты Rapier (Velocity, ExternalForce, Damping) как протокол данных
//! - Custom интеграция сил: в headless прогоне солвер Rapier не шагает
//! - Ограничение троса: одностороннее проецирование пары + демпфер,
//!   взвешенно по массам
//!
//! В игровой сборке с RapierPhysicsPlugin модуль НЕ подключается:
//! джойнт и солвер обслуживают трос сами, плагин нужен только
//! тестам и headless-демо.
//!
//! Детерминизм: fixed timestep (60Hz), шаг из FIXED_DT, не из wall-clock.

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::components::{Occupants, Vehicle, VehicleBody, VehicleHealth, Wheels};
use crate::config::TowConfig;
use crate::registry::TowRegistry;
use crate::schedules::FIXED_DT;
use crate::towing::TowingSet;

/// Уровень пола headless-сцены (метры)
const FLOOR_Y: f32 = 0.0;
/// Ниже этой дистанции направление троса не определено (метры)
const MIN_SEPARATION: f32 = 1e-4;

/// Вход проекции троса: пара якорей и тел в мировых координатах
#[derive(Debug, Clone)]
pub struct RopePair {
    pub anchor_puller: Vec3,
    pub anchor_towed: Vec3,
    pub puller_velocity: Vec3,
    pub towed_velocity: Vec3,
    pub puller_mass: f32,
    pub towed_mass: f32,
    pub rope_limit: f32,
}

/// Коррекция пары на один тик: сдвиги позиций и дельты скоростей
#[derive(Debug, Clone, PartialEq)]
pub struct RopeCorrection {
    pub puller_shift: Vec3,
    pub towed_shift: Vec3,
    pub puller_velocity_delta: Vec3,
    pub towed_velocity_delta: Vec3,
}

/// Чистый расчёт проекции на предел троса. None = пара в допуске.
///
/// Лёгкое тело уступает больше (сдвиги пропорциональны 1/m), демпфер
/// гасит только разлетающуюся составляющую относительной скорости.
pub fn rope_limit_correction(pair: &RopePair, damper: f32) -> Option<RopeCorrection> {
    let delta = pair.anchor_towed - pair.anchor_puller;
    let dist = delta.length();
    if dist <= pair.rope_limit || dist <= MIN_SEPARATION {
        return None;
    }
    let dir = delta / dist; // от якоря тягача к якорю буксируемой
    let excess = dist - pair.rope_limit;

    let w_puller = inverse_mass(pair.puller_mass);
    let w_towed = inverse_mass(pair.towed_mass);
    let w_sum = w_puller + w_towed;
    if w_sum <= 0.0 {
        return None;
    }

    let puller_shift = dir * (excess * w_puller / w_sum);
    let towed_shift = -dir * (excess * w_towed / w_sum);

    // Разлетающаяся скорость вдоль троса
    let separating = (pair.towed_velocity - pair.puller_velocity).dot(dir);
    let (puller_velocity_delta, towed_velocity_delta) = if separating > 0.0 {
        let damp = (damper * FIXED_DT).min(1.0);
        let impulse = separating * damp / w_sum;
        (dir * (impulse * w_puller), -dir * (impulse * w_towed))
    } else {
        (Vec3::ZERO, Vec3::ZERO)
    };

    Some(RopeCorrection {
        puller_shift,
        towed_shift,
        puller_velocity_delta,
        towed_velocity_delta,
    })
}

fn inverse_mass(mass: f32) -> f32 {
    if mass > 0.0 {
        1.0 / mass
    } else {
        0.0
    }
}

/// System: интеграция сил → скорость → позиция
///
/// Полуявный Эйлер в духе Rapier: сначала силы в скорость, затем
/// демпфирование v /= 1 + dt·d, затем позиция. Ориентация
/// интегрируется только вокруг Y: машины планарны, полной
/// ориентации headless-прогону не нужно.
///
/// Сила — заказ на один тик: после интеграции обнуляется, ассист
/// перезапишет её в следующем.
pub fn integrate_vehicle_forces(
    mut query: Query<
        (
            &VehicleBody,
            &Damping,
            &mut Velocity,
            &mut ExternalForce,
            &mut Transform,
        ),
        With<Vehicle>,
    >,
) {
    for (body, damping, mut velocity, mut force, mut transform) in query.iter_mut() {
        if body.mass > 0.0 {
            velocity.linvel += force.force / body.mass * FIXED_DT;
        }
        if body.yaw_inertia > 0.0 {
            velocity.angvel.y += force.torque.y / body.yaw_inertia * FIXED_DT;
        }

        let linear = 1.0 + FIXED_DT * damping.linear_damping;
        let angular = 1.0 + FIXED_DT * damping.angular_damping;
        velocity.linvel /= linear;
        velocity.angvel.y /= angular;

        transform.translation += velocity.linvel * FIXED_DT;
        transform.rotate_y(velocity.angvel.y * FIXED_DT);

        // Плоский пол: прижимная сила ассиста не должна топить машину
        if transform.translation.y < FLOOR_Y {
            transform.translation.y = FLOOR_Y;
            velocity.linvel.y = velocity.linvel.y.max(0.0);
        }

        force.force = Vec3::ZERO;
        force.torque = Vec3::ZERO;
    }
}

/// System: жёсткая граница троса
///
/// В полном Rapier её держит джойнт; здесь пара проецируется обратно
/// в допустимую дистанцию после интеграции. Сам rope_limit системе
/// не принадлежит: удлинение и отцеп решает sweep.
pub fn enforce_rope_limits(
    registry: Res<TowRegistry>,
    config: Res<TowConfig>,
    bodies: Query<&VehicleBody>,
    mut movers: Query<(&mut Transform, &mut Velocity), With<Vehicle>>,
) {
    for link in registry.links() {
        let (Ok(puller_body), Ok(towed_body)) =
            (bodies.get(link.puller), bodies.get(link.towed))
        else {
            continue;
        };
        let Ok([(mut puller_tf, mut puller_vel), (mut towed_tf, mut towed_vel)]) =
            movers.get_many_mut([link.puller, link.towed])
        else {
            continue;
        };

        let pair = RopePair {
            anchor_puller: puller_tf.transform_point(link.anchor_puller_local),
            anchor_towed: towed_tf.transform_point(link.anchor_towed_local),
            puller_velocity: puller_vel.linvel,
            towed_velocity: towed_vel.linvel,
            puller_mass: puller_body.mass,
            towed_mass: towed_body.mass,
            rope_limit: link.rope_limit,
        };
        let Some(correction) = rope_limit_correction(&pair, config.rope_damper) else {
            continue;
        };

        puller_tf.translation += correction.puller_shift;
        towed_tf.translation += correction.towed_shift;
        puller_vel.linvel += correction.puller_velocity_delta;
        towed_vel.linvel += correction.towed_velocity_delta;
    }
}

/// Plugin headless-интеграции
///
/// Системы ставятся ПОСЛЕ TowingSet: сначала буксировочная логика
/// пишет силы и rope_limit текущего тика, потом интегратор их
/// расходует, потом трос дожимает позиции.
pub struct HeadlessVehiclePlugin;

impl Plugin for HeadlessVehiclePlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            FixedUpdate,
            (integrate_vehicle_forces, enforce_rope_limits)
                .chain() // Последовательное выполнение
                .after(TowingSet),
        );
    }
}

/// Spawn helper для машины с полным набором компонентов:
/// - Transform
/// - Vehicle + VehicleBody + Wheels + VehicleHealth + Occupants
/// - Rapier: RigidBody::Dynamic + Collider + Velocity + Damping +
///   ExternalForce + Sleeping + AdditionalMassProperties
///
/// Масса твёрдого тела зажата равной VehicleBody.mass: headless-расчёты
/// и солвер Rapier обязаны сходиться на одной массе.
pub fn spawn_tow_vehicle(commands: &mut Commands, position: Vec3) -> Entity {
    let body = VehicleBody::default();
    commands
        .spawn((
            Transform::from_translation(position),
            Vehicle,
            body,
            Wheels::standard_four(),
            VehicleHealth::default(),
            Occupants::default(),
            RigidBody::Dynamic,
            Collider::cuboid(1.0, 0.6, 2.2), // седан: 2x1.2x4.4 м
            AdditionalMassProperties::Mass(body.mass),
            Velocity::default(),
            Damping {
                linear_damping: 0.05,
                angular_damping: 0.05,
            },
            ExternalForce::default(),
            Sleeping::default(),
        ))
        .id()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_at(dist: f32, rope_limit: f32) -> RopePair {
        RopePair {
            anchor_puller: Vec3::ZERO,
            anchor_towed: Vec3::new(0.0, 0.0, dist),
            puller_velocity: Vec3::ZERO,
            towed_velocity: Vec3::ZERO,
            puller_mass: 1200.0,
            towed_mass: 1200.0,
            rope_limit,
        }
    }

    #[test]
    fn pair_within_limit_is_untouched() {
        assert!(rope_limit_correction(&pair_at(3.0, 6.5), 90.0).is_none());
    }

    #[test]
    fn equal_masses_split_excess_evenly() {
        // 7.5 при пределе 6.5: перебор 1.0, по 0.5 на каждого
        let correction = rope_limit_correction(&pair_at(7.5, 6.5), 90.0).unwrap();
        assert!((correction.puller_shift.z - 0.5).abs() < 1e-5);
        assert!((correction.towed_shift.z + 0.5).abs() < 1e-5);
        // Скорости нулевые: нечего демпфировать
        assert_eq!(correction.puller_velocity_delta, Vec3::ZERO);
        assert_eq!(correction.towed_velocity_delta, Vec3::ZERO);
    }

    #[test]
    fn heavier_body_yields_less() {
        let mut pair = pair_at(7.5, 6.5);
        pair.puller_mass = 3600.0; // втрое тяжелее
        let correction = rope_limit_correction(&pair, 90.0).unwrap();
        // Сдвиги обратно пропорциональны массам: 0.25 против 0.75
        assert!((correction.puller_shift.z - 0.25).abs() < 1e-5);
        assert!((correction.towed_shift.z + 0.75).abs() < 1e-5);
    }

    #[test]
    fn damper_kills_separating_velocity() {
        let mut pair = pair_at(7.5, 6.5);
        // Буксируемая разлетается на 2 м/с
        pair.towed_velocity = Vec3::new(0.0, 0.0, 2.0);
        // damper 90 при 60Hz даёт damp = 1.0: гасим полностью
        let correction = rope_limit_correction(&pair, 90.0).unwrap();
        let towed_after = pair.towed_velocity + correction.towed_velocity_delta;
        let puller_after = pair.puller_velocity + correction.puller_velocity_delta;
        let separating = (towed_after - puller_after).dot(Vec3::Z);
        assert!(separating.abs() < 1e-4);
    }

    #[test]
    fn closing_velocity_is_not_damped() {
        let mut pair = pair_at(7.5, 6.5);
        // Пара уже сближается: демпфер молчит
        pair.towed_velocity = Vec3::new(0.0, 0.0, -2.0);
        let correction = rope_limit_correction(&pair, 90.0).unwrap();
        assert_eq!(correction.towed_velocity_delta, Vec3::ZERO);
        assert_eq!(correction.puller_velocity_delta, Vec3::ZERO);
    }

    #[test]
    fn force_integration_math() {
        // Логика интегратора напрямую (без App schedule):
        // 1200 Н на 1200 кг = 1 м/с², за тик +FIXED_DT м/с до демпфера
        let body = VehicleBody::default();
        let force = Vec3::new(0.0, 0.0, 1200.0);
        let mut linvel = Vec3::ZERO;

        linvel += force / body.mass * FIXED_DT;
        let expected = FIXED_DT;
        assert!((linvel.z - expected).abs() < 1e-6);

        // Демпфирование 0.05: v /= 1 + dt·0.05
        linvel /= 1.0 + FIXED_DT * 0.05;
        assert!(linvel.z < expected);
        assert!(linvel.z > expected * 0.99);
    }
}
