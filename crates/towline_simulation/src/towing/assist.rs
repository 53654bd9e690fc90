//! Стабилизирующий ассист (каждый фиксированный тик)
//!
//! Замкнутый контур на каждую связку: подтягивание буксируемой вдоль
//! троса (PD по растяжению и относительной скорости), выравнивание её
//! курса за тягачом (PD по углу и yaw rate) и прижимная сила в точке
//! крепления. Чистый расчёт отделён от применения: compute_assist
//! считает ускорения/момент, система переводит их в силы через массу.
//!
//! Инвариант безопасности: каждый выход ограничен своим капом из
//! конфига при ЛЮБЫХ входах. Энергия не может разгоняться бесконтрольно.

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::components::VehicleBody;
use crate::config::TowConfig;
use crate::registry::TowRegistry;

/// Ниже этой дистанции якорей коррекция не считается (метры)
const MIN_SEPARATION: f32 = 1e-3;
/// Квадрат минимальной планарной длины: короче — трос почти вертикален
const MIN_PLANAR_SQ: f32 = 1e-6;

/// Кинематика связки на текущий тик (всё в мировых координатах)
#[derive(Debug, Clone)]
pub struct LinkKinematics {
    pub anchor_puller_world: Vec3,
    pub anchor_towed_world: Vec3,
    pub puller_velocity: Vec3,
    pub towed_velocity: Vec3,
    /// Мировой forward буксируемой
    pub towed_forward: Vec3,
    /// Угловая скорость буксируемой вокруг Y (рад/с)
    pub towed_yaw_rate: f32,
    /// Момент инерции буксируемой вокруг Y (кг·м²)
    pub towed_yaw_inertia: f32,
    pub rope_limit: f32,
}

/// Коррекция на один тик. Ускорения в м/с², момент в Н·м, сила в Н.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistOutput {
    /// Планарное ускорение буксируемой к тягачу, |…| ≤ assist_max_towed_accel
    pub towed_accel: Vec3,
    /// Обратная реакция тягача, |…| ≤ assist_max_puller_accel
    pub puller_accel: Vec3,
    /// Момент вокруг Y на буксируемую, |…| ≤ align_yaw_max_torque
    pub yaw_torque: f32,
    /// Прижимная сила вниз в точке якоря буксируемой (0 или align_downforce_n)
    pub downforce: f32,
}

/// Расчёт коррекции. None = в этом тике делать нечего
/// (провисший трос, вырожденная геометрия или нулевые выходы).
pub fn compute_assist(config: &TowConfig, k: &LinkKinematics) -> Option<AssistOutput> {
    // Главный тумблер: выключенный ассист глушит весь контур,
    // выравнивание и прижим включительно
    if !config.assist_when_taut {
        return None;
    }
    let delta = k.anchor_puller_world - k.anchor_towed_world;
    let d = delta.length();
    if d <= MIN_SEPARATION || k.rope_limit <= 0.0 {
        return None;
    }
    // Провисший трос: до порога натяга не трогаем машины вовсе
    if d / k.rope_limit < config.assist_threshold {
        return None;
    }

    // Планарное направление от буксируемой к тягачу. Вертикальная
    // составляющая отброшена: тянуть вверх = подбрасывать нос.
    let planar = Vec3::new(delta.x, 0.0, delta.z);
    if planar.length_squared() < MIN_PLANAR_SQ {
        return None;
    }
    let dir = planar / planar.length();

    // === Тяга вдоль троса ===
    let mut towed_accel = Vec3::ZERO;
    let mut puller_accel = Vec3::ZERO;
    let stretch = (d - k.rope_limit).max(0.0);
    let rel_vel_along = (k.puller_velocity - k.towed_velocity).dot(dir);
    let desired = config.assist_kp * stretch + config.assist_kd * rel_vel_along;
    if desired > 0.0 {
        // Гейт от тарана: буксируемую, уже летящую к тягачу, не разгоняем
        if k.towed_velocity.dot(dir) < config.assist_max_towed_speed {
            towed_accel = dir * desired.min(config.assist_max_towed_accel);
        }
        // Реакция тягача: доля полного (нестриженого) PD со своим капом;
        // гейт скорости буксируемой реакцию не трогает
        let reaction =
            (desired * config.assist_puller_share).min(config.assist_max_puller_accel);
        puller_accel = -dir * reaction;
    }

    // === Выравнивание за тягачом ===
    let mut yaw_torque = 0.0;
    let mut downforce = 0.0;
    if config.align_yaw_when_taut {
        let combined_speed_sq =
            k.puller_velocity.length_squared() + k.towed_velocity.length_squared();
        if combined_speed_sq > config.align_min_speed * config.align_min_speed {
            let forward_planar = Vec3::new(k.towed_forward.x, 0.0, k.towed_forward.z);
            if forward_planar.length_squared() >= MIN_PLANAR_SQ {
                let forward = forward_planar / forward_planar.length();
                let angle = signed_yaw_angle(forward, dir);
                let desired_yaw_accel = config.align_yaw_kp * angle - config.align_yaw_kd * k.towed_yaw_rate;
                yaw_torque = (k.towed_yaw_inertia * desired_yaw_accel)
                    .clamp(-config.align_yaw_max_torque, config.align_yaw_max_torque);
                downforce = config.align_downforce_n;
            }
        }
    }

    if towed_accel == Vec3::ZERO
        && puller_accel == Vec3::ZERO
        && yaw_torque == 0.0
        && downforce == 0.0
    {
        return None;
    }
    Some(AssistOutput {
        towed_accel,
        puller_accel,
        yaw_torque,
        downforce,
    })
}

/// Знаковый угол поворота вокруг Y от `from` к `to` (планарные векторы).
/// Положительный = против часовой, если смотреть сверху (+Y).
fn signed_yaw_angle(from: Vec3, to: Vec3) -> f32 {
    let cross_y = from.z * to.x - from.x * to.z;
    let dot = from.x * to.x + from.z * to.z;
    cross_y.atan2(dot)
}

/// System: применение коррекций ко всем живым связкам
///
/// ExternalForce связанных машин каждый тик ПЕРЕЗАПИСЫВАЕТСЯ текущей
/// коррекцией (не накапливается): сила из прошлого тика не должна
/// жить дольше тика. При отцепе release-путь зануляет её финально.
pub fn apply_stabilization_assist(
    registry: Res<TowRegistry>,
    config: Res<TowConfig>,
    transforms: Query<&Transform>,
    velocities: Query<&Velocity>,
    bodies: Query<&VehicleBody>,
    mut forces: Query<&mut ExternalForce>,
    mut sleeping: Query<&mut Sleeping>,
) {
    for link in registry.links() {
        let (Ok(puller_tf), Ok(towed_tf)) =
            (transforms.get(link.puller), transforms.get(link.towed))
        else {
            continue; // мёртвые машины снимет sweep
        };
        let (Ok(puller_vel), Ok(towed_vel)) =
            (velocities.get(link.puller), velocities.get(link.towed))
        else {
            continue;
        };
        let Ok(towed_body) = bodies.get(link.towed) else {
            continue;
        };

        let anchor_towed_world = towed_tf.transform_point(link.anchor_towed_local);
        let kinematics = LinkKinematics {
            anchor_puller_world: puller_tf.transform_point(link.anchor_puller_local),
            anchor_towed_world,
            puller_velocity: puller_vel.linvel,
            towed_velocity: towed_vel.linvel,
            towed_forward: *towed_tf.forward(),
            towed_yaw_rate: towed_vel.angvel.y,
            towed_yaw_inertia: towed_body.yaw_inertia,
            rope_limit: link.rope_limit,
        };

        let Some(assist) = compute_assist(&config, &kinematics) else {
            // Нет коррекции — сбросить свою силу с прошлого тика
            zero_force(&mut forces, link.puller);
            zero_force(&mut forces, link.towed);
            continue;
        };

        if let Ok(mut force) = forces.get_mut(link.towed) {
            force.force = assist.towed_accel * towed_body.mass;
            force.torque = Vec3::Y * assist.yaw_torque;
            if assist.downforce > 0.0 {
                let down = ExternalForce::at_point(
                    Vec3::NEG_Y * assist.downforce,
                    anchor_towed_world,
                    towed_tf.translation,
                );
                force.force += down.force;
                force.torque += down.torque;
            }
        }
        if let Ok(mut force) = forces.get_mut(link.puller) {
            let puller_mass = bodies.get(link.puller).map(|b| b.mass).unwrap_or(0.0);
            force.force = assist.puller_accel * puller_mass;
            force.torque = Vec3::ZERO;
        }

        // Спящие тела коррекцию не почувствуют
        for vehicle in [link.puller, link.towed] {
            if let Ok(mut s) = sleeping.get_mut(vehicle) {
                s.sleeping = false;
            }
        }
    }
}

fn zero_force(forces: &mut Query<&mut ExternalForce>, vehicle: Entity) {
    if let Ok(mut force) = forces.get_mut(vehicle) {
        force.force = Vec3::ZERO;
        force.torque = Vec3::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taut_kinematics() -> LinkKinematics {
        // Тягач в 6 м впереди буксируемой (по -Z), трос 6.5: натяг 92%
        LinkKinematics {
            anchor_puller_world: Vec3::new(0.0, 0.5, -6.0),
            anchor_towed_world: Vec3::new(0.0, 0.5, 0.0),
            puller_velocity: Vec3::ZERO,
            towed_velocity: Vec3::ZERO,
            towed_forward: Vec3::NEG_Z,
            towed_yaw_rate: 0.0,
            towed_yaw_inertia: 2000.0,
            rope_limit: 6.5,
        }
    }

    #[test]
    fn slack_rope_gives_no_assist() {
        let config = TowConfig::default();
        let mut k = taut_kinematics();
        // 3 м из 6.5 — 46%, ниже порога 70%
        k.anchor_puller_world = Vec3::new(0.0, 0.5, -3.0);
        assert!(compute_assist(&config, &k).is_none());
    }

    #[test]
    fn stationary_taut_rope_is_quiet() {
        // Натянут, но не растянут, все скорости нулевые: выходов нет
        let config = TowConfig::default();
        assert!(compute_assist(&config, &taut_kinematics()).is_none());
    }

    #[test]
    fn separating_pair_gets_pd_pull() {
        let config = TowConfig::default();
        let mut k = taut_kinematics();
        // Растяжение 1.5 м, тягач уходит на 1 м/с
        k.anchor_puller_world = Vec3::new(0.0, 0.5, -8.0);
        k.puller_velocity = Vec3::new(0.0, 0.0, -1.0);

        let out = compute_assist(&config, &k).unwrap();
        // kp·1.5 + kd·1.0 = 5·1.5 + 3·1 = 10.5, под капом 14
        assert!((out.towed_accel.length() - 10.5).abs() < 1e-4);
        // Тяга к тягачу: -Z
        assert!(out.towed_accel.z < 0.0);
        // Реакция тягача: доля 0.5 → 5.25, кап 6 не сработал
        assert!((out.puller_accel.length() - 5.25).abs() < 1e-4);
        assert!(out.puller_accel.z > 0.0);
    }

    #[test]
    fn outputs_never_exceed_caps() {
        let config = TowConfig::default();
        let mut k = taut_kinematics();
        // Экстремальные входы: разрыв 100 м, скорости по 80 м/с
        k.anchor_puller_world = Vec3::new(60.0, 0.5, -80.0);
        k.puller_velocity = Vec3::new(50.0, 0.0, -60.0);
        k.towed_velocity = Vec3::new(-40.0, 0.0, 30.0);
        k.towed_forward = Vec3::X;
        k.towed_yaw_rate = -20.0;

        let out = compute_assist(&config, &k).unwrap();
        assert!(out.towed_accel.length() <= config.assist_max_towed_accel + 1e-4);
        assert!(out.puller_accel.length() <= config.assist_max_puller_accel + 1e-4);
        assert!(out.yaw_torque.abs() <= config.align_yaw_max_torque + 1e-4);
        assert!(out.downforce <= config.align_downforce_n);
    }

    #[test]
    fn ramming_towed_keeps_puller_braking() {
        let config = TowConfig::default();
        let mut k = taut_kinematics();
        k.anchor_puller_world = Vec3::new(0.0, 0.5, -8.0);
        // Тягач удирает на 25 м/с, буксируемая летит к нему на 19 м/с
        k.puller_velocity = Vec3::new(0.0, 0.0, -25.0);
        k.towed_velocity = Vec3::new(0.0, 0.0, -19.0);

        let out = compute_assist(&config, &k).unwrap();
        // Быстрее порога 18: буксируемую не разгоняем
        assert_eq!(out.towed_accel, Vec3::ZERO);
        // Но тягач тормозим долей полного PD:
        // aDes = 5·1.5 + 3·6 = 25.5 → min(25.5·0.5, кап 6) = 6
        assert!((out.puller_accel.length() - 6.0).abs() < 1e-4);
        assert!(out.puller_accel.z > 0.0);
    }

    #[test]
    fn closing_pair_gets_no_tension_pull() {
        let config = TowConfig::default();
        let mut k = taut_kinematics();
        k.anchor_puller_world = Vec3::new(0.0, 0.5, -8.0);
        // Пара сближается: PD уходит в минус, тяги нет ни на одну машину
        k.towed_velocity = Vec3::new(0.0, 0.0, -19.0);

        if let Some(out) = compute_assist(&config, &k) {
            assert_eq!(out.towed_accel, Vec3::ZERO);
            assert_eq!(out.puller_accel, Vec3::ZERO);
        }
    }

    #[test]
    fn near_vertical_rope_is_skipped() {
        let config = TowConfig::default();
        let mut k = taut_kinematics();
        // Тягач ровно над буксируемой (кран поднял)
        k.anchor_puller_world = Vec3::new(0.0, 6.2, 0.0);
        assert!(compute_assist(&config, &k).is_none());
    }

    #[test]
    fn yaw_torque_steers_toward_rope() {
        let config = TowConfig::default();
        let mut k = taut_kinematics();
        // Буксируемую развернуло боком: forward +X, трос на -Z.
        // Скорости достаточно для гейта.
        k.towed_forward = Vec3::X;
        k.puller_velocity = Vec3::new(0.0, 0.0, -5.0);

        let out = compute_assist(&config, &k).unwrap();
        // +X → -Z требует положительного поворота: atan2 = +π/2,
        // inertia·kp·angle = 2000·2.8·1.5708 ≈ 8796 → кламп 8000
        assert!((out.yaw_torque - config.align_yaw_max_torque).abs() < 1e-3);
        assert_eq!(out.downforce, config.align_downforce_n);
    }

    #[test]
    fn yaw_damping_opposes_spin() {
        let config = TowConfig::default();
        let mut k = taut_kinematics();
        // Курс совпадает с тросом, но машину крутит: чистое демпфирование
        k.puller_velocity = Vec3::new(0.0, 0.0, -5.0);
        k.towed_yaw_rate = 1.0;

        let out = compute_assist(&config, &k).unwrap();
        // -kd·rate·inertia = -0.7·1·2000 = -1400
        assert!((out.yaw_torque + 1400.0).abs() < 1e-2);
    }

    #[test]
    fn assist_toggle_gates_the_whole_tick() {
        // Главный тумблер: без него молчит и выравнивание с прижимом
        let mut config = TowConfig::default();
        config.assist_when_taut = false;

        let mut k = taut_kinematics();
        k.anchor_puller_world = Vec3::new(0.0, 0.5, -9.0);
        k.towed_forward = Vec3::X; // курс поперёк троса
        k.puller_velocity = Vec3::new(0.0, 0.0, -10.0);
        assert!(compute_assist(&config, &k).is_none());
    }

    #[test]
    fn yaw_toggle_disables_only_alignment() {
        let mut config = TowConfig::default();
        config.align_yaw_when_taut = false;

        let mut k = taut_kinematics();
        k.anchor_puller_world = Vec3::new(0.0, 0.5, -8.0);
        k.towed_forward = Vec3::X;
        k.puller_velocity = Vec3::new(0.0, 0.0, -1.0);

        let out = compute_assist(&config, &k).unwrap();
        assert!(out.towed_accel.length() > 0.0);
        assert_eq!(out.yaw_torque, 0.0);
        assert_eq!(out.downforce, 0.0);
    }

    #[test]
    fn vertical_speed_feeds_the_yaw_gate() {
        let config = TowConfig::default();
        let mut k = taut_kinematics();
        // Планарные скорости нулевые, пара съезжает по склону:
        // гейт считает полную скорость, выравнивание работает
        k.towed_forward = Vec3::X;
        k.puller_velocity = Vec3::new(0.0, -4.0, 0.0);

        let out = compute_assist(&config, &k).unwrap();
        assert!((out.yaw_torque - config.align_yaw_max_torque).abs() < 1e-3);
        assert_eq!(out.downforce, config.align_downforce_n);
    }
}
