//! Health-монитор связок (HealthSweep, каждые 0.25 с)
//!
//! Обход снимка реестра: валидность машин → пропавший джойнт →
//! авто-удлинение → авто-отцеп по дистанции → поддержание ослабленных
//! тормозов. Монитор сам ничего не демонтирует: любая смерть связки
//! оформляется ReleaseRequest и уходит в общий дренаж.
//!
//! Разрыв от физики (JointSnapped) обрабатывается отдельной системой
//! каждый тик: четверть секунды ожидания для лопнувшего троса — много.

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::components::{Operator, Vehicle, VehicleHealth, Wheels};
use crate::config::TowConfig;
use crate::logger::log;
use crate::registry::{SelectionState, TowRegistry};
use crate::schedules::HEALTH_SWEEP_INTERVAL;
use crate::towing::events::{JointSnapped, ReleaseReason, ReleaseRequest};
use crate::towing::installer::rope_joint;

/// Решение по дистанции за один sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SeparationVerdict {
    /// Some = трос удлинить до этого значения
    pub new_rope_limit: Option<f32>,
    /// Машины разошлись за буфер, связку снять
    pub release: bool,
}

/// Чистое решение: удлинить и/или отцепить.
///
/// Порядок принципиален: сначала удлинение, потом проверка отцепа
/// уже от НОВОГО лимита. Пока трос может расти, буферный порог растёт
/// вместе с ним, и отцеп не успевает раньше удлинения.
pub fn evaluate_separation(
    config: &TowConfig,
    rope_limit: f32,
    separation: f32,
    interval: f32,
) -> SeparationVerdict {
    let mut limit = rope_limit;
    let mut new_rope_limit = None;

    if config.auto_extend_when_taut
        && limit < config.rope_length_max
        && separation > limit * config.extend_at_fraction
    {
        let extended = (limit + config.auto_extend_rate * interval).min(config.rope_length_max);
        if extended > limit {
            limit = extended;
            new_rope_limit = Some(extended);
        }
    }

    let release_bound = config
        .max_separation_floor
        .max(limit * (1.0 + config.release_buffer_fraction))
        .max(limit + config.release_buffer_min);

    SeparationVerdict {
        new_rope_limit,
        release: separation > release_bound,
    }
}

/// System: разрыв джойнта физикой (FixedUpdate, каждый тик)
pub fn process_joint_breaks(
    mut snapped: EventReader<JointSnapped>,
    registry: Res<TowRegistry>,
    config: Res<TowConfig>,
    mut releases: EventWriter<ReleaseRequest>,
) {
    for event in snapped.read() {
        // Чужой джойнт или связка уже снята — не наше
        let Some(puller) = registry.puller_of(event.towed) else {
            continue;
        };
        if config.debug_log {
            log(&format!(
                "tow: joint snapped on {:?} (force {:.0})",
                event.towed, event.force
            ));
        }
        releases.write(ReleaseRequest {
            puller,
            reason: ReleaseReason::StrapBroke,
        });
    }
}

/// System: обход связок (внутри HealthSweep schedule)
pub fn run_health_sweep(
    mut registry: ResMut<TowRegistry>,
    config: Res<TowConfig>,
    mut commands: Commands,
    transforms: Query<&Transform>,
    health: Query<&VehicleHealth>,
    joints: Query<&ImpulseJoint>,
    mut wheels: Query<&mut Wheels>,
    mut selections: ResMut<SelectionState>,
    vehicles: Query<(), With<Vehicle>>,
    operators: Query<(), With<Operator>>,
    mut releases: EventWriter<ReleaseRequest>,
) {
    // Снимок ключей: по ходу обхода реестр мутируется
    for puller in registry.pullers() {
        let Some(link) = registry.get(puller) else {
            continue;
        };
        let link = link.clone();

        // Машина исчезла или добита
        let vehicles_valid = transforms.get(link.puller).is_ok()
            && transforms.get(link.towed).is_ok()
            && [link.puller, link.towed].into_iter().all(|v| {
                health.get(v).map(|h| h.current > 0.0).unwrap_or(true)
            });
        if !vehicles_valid {
            releases.write(ReleaseRequest {
                puller,
                reason: ReleaseReason::VehicleDestroyed,
            });
            continue;
        }

        // Джойнт пропал без JointSnapped: внешний слой разрушил его молча
        if joints.get(link.towed).is_err() {
            releases.write(ReleaseRequest {
                puller,
                reason: ReleaseReason::StrapBroke,
            });
            continue;
        }

        let anchor_puller = match transforms.get(link.puller) {
            Ok(tf) => tf.transform_point(link.anchor_puller_local),
            Err(_) => continue,
        };
        let anchor_towed = match transforms.get(link.towed) {
            Ok(tf) => tf.transform_point(link.anchor_towed_local),
            Err(_) => continue,
        };
        let separation = anchor_puller.distance(anchor_towed);

        let verdict = evaluate_separation(&config, link.rope_limit, separation, HEALTH_SWEEP_INTERVAL);

        if let Some(new_limit) = verdict.new_rope_limit {
            if let Some(live) = registry.get_mut(puller) {
                live.rope_limit = new_limit;
                // Длина зашита в данные джойнта: пересобираем компонент
                if let Ok(mut towed_commands) = commands.get_entity(live.towed) {
                    towed_commands.insert(rope_joint(live));
                }
            }
            if config.debug_log {
                log(&format!(
                    "tow: rope extended to {new_limit:.2} for {puller:?} (separation {separation:.2})"
                ));
            }
        }

        if verdict.release {
            releases.write(ReleaseRequest {
                puller,
                reason: ReleaseReason::TooFarApart,
            });
            continue;
        }

        // Внешние системы могли вернуть тормоза — поджимаем заново
        if config.persist_brake_ease && config.ease_towed_brakes {
            if let Ok(mut towed_wheels) = wheels.get_mut(link.towed) {
                for wheel in towed_wheels.0.iter_mut().filter(|w| w.enabled) {
                    wheel.brake_torque = wheel.brake_torque.min(config.towed_brake_torque);
                }
            }
        }
    }

    // Осиротевшие выборы: оператор вышел или тягач исчез
    selections.retain(|operator, selection| {
        operators.contains(operator) && vehicles.contains(selection.puller)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_limit_nothing_happens() {
        let config = TowConfig::default();
        let verdict = evaluate_separation(&config, 6.5, 6.2, 0.25);
        // Потолок достигнут, удлинять некуда; 6.2 < буфера отцепа
        assert_eq!(verdict.new_rope_limit, None);
        assert!(!verdict.release);
    }

    #[test]
    fn taut_rope_pays_out() {
        let config = TowConfig::default();
        // 2.8 > 3.0·0.9: растём на rate·interval = 0.25
        let verdict = evaluate_separation(&config, 3.0, 2.8, 0.25);
        assert_eq!(verdict.new_rope_limit, Some(3.25));
        assert!(!verdict.release);
    }

    #[test]
    fn extension_caps_at_ceiling() {
        let config = TowConfig::default();
        let verdict = evaluate_separation(&config, 6.4, 6.3, 0.25);
        assert_eq!(verdict.new_rope_limit, Some(6.5));

        // С потолка уже не растём
        let verdict = evaluate_separation(&config, 6.5, 6.4, 0.25);
        assert_eq!(verdict.new_rope_limit, None);
    }

    #[test]
    fn extension_fires_before_release() {
        let mut config = TowConfig::default();
        config.max_separation_floor = 0.5;
        // Вся зона между порогом удлинения (0.9·L) и буфером отцепа
        // (L + max(0.2·L, 1.5)): связка растёт, но живёт
        let verdict = evaluate_separation(&config, 4.0, 4.5, 0.25);
        assert_eq!(verdict.new_rope_limit, Some(4.25));
        assert!(!verdict.release);
    }

    #[test]
    fn runaway_separation_releases() {
        let mut config = TowConfig::default();
        config.auto_extend_when_taut = false;
        config.max_separation_floor = 5.0;
        // 9 > max(5.0, 6.5·1.2, 6.5+1.5) = 8.0
        let verdict = evaluate_separation(&config, 6.5, 9.0, 0.25);
        assert_eq!(verdict.new_rope_limit, None);
        assert!(verdict.release);
    }

    #[test]
    fn separation_floor_shields_short_ropes() {
        let config = TowConfig::default(); // floor 18
        // Короткий трос, дистанция большая, но ниже floor — живём
        let verdict = evaluate_separation(&config, 2.5, 12.0, 0.25);
        assert!(!verdict.release);

        let verdict = evaluate_separation(&config, 2.5, 18.1, 0.25);
        assert!(verdict.release);
    }

    #[test]
    fn extended_limit_raises_release_bound() {
        let mut config = TowConfig::default();
        config.max_separation_floor = 0.5;
        config.rope_length_max = 100.0;
        // Лимит 10, дистанция 11.9: удлинение до 10.25 поднимает буфер
        // до 12.3 — отцеп не срабатывает
        let verdict = evaluate_separation(&config, 10.0, 11.9, 0.25);
        assert_eq!(verdict.new_rope_limit, Some(10.25));
        assert!(!verdict.release);

        // А вот 12.5 уже за буфером даже после удлинения
        let verdict = evaluate_separation(&config, 10.0, 12.5, 0.25);
        assert_eq!(verdict.new_rope_limit, Some(10.25));
        assert!(verdict.release);
    }

    #[test]
    fn limit_never_decreases() {
        let config = TowConfig::default();
        for (limit, separation) in [(2.5, 0.1), (3.0, 2.9), (6.5, 6.5), (6.5, 30.0)] {
            let verdict = evaluate_separation(&config, limit, separation, 0.25);
            if let Some(new_limit) = verdict.new_rope_limit {
                assert!(new_limit > limit);
                assert!(new_limit <= config.rope_length_max);
            }
        }
    }
}
