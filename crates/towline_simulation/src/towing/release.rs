//! Отцеп связки
//!
//! Единственная точка демонтажа. Все источники (ручной клик, sweep,
//! разрыв джойнта, гибель машины, shutdown) пишут ReleaseRequest;
//! дренаж снимает связку ровно один раз: запрос по уже снятой связке —
//! no-op, потому что реестр пуст.
//!
//! Порядок демонтажа: эффекты (midpoint ещё жив) → джойнт → снимок
//! параметров → событие LinkReleased.

use bevy::app::AppExit;
use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::components::{Occupants, Wheels};
use crate::config::TowConfig;
use crate::logger::{log, log_warning};
use crate::registry::{TowLink, TowRegistry};
use crate::towing::events::{
    CrewMessage, EffectRequest, LinkReleased, ReleaseReason, ReleaseRequest,
};
use crate::towing::installer::{collect_drivers, link_midpoint};

/// System: дренаж запросов на отцеп (FixedUpdate, до ассиста)
///
/// Инвариант: после дренажа ни одна снятая связка не получит
/// PD-коррекцию в этом же тике.
pub fn process_release_requests(
    mut requests: EventReader<ReleaseRequest>,
    mut registry: ResMut<TowRegistry>,
    config: Res<TowConfig>,
    mut commands: Commands,
    transforms: Query<&Transform>,
    occupants: Query<&Occupants>,
    mut damping: Query<&mut Damping>,
    mut wheels: Query<&mut Wheels>,
    mut forces: Query<&mut ExternalForce>,
    mut sleeping: Query<&mut Sleeping>,
    mut released: EventWriter<LinkReleased>,
    mut crew: EventWriter<CrewMessage>,
    mut effects: EventWriter<EffectRequest>,
) {
    for request in requests.read() {
        // Идемпотентность: второй запрос этого тика находит пустой реестр
        let Some(link) = registry.remove(request.puller) else {
            continue;
        };
        teardown_link(
            &link,
            request.reason,
            &config,
            &mut commands,
            &transforms,
            &occupants,
            &mut damping,
            &mut wheels,
            &mut forces,
            &mut sleeping,
            &mut released,
            &mut crew,
            &mut effects,
        );
    }
}

/// System: снятие всех связок при выходе (Update)
///
/// Прямой демонтаж, не через ReleaseRequest: после AppExit очередного
/// FixedUpdate может не случиться.
pub fn release_links_on_exit(
    mut exits: EventReader<AppExit>,
    mut registry: ResMut<TowRegistry>,
    config: Res<TowConfig>,
    mut commands: Commands,
    transforms: Query<&Transform>,
    occupants: Query<&Occupants>,
    mut damping: Query<&mut Damping>,
    mut wheels: Query<&mut Wheels>,
    mut forces: Query<&mut ExternalForce>,
    mut sleeping: Query<&mut Sleeping>,
    mut released: EventWriter<LinkReleased>,
    mut crew: EventWriter<CrewMessage>,
    mut effects: EventWriter<EffectRequest>,
) {
    if exits.read().next().is_none() {
        return;
    }
    for puller in registry.pullers() {
        let Some(link) = registry.remove(puller) else {
            continue;
        };
        teardown_link(
            &link,
            ReleaseReason::Shutdown,
            &config,
            &mut commands,
            &transforms,
            &occupants,
            &mut damping,
            &mut wheels,
            &mut forces,
            &mut sleeping,
            &mut released,
            &mut crew,
            &mut effects,
        );
    }
}

/// Запросить отцеп всех связок (embedder API, graceful shutdown)
pub fn request_release_all(world: &mut World) {
    let pullers = world.resource::<TowRegistry>().pullers();
    for puller in pullers {
        world.send_event(ReleaseRequest {
            puller,
            reason: ReleaseReason::Shutdown,
        });
    }
}

/// Звук для причины отцепа (None = молча)
pub fn sound_for_reason<'a>(config: &'a TowConfig, reason: ReleaseReason) -> Option<&'a str> {
    match reason {
        ReleaseReason::Manual | ReleaseReason::TooFarApart => config
            .play_sound_on_release
            .then_some(config.sound_on_release.as_str()),
        ReleaseReason::StrapBroke => config
            .play_sound_on_break
            .then_some(config.sound_on_break.as_str()),
        ReleaseReason::VehicleDestroyed | ReleaseReason::Shutdown => None,
    }
}

/// Текст экипажам для причины отцепа (None = молча)
pub fn crew_text_for_reason(reason: ReleaseReason) -> Option<&'static str> {
    match reason {
        ReleaseReason::Manual => Some("Tow released."),
        ReleaseReason::StrapBroke => Some("Tow strap broke."),
        ReleaseReason::TooFarApart => Some("Vehicles too far apart; tow released."),
        ReleaseReason::VehicleDestroyed | ReleaseReason::Shutdown => None,
    }
}

/// Демонтаж одной связки (реестровая запись уже снята вызывающим)
#[allow(clippy::too_many_arguments)]
fn teardown_link(
    link: &TowLink,
    reason: ReleaseReason,
    config: &TowConfig,
    commands: &mut Commands,
    transforms: &Query<&Transform>,
    occupants: &Query<&Occupants>,
    damping: &mut Query<&mut Damping>,
    wheels: &mut Query<&mut Wheels>,
    forces: &mut Query<&mut ExternalForce>,
    sleeping: &mut Query<&mut Sleeping>,
    released: &mut EventWriter<LinkReleased>,
    crew: &mut EventWriter<CrewMessage>,
    effects: &mut EventWriter<EffectRequest>,
) {
    // Эффекты до демонтажа: midpoint считается по ещё живым transform'ам
    if let Some(path) = sound_for_reason(config, reason) {
        let midpoint = link_midpoint(transforms, link);
        let drivers = collect_drivers(occupants, link.puller, link.towed);
        emit_strap_sound(effects, config, path, midpoint, &drivers);
    }
    if let Some(text) = crew_text_for_reason(reason) {
        crew.write(CrewMessage {
            vehicle: link.puller,
            text: text.to_string(),
        });
        crew.write(CrewMessage {
            vehicle: link.towed,
            text: text.to_string(),
        });
    }

    if let Ok(mut towed_commands) = commands.get_entity(link.towed) {
        towed_commands.remove::<ImpulseJoint>();
    }

    // Последняя коррекция ассиста не должна пережить связку
    for vehicle in [link.puller, link.towed] {
        if let Ok(mut force) = forces.get_mut(vehicle) {
            force.force = Vec3::ZERO;
            force.torque = Vec3::ZERO;
        }
    }

    if let Ok(mut d) = damping.get_mut(link.puller) {
        d.linear_damping = link.snapshot.puller_linear_damping;
    }
    if let Ok(mut d) = damping.get_mut(link.towed) {
        d.linear_damping = link.snapshot.towed_linear_damping;
        d.angular_damping = link.snapshot.towed_angular_damping;
    }

    if let Ok(mut towed_wheels) = wheels.get_mut(link.towed) {
        if towed_wheels.count() == link.snapshot.towed_brake_torque.len() {
            for (wheel, (&brake, &stiffness)) in towed_wheels.0.iter_mut().zip(
                link.snapshot
                    .towed_brake_torque
                    .iter()
                    .zip(link.snapshot.towed_sideways_stiffness.iter()),
            ) {
                wheel.brake_torque = brake;
                wheel.sideways_stiffness = stiffness;
            }
        } else {
            // Колёса меняли во время буксировки: частичное восстановление
            // хуже отсутствия, пропускаем и фиксируем в логе
            log_warning(&format!(
                "tow: wheel count changed on {:?} ({} -> {}), skipping wheel restore",
                link.towed,
                link.snapshot.towed_brake_torque.len(),
                towed_wheels.count()
            ));
        }
    }

    if let Ok(mut s) = sleeping.get_mut(link.towed) {
        s.sleeping = false;
    }

    released.write(LinkReleased {
        puller: link.puller,
        towed: link.towed,
        reason,
    });

    if config.debug_log {
        log(&format!(
            "tow: released {:?} -> {:?} ({})",
            link.puller,
            link.towed,
            reason.as_str()
        ));
    }
}

/// Адресная отправка strap-звука: "drivers" — каждому из экипажей,
/// иначе broadcast в точке (радиус режет тактический слой).
pub(crate) fn emit_strap_sound(
    effects: &mut EventWriter<EffectRequest>,
    config: &TowConfig,
    path: &str,
    position: Vec3,
    drivers: &[Entity],
) {
    if config.sound_audience == "drivers" {
        for &listener in drivers {
            effects.write(EffectRequest {
                path: path.to_string(),
                position,
                only_for: Some(listener),
            });
        }
    } else {
        effects.write(EffectRequest {
            path: path.to_string(),
            position,
            only_for: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn break_reason_picks_break_sound() {
        let config = TowConfig::default();
        assert_eq!(
            sound_for_reason(&config, ReleaseReason::StrapBroke),
            Some("fx/strap_break")
        );
        assert_eq!(
            sound_for_reason(&config, ReleaseReason::Manual),
            Some("fx/strap_release")
        );
        assert_eq!(
            sound_for_reason(&config, ReleaseReason::TooFarApart),
            Some("fx/strap_release")
        );
    }

    #[test]
    fn silent_reasons_have_no_sound_or_text() {
        let config = TowConfig::default();
        for reason in [ReleaseReason::VehicleDestroyed, ReleaseReason::Shutdown] {
            assert_eq!(sound_for_reason(&config, reason), None);
            assert_eq!(crew_text_for_reason(reason), None);
        }
    }

    #[test]
    fn disabled_sounds_mute_release() {
        let mut config = TowConfig::default();
        config.play_sound_on_release = false;
        assert_eq!(sound_for_reason(&config, ReleaseReason::Manual), None);
        // break управляется своим флагом
        assert!(sound_for_reason(&config, ReleaseReason::StrapBroke).is_some());
    }

    #[test]
    fn crew_text_matches_reason() {
        assert_eq!(
            crew_text_for_reason(ReleaseReason::StrapBroke),
            Some("Tow strap broke.")
        );
        assert_eq!(
            crew_text_for_reason(ReleaseReason::TooFarApart),
            Some("Vehicles too far apart; tow released.")
        );
    }
}
