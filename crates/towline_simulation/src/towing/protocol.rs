//! Протокол выбора: два клика крюком
//!
//! Idle → (клик по машине) → Selecting → (клик по второй) → AttachOrder.
//! Клик по машине в живой связке (любая роль) — это запрос ручного
//! отцепа, независимо от текущего выбора. Отмена снимает выбор молча.
//!
//! Выбор поглощается вторым кликом ВСЕГДА, даже если сцепка не прошла:
//! оператор начинает заново с чистого состояния, а не с загадочно
//! висящего выбора.

use bevy::prelude::*;

use crate::components::{Operator, Vehicle};
use crate::config::TowConfig;
use crate::geometry::choose_anchor_local;
use crate::registry::{HookSelection, SelectionState, TowRegistry};
use crate::towing::events::{HookCancel, HookClick, OperatorMessage, ReleaseRequest, ReleaseReason};
use crate::towing::installer::{AttachError, AttachOrder};

/// System: обработка кликов и отмен крюка
///
/// 1. Отмены: снять выбор, подтвердить оператору
/// 2. Клики: кандидат → (связан? → отцеп) → первый/второй шаг выбора
///
/// Физические предусловия здесь НЕ проверяются — это работа
/// install_requested_links. Протокол отвечает только за выбор пары.
pub fn process_hook_input(
    mut clicks: EventReader<HookClick>,
    mut cancels: EventReader<HookCancel>,
    mut selections: ResMut<SelectionState>,
    registry: Res<TowRegistry>,
    config: Res<TowConfig>,
    operators: Query<&Operator>,
    vehicles: Query<(Entity, &Transform), With<Vehicle>>,
    mut orders: EventWriter<AttachOrder>,
    mut releases: EventWriter<ReleaseRequest>,
    mut messages: EventWriter<OperatorMessage>,
) {
    for cancel in cancels.read() {
        if selections.take(cancel.operator).is_some() {
            messages.write(OperatorMessage {
                operator: cancel.operator,
                text: "Hook selection cancelled.".to_string(),
            });
        }
    }

    for click in clicks.read() {
        let Some((candidate, candidate_tf)) = resolve_candidate(
            click.target,
            click.hit_point,
            config.target_search_radius,
            &vehicles,
        ) else {
            messages.write(OperatorMessage {
                operator: click.operator,
                text: AttachError::NoTarget.user_text().to_string(),
            });
            continue;
        };

        // Машина в связке: клик = ручной отцеп, выбор не трогаем
        if let Some(link) = registry.link_for_vehicle(candidate) {
            releases.write(ReleaseRequest {
                puller: link.puller,
                reason: ReleaseReason::Manual,
            });
            continue;
        }

        match selections.take(click.operator) {
            // Первый клик: запомнить тягач и ближний якорь
            None => {
                let anchor_local = choose_anchor_local(
                    &candidate_tf,
                    click.hit_point,
                    config.front_anchor_forward,
                    config.rear_anchor_back,
                    config.anchor_height,
                );
                selections.begin(
                    click.operator,
                    HookSelection {
                        puller: candidate,
                        anchor_local,
                    },
                );
                messages.write(OperatorMessage {
                    operator: click.operator,
                    text: "Vehicle selected. Hook the second vehicle.".to_string(),
                });
            }
            // Второй клик: финализация пары
            Some(selection) => {
                if selection.puller == candidate {
                    messages.write(OperatorMessage {
                        operator: click.operator,
                        text: AttachError::SamePuller.user_text().to_string(),
                    });
                    continue;
                }
                let Ok((_, _puller_tf)) = vehicles.get(selection.puller) else {
                    messages.write(OperatorMessage {
                        operator: click.operator,
                        text: "Selected vehicle is gone.".to_string(),
                    });
                    continue;
                };
                // Тягач могли увести в связку между кликами
                if registry.is_linked(selection.puller) {
                    messages.write(OperatorMessage {
                        operator: click.operator,
                        text: AttachError::AlreadyLinked.user_text().to_string(),
                    });
                    continue;
                }
                if let Ok(operator) = operators.get(click.operator) {
                    if !operator.can_hook() {
                        messages.write(OperatorMessage {
                            operator: click.operator,
                            text: AttachError::OnCooldown.user_text().to_string(),
                        });
                        continue;
                    }
                }

                let anchor_towed_local = choose_anchor_local(
                    &candidate_tf,
                    click.hit_point,
                    config.front_anchor_forward,
                    config.rear_anchor_back,
                    config.anchor_height,
                );
                orders.write(AttachOrder {
                    operator: click.operator,
                    puller: selection.puller,
                    towed: candidate,
                    anchor_puller_local: selection.anchor_local,
                    anchor_towed_local,
                });
            }
        }
    }
}

/// Кандидат под кликом: target, если это машина, иначе ближайшая
/// машина в target_search_radius от точки попадания.
fn resolve_candidate(
    target: Option<Entity>,
    hit_point: Vec3,
    search_radius: f32,
    vehicles: &Query<(Entity, &Transform), With<Vehicle>>,
) -> Option<(Entity, Transform)> {
    if let Some(entity) = target {
        if let Ok((e, tf)) = vehicles.get(entity) {
            return Some((e, *tf));
        }
    }

    let radius_sq = search_radius * search_radius;
    vehicles
        .iter()
        .map(|(e, tf)| (e, *tf, tf.translation.distance_squared(hit_point)))
        .filter(|(_, _, d)| *d <= radius_sq)
        .min_by(|a, b| a.2.total_cmp(&b.2))
        .map(|(e, tf, _)| (e, tf))
}
