//! Отрисовка троса (RopeDraw, каждые 0.3 с, read-only)
//!
//! Связка → провисшая кривая → RopeDrawCommand на каждого зрителя и
//! сегмент. Слой отрисовки сам решает, чем рисовать; здесь только
//! геометрия, аудитория и бюджет.
//!
//! Бюджет сегментов на проход глобальный: сколько бы ни было связок
//! и зрителей, объём команд ограничен сверху.

use bevy::prelude::*;

use crate::components::{Occupants, Operator};
use crate::config::TowConfig;
use crate::geometry::{parse_color_rgba, sag_point};
use crate::logger::log_warning;
use crate::registry::{TowLink, TowRegistry};
use crate::schedules::ROPE_DRAW_INTERVAL;
use crate::towing::events::RopeDrawCommand;

/// Цвет по умолчанию при мусорном rope_color
pub const DEFAULT_ROPE_COLOR: [f32; 4] = [0.35, 0.22, 0.10, 1.0];

/// Нижний предел бюджета сегментов на проход
const MIN_SEGMENT_BUDGET: usize = 24;

/// System: генерация команд отрисовки (внутри RopeDraw schedule)
pub fn draw_rope_curves(
    registry: Res<TowRegistry>,
    config: Res<TowConfig>,
    mut color_cache: Local<Option<[f32; 4]>>,
    transforms: Query<&Transform>,
    occupants: Query<&Occupants>,
    observers: Query<(Entity, &Transform), With<Operator>>,
    mut draws: EventWriter<RopeDrawCommand>,
) {
    if !config.show_rope || registry.is_empty() {
        return;
    }

    // Разбор цвета один раз, дальше из кеша
    let color = *color_cache.get_or_insert_with(|| {
        parse_color_rgba(&config.rope_color).unwrap_or_else(|| {
            log_warning(&format!(
                "tow: malformed rope_color '{}', using default",
                config.rope_color
            ));
            DEFAULT_ROPE_COLOR
        })
    });

    let segments = config.rope_segments.clamp(2, 4) as usize;
    let mut budget = (config.rope_max_viewers * segments * 2).max(MIN_SEGMENT_BUDGET);
    // Сегмент живёт до следующего прохода с запасом
    let duration = (1.5 * ROPE_DRAW_INTERVAL).max(0.15);

    for link in registry.links() {
        if budget == 0 {
            break;
        }
        let (Ok(puller_tf), Ok(towed_tf)) =
            (transforms.get(link.puller), transforms.get(link.towed))
        else {
            continue;
        };

        let from = puller_tf.transform_point(link.anchor_puller_local);
        let to = towed_tf.transform_point(link.anchor_towed_local);
        let midpoint = (from + to) * 0.5;

        let viewers = rope_audience(&config, link, midpoint, &occupants, &observers);
        if viewers.is_empty() {
            continue;
        }

        // Опорные точки кривой считаются один раз на связку
        let mut points = Vec::with_capacity(segments + 1);
        for i in 0..=segments {
            let t = i as f32 / segments as f32;
            points.push(sag_point(from, to, config.rope_sag, t));
        }

        'viewers: for viewer in viewers {
            for pair in points.windows(2) {
                if budget == 0 {
                    break 'viewers;
                }
                budget -= 1;
                draws.write(RopeDrawCommand {
                    viewer,
                    from: pair[0],
                    to: pair[1],
                    color,
                    duration,
                });
            }
        }
    }
}

/// Аудитория связки: "drivers" — экипажи обеих машин, иначе ближайшие
/// операторы в rope_visible_distance от середины троса.
/// Не больше rope_max_viewers в любом режиме.
fn rope_audience(
    config: &TowConfig,
    link: &TowLink,
    midpoint: Vec3,
    occupants: &Query<&Occupants>,
    observers: &Query<(Entity, &Transform), With<Operator>>,
) -> Vec<Entity> {
    if config.rope_audience == "drivers" {
        let mut viewers = Vec::new();
        for vehicle in [link.puller, link.towed] {
            if let Ok(crew) = occupants.get(vehicle) {
                viewers.extend(crew.0.iter().copied());
            }
        }
        viewers.truncate(config.rope_max_viewers);
        viewers
    } else {
        let range_sq = config.rope_visible_distance * config.rope_visible_distance;
        let mut nearby: Vec<(Entity, f32)> = observers
            .iter()
            .map(|(entity, tf)| (entity, tf.translation.distance_squared(midpoint)))
            .filter(|(_, d)| *d <= range_sq)
            .collect();
        nearby.sort_by(|a, b| a.1.total_cmp(&b.1));
        nearby.truncate(config.rope_max_viewers);
        nearby.into_iter().map(|(entity, _)| entity).collect()
    }
}
