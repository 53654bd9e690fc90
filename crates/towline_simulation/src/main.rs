//! Headless симуляция TOWLINE
//!
//! Прогоняет сценарий буксировки без рендера: сцепка двумя кликами,
//! авто-удлинение троса под нагрузкой, ручной отцеп кликом по связке.

use bevy::prelude::*;
use bevy_rapier3d::prelude::Velocity;
use std::path::Path;

use towline_simulation::{
    create_headless_app, log_info, spawn_tow_vehicle, HookClick, Operator, TowConfig,
    TowRegistry, DEFAULT_CONFIG_PATH,
};

fn main() {
    let config = TowConfig::load_or_default(Path::new(DEFAULT_CONFIG_PATH));
    let mut app = create_headless_app(config);

    // Сцена: тягач в 3 м впереди буксируемой (Bevy forward = -Z)
    let world = app.world_mut();
    let (puller, towed, operator) = {
        let mut commands = world.commands();
        let puller = spawn_tow_vehicle(&mut commands, Vec3::new(0.0, 0.0, -3.0));
        let towed = spawn_tow_vehicle(&mut commands, Vec3::ZERO);
        let operator = commands.spawn(Operator::default()).id();
        (puller, towed, operator)
    };
    world.flush();

    log_info(&format!("scenario: puller {puller:?}, towed {towed:?}"));

    // Сцепка: клик по корме тягача, затем по носу буксируемой
    world.send_event(HookClick {
        operator,
        target: Some(puller),
        hit_point: Vec3::new(0.0, 0.5, -1.5),
    });
    world.run_schedule(FixedUpdate);
    world.send_event(HookClick {
        operator,
        target: Some(towed),
        hit_point: Vec3::new(0.0, 0.5, -1.0),
    });
    world.run_schedule(FixedUpdate);

    match app.world().resource::<TowRegistry>().get(puller) {
        Some(link) => log_info(&format!("attached, rope limit {:.2} m", link.rope_limit)),
        None => {
            log_info("attach failed, aborting scenario");
            return;
        }
    }

    // Буксировка: тягач едет вперёд 10 секунд, трос травится до потолка
    for tick in 0..600u64 {
        let world = app.world_mut();
        if let Some(mut velocity) = world.get_mut::<Velocity>(puller) {
            velocity.linvel = Vec3::new(0.0, 0.0, -8.0);
        }
        world.run_schedule(FixedUpdate);

        if tick % 60 == 0 {
            report_link(&app, puller);
        }
    }

    // Клик по машине в живой связке = запрос ручного отцепа
    let world = app.world_mut();
    world.send_event(HookClick {
        operator,
        target: Some(towed),
        hit_point: Vec3::ZERO,
    });
    world.run_schedule(FixedUpdate);

    let links_left = app.world().resource::<TowRegistry>().len();
    log_info(&format!("released, links left: {links_left}"));
}

/// Печатает дистанцию якорей и текущий предел троса
fn report_link(app: &App, puller: Entity) {
    let world = app.world();
    let Some(link) = world.resource::<TowRegistry>().get(puller) else {
        return;
    };
    let (Some(puller_tf), Some(towed_tf)) = (
        world.get::<Transform>(link.puller),
        world.get::<Transform>(link.towed),
    ) else {
        return;
    };
    let separation = puller_tf
        .transform_point(link.anchor_puller_local)
        .distance(towed_tf.transform_point(link.anchor_towed_local));
    log_info(&format!(
        "separation {separation:.2} m, rope limit {:.2} m",
        link.rope_limit
    ));
}
