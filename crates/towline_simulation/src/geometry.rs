//! Чистая геометрия буксировки
//!
//! Выбор якоря по точке попадания, кривая провиса троса, разбор цвета.
//! Никакого ECS: функции без состояния, счётные, покрыты unit-тестами.

use bevy::prelude::*;

/// Канонические локальные точки крепления машины.
///
/// Forward в Bevy = -Z, поэтому передний якорь лежит на -Z, задний на +Z.
/// Высота поднимает обе точки над центром масс.
pub fn anchor_points_local(front_forward: f32, rear_back: f32, height: f32) -> (Vec3, Vec3) {
    (
        Vec3::new(0.0, height, -front_forward),
        Vec3::new(0.0, height, rear_back),
    )
}

/// Выбирает ближний к точке попадания якорь (передний или задний)
/// и возвращает его ЛОКАЛЬНУЮ позицию.
///
/// Сравнение по квадрату дистанции в мировых координатах: дешевле sqrt,
/// а порядок тот же.
pub fn choose_anchor_local(
    vehicle: &Transform,
    hit_world: Vec3,
    front_forward: f32,
    rear_back: f32,
    height: f32,
) -> Vec3 {
    let (front_local, rear_local) = anchor_points_local(front_forward, rear_back, height);
    let front_world = vehicle.transform_point(front_local);
    let rear_world = vehicle.transform_point(rear_local);

    if hit_world.distance_squared(front_world) <= hit_world.distance_squared(rear_world) {
        front_local
    } else {
        rear_local
    }
}

/// Точка на квадратичной Безье-кривой провисшего троса, t в [0, 1].
///
/// Контрольная точка = середина хорды, опущенная на sag по мировой Y.
pub fn sag_point(from: Vec3, to: Vec3, sag: f32, t: f32) -> Vec3 {
    let control = (from + to) * 0.5 - Vec3::Y * sag;
    let u = 1.0 - t;
    from * (u * u) + control * (2.0 * u * t) + to * (t * t)
}

/// Разбор строки цвета "r,g,b" или "r,g,b,a" (компоненты 0..1).
///
/// Компоненты клампятся в [0, 1], альфа по умолчанию 1.
/// Мусор на входе → None, цвет по умолчанию выбирает вызывающий.
pub fn parse_color_rgba(text: &str) -> Option<[f32; 4]> {
    let mut parts = [0.0f32; 4];
    parts[3] = 1.0;

    let mut count = 0;
    for piece in text.split(',') {
        if count >= 4 {
            return None; // больше четырёх компонент
        }
        parts[count] = piece.trim().parse::<f32>().ok()?.clamp(0.0, 1.0);
        count += 1;
    }

    if count < 3 {
        return None;
    }
    Some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_anchor_wins_for_forward_hit() {
        let vehicle = Transform::from_xyz(10.0, 0.0, 10.0);
        // Попадание перед машиной (forward = -Z)
        let hit = Vec3::new(10.0, 0.5, 7.0);
        let anchor = choose_anchor_local(&vehicle, hit, 1.8, 1.8, 0.5);
        assert_eq!(anchor, Vec3::new(0.0, 0.5, -1.8));
    }

    #[test]
    fn rear_anchor_wins_for_rear_hit() {
        let vehicle = Transform::from_xyz(0.0, 0.0, 0.0);
        let hit = Vec3::new(0.3, 0.5, 2.5);
        let anchor = choose_anchor_local(&vehicle, hit, 1.8, 1.8, 0.5);
        assert_eq!(anchor, Vec3::new(0.0, 0.5, 1.8));
    }

    #[test]
    fn anchor_choice_respects_rotation() {
        // Машина развёрнута на 180°: её "перед" смотрит на +Z мира
        let vehicle =
            Transform::from_xyz(0.0, 0.0, 0.0).with_rotation(Quat::from_rotation_y(std::f32::consts::PI));
        let hit = Vec3::new(0.0, 0.5, 3.0);
        let anchor = choose_anchor_local(&vehicle, hit, 1.8, 1.8, 0.5);
        // Локально это по-прежнему передний якорь
        assert_eq!(anchor, Vec3::new(0.0, 0.5, -1.8));
    }

    #[test]
    fn sag_curve_endpoints_and_midpoint() {
        let a = Vec3::new(0.0, 1.0, 0.0);
        let b = Vec3::new(4.0, 1.0, 0.0);

        assert!(sag_point(a, b, 0.35, 0.0).abs_diff_eq(a, 1e-6));
        assert!(sag_point(a, b, 0.35, 1.0).abs_diff_eq(b, 1e-6));

        // Середина кривой ниже середины хорды ровно на sag/2
        // (квадратичная Безье: B(0.5) = midpoint - sag/2 * Y)
        let mid = sag_point(a, b, 0.35, 0.5);
        assert!((mid.y - (1.0 - 0.175)).abs() < 1e-6);
        assert!((mid.x - 2.0).abs() < 1e-6);
    }

    #[test]
    fn zero_sag_is_straight_line() {
        let a = Vec3::ZERO;
        let b = Vec3::new(2.0, 0.0, 2.0);
        let mid = sag_point(a, b, 0.0, 0.5);
        assert!(mid.abs_diff_eq((a + b) * 0.5, 1e-6));
    }

    #[test]
    fn color_parse_variants() {
        assert_eq!(
            parse_color_rgba("0.35,0.22,0.10,1"),
            Some([0.35, 0.22, 0.10, 1.0])
        );
        // Альфа по умолчанию
        assert_eq!(parse_color_rgba("1,0,0"), Some([1.0, 0.0, 0.0, 1.0]));
        // Кламп выхода за диапазон
        assert_eq!(parse_color_rgba("2,-1,0.5"), Some([1.0, 0.0, 0.5, 1.0]));
        // Пробелы терпимы
        assert_eq!(parse_color_rgba(" 0.1 , 0.2 , 0.3 "), Some([0.1, 0.2, 0.3, 1.0]));
    }

    #[test]
    fn malformed_color_is_none() {
        assert_eq!(parse_color_rgba(""), None);
        assert_eq!(parse_color_rgba("0.1,0.2"), None);
        assert_eq!(parse_color_rgba("red,green,blue"), None);
        assert_eq!(parse_color_rgba("0,0,0,1,9"), None);
    }
}
