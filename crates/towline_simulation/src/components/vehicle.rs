//! Компоненты машин: Vehicle, VehicleBody, Wheels, VehicleHealth, Occupants

use bevy::prelude::*;

/// Маркер машины — кандидата на буксировку.
///
/// Физические компоненты (RigidBody, Velocity, Damping, ExternalForce)
/// навешивает спавнер; стратегический слой читает их как данность.
#[derive(Component, Debug, Clone, Default, Reflect)]
#[reflect(Component)]
pub struct Vehicle;

/// Скалярные массовые свойства для перевода ускорений в силы.
///
/// Полный тензор инерции живёт в физическом бэкенде; стратегическому
/// слою хватает массы и инерции вокруг вертикальной оси.
#[derive(Component, Debug, Clone, Copy, Reflect)]
#[reflect(Component)]
pub struct VehicleBody {
    /// Масса (кг)
    pub mass: f32,
    /// Момент инерции вокруг Y (кг·м²), для yaw-коррекции
    pub yaw_inertia: f32,
}

impl Default for VehicleBody {
    fn default() -> Self {
        Self {
            mass: 1200.0,      // седан
            yaw_inertia: 2000.0,
        }
    }
}

impl VehicleBody {
    /// Сила из линейного ускорения (Н)
    pub fn force_for_accel(&self, accel: Vec3) -> Vec3 {
        accel * self.mass
    }
}

/// Одно колесо подвески
#[derive(Debug, Clone, Copy, PartialEq, Reflect)]
pub struct WheelUnit {
    /// Тормозной момент (Н·м)
    pub brake_torque: f32,
    /// Боковая жёсткость сцепления (безразмерная, обычно ~1.0)
    pub sideways_stiffness: f32,
    /// Отключенные колёса sweep не трогает
    pub enabled: bool,
}

impl Default for WheelUnit {
    fn default() -> Self {
        Self {
            brake_torque: 600.0,
            sideways_stiffness: 1.0,
            enabled: true,
        }
    }
}

/// Колёса машины. Порядок стабилен на всё время жизни entity;
/// snapshot-restore связки полагается на совпадение длины.
#[derive(Component, Debug, Clone, Default, Reflect)]
#[reflect(Component)]
pub struct Wheels(pub Vec<WheelUnit>);

impl Wheels {
    pub fn standard_four() -> Self {
        Self(vec![WheelUnit::default(); 4])
    }

    pub fn count(&self) -> usize {
        self.0.len()
    }
}

/// Прочность машины
///
/// Инвариант: 0.0 ≤ current ≤ max
#[derive(Component, Debug, Clone, Copy, Reflect)]
#[reflect(Component)]
pub struct VehicleHealth {
    pub current: f32,
    pub max: f32,
}

impl Default for VehicleHealth {
    fn default() -> Self {
        Self::new(1000.0)
    }
}

impl VehicleHealth {
    pub fn new(max: f32) -> Self {
        Self { current: max, max }
    }

    /// Доля прочности в [0, 1]; max == 0 трактуем как разрушенную
    pub fn ratio(&self) -> f32 {
        if self.max <= 0.0 {
            return 0.0;
        }
        (self.current / self.max).clamp(0.0, 1.0)
    }

    pub fn take_damage(&mut self, amount: f32) {
        self.current = (self.current - amount).max(0.0);
    }
}

/// Акторы внутри машины (водитель + пассажиры).
///
/// Наполняется слоем посадки/высадки; буксировка только читает
/// для адресных сообщений и звуков.
#[derive(Component, Debug, Clone, Default, Reflect)]
#[reflect(Component)]
pub struct Occupants(pub Vec<Entity>);
