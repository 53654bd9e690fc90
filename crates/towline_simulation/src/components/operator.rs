//! Operator component — актор, управляющий крюком
//!
//! ECS хранит только game state (cooldown). Прицеливание, луч и проверка
//! "крюк в руках" остаются в тактическом слое: сюда приходят уже готовые
//! HookClick / HookCancel события.

use bevy::prelude::*;

use crate::schedules::FIXED_DT;

/// Актор, способный цеплять трос
#[derive(Component, Debug, Clone, Default, Reflect)]
#[reflect(Component)]
pub struct Operator {
    /// Текущий cooldown таймер (уменьшается до 0)
    pub cooldown_timer: f32,
}

impl Operator {
    /// Может ли начать сцепку (cooldown == 0)
    pub fn can_hook(&self) -> bool {
        self.cooldown_timer <= 0.0
    }

    /// Запустить cooldown после успешной сцепки (0 = выключен)
    pub fn start_cooldown(&mut self, seconds: f32) {
        self.cooldown_timer = seconds.max(0.0);
    }
}

/// System: обновление hook cooldown таймеров (FixedUpdate)
///
/// Шаг берём из FIXED_DT, не из wall-clock: тесты гоняют FixedUpdate
/// вручную, и таймеры обязаны тикать одинаково.
pub fn tick_hook_cooldowns(mut query: Query<&mut Operator>) {
    for mut operator in query.iter_mut() {
        if operator.cooldown_timer > 0.0 {
            operator.cooldown_timer = (operator.cooldown_timer - FIXED_DT).max(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_gates_hook() {
        let mut operator = Operator::default();
        assert!(operator.can_hook());

        operator.start_cooldown(2.0);
        assert!(!operator.can_hook());

        operator.cooldown_timer -= 1.0;
        assert!(!operator.can_hook());

        operator.cooldown_timer -= 1.0;
        assert!(operator.can_hook());
    }

    #[test]
    fn zero_cooldown_is_disabled() {
        let mut operator = Operator::default();
        operator.start_cooldown(0.0);
        assert!(operator.can_hook());
    }
}
