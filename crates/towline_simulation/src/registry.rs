//! Реестр буксировочных связок
//!
//! Единственный владелец списка живых связок. Primary-индекс по тягачу,
//! поддерживаемый обратный индекс по буксируемой: проверка "машина уже
//! в связке" обязана быть O(1) в обе стороны, линейных сканов нет.
//!
//! Инвариант: машина состоит максимум в одной связке, в любой роли.
//! Оба индекса меняются только парой, внутри insert/remove.

use bevy::prelude::*;
use std::collections::HashMap;

/// Снимок параметров, изменённых на время буксировки.
/// Снимается в момент сцепки, возвращается при отцепе.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreSnapshot {
    pub puller_linear_damping: f32,
    pub towed_linear_damping: f32,
    pub towed_angular_damping: f32,
    /// По колесу, в порядке Wheels. Восстанавливается только при
    /// совпадении длины с текущим числом колёс.
    pub towed_brake_torque: Vec<f32>,
    pub towed_sideways_stiffness: Vec<f32>,
}

/// Живая связка тягач ↔ буксируемая
#[derive(Debug, Clone)]
pub struct TowLink {
    pub puller: Entity,
    pub towed: Entity,
    /// Локальная точка крепления на тягаче (фиксируется при сцепке)
    pub anchor_puller_local: Vec3,
    /// Локальная точка крепления на буксируемой
    pub anchor_towed_local: Vec3,
    /// Текущая длина троса. Монотонно не убывает,
    /// в [rope_length_min, rope_length_max].
    pub rope_limit: f32,
    pub snapshot: RestoreSnapshot,
}

/// Реестр живых связок
#[derive(Resource, Debug, Default)]
pub struct TowRegistry {
    links: HashMap<Entity, TowLink>,
    towed_index: HashMap<Entity, Entity>,
}

impl TowRegistry {
    /// Регистрирует связку. Отказывает (false), если любая из машин
    /// уже занята — инвариант "одна связка на машину" держится здесь.
    pub fn insert(&mut self, link: TowLink) -> bool {
        if self.is_linked(link.puller) || self.is_linked(link.towed) {
            return false;
        }
        self.towed_index.insert(link.towed, link.puller);
        self.links.insert(link.puller, link);
        true
    }

    /// Снимает связку по тягачу, чинит обратный индекс.
    pub fn remove(&mut self, puller: Entity) -> Option<TowLink> {
        let link = self.links.remove(&puller)?;
        self.towed_index.remove(&link.towed);
        Some(link)
    }

    pub fn get(&self, puller: Entity) -> Option<&TowLink> {
        self.links.get(&puller)
    }

    pub fn get_mut(&mut self, puller: Entity) -> Option<&mut TowLink> {
        self.links.get_mut(&puller)
    }

    /// Тягач, буксирующий данную машину (если она на тросе)
    pub fn puller_of(&self, towed: Entity) -> Option<Entity> {
        self.towed_index.get(&towed).copied()
    }

    /// Связка, в которой машина участвует в любой роли
    pub fn link_for_vehicle(&self, vehicle: Entity) -> Option<&TowLink> {
        if let Some(link) = self.links.get(&vehicle) {
            return Some(link);
        }
        self.puller_of(vehicle).and_then(|p| self.links.get(&p))
    }

    pub fn is_linked(&self, vehicle: Entity) -> bool {
        self.links.contains_key(&vehicle) || self.towed_index.contains_key(&vehicle)
    }

    /// Снимок ключей для обхода: sweep может снимать связки по ходу,
    /// поэтому итерировать по живой map нельзя. Порядок стабильный
    /// (по Entity тягача), чтобы потоки событий не зависели от hasher'а.
    pub fn pullers(&self) -> Vec<Entity> {
        let mut pullers: Vec<Entity> = self.links.keys().copied().collect();
        pullers.sort_unstable();
        pullers
    }

    /// Read-only обход живых связок (ассист, отрисовка) в стабильном
    /// порядке: от порядка зависит раздача бюджета отрисовки.
    pub fn links(&self) -> Vec<&TowLink> {
        let mut links: Vec<&TowLink> = self.links.values().collect();
        links.sort_unstable_by_key(|link| link.puller);
        links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Первый выбор двухшаговой сцепки (этап Selecting)
#[derive(Debug, Clone, Copy)]
pub struct HookSelection {
    pub puller: Entity,
    pub anchor_local: Vec3,
}

/// Незавершённые выборы крюка, по оператору.
/// Максимум один на оператора; поглощается вторым кликом или отменой.
#[derive(Resource, Debug, Default)]
pub struct SelectionState {
    selecting: HashMap<Entity, HookSelection>,
}

impl SelectionState {
    /// Начать выбор (повторный первый клик перезаписывает старый)
    pub fn begin(&mut self, operator: Entity, selection: HookSelection) {
        self.selecting.insert(operator, selection);
    }

    /// Забрать выбор (второй клик). Выбор поглощается независимо от
    /// исхода сцепки.
    pub fn take(&mut self, operator: Entity) -> Option<HookSelection> {
        self.selecting.remove(&operator)
    }

    pub fn get(&self, operator: Entity) -> Option<&HookSelection> {
        self.selecting.get(&operator)
    }

    pub fn is_selecting(&self, operator: Entity) -> bool {
        self.selecting.contains_key(&operator)
    }

    /// Чистка осиротевших выборов (оператор или тягач исчезли)
    pub fn retain(&mut self, mut keep: impl FnMut(Entity, &HookSelection) -> bool) {
        self.selecting.retain(|operator, selection| keep(*operator, selection));
    }

    pub fn len(&self) -> usize {
        self.selecting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selecting.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(puller: Entity, towed: Entity) -> TowLink {
        TowLink {
            puller,
            towed,
            anchor_puller_local: Vec3::new(0.0, 0.5, 1.8),
            anchor_towed_local: Vec3::new(0.0, 0.5, -1.8),
            rope_limit: 3.0,
            snapshot: RestoreSnapshot {
                puller_linear_damping: 0.0,
                towed_linear_damping: 0.0,
                towed_angular_damping: 0.05,
                towed_brake_torque: vec![600.0; 4],
                towed_sideways_stiffness: vec![1.0; 4],
            },
        }
    }

    #[test]
    fn insert_maintains_both_indices() {
        let mut world = World::new();
        let a = world.spawn_empty().id();
        let b = world.spawn_empty().id();

        let mut registry = TowRegistry::default();
        assert!(registry.insert(link(a, b)));

        assert!(registry.is_linked(a));
        assert!(registry.is_linked(b));
        assert_eq!(registry.puller_of(b), Some(a));
        assert_eq!(registry.link_for_vehicle(b).map(|l| l.puller), Some(a));
        assert_eq!(registry.link_for_vehicle(a).map(|l| l.towed), Some(b));
    }

    #[test]
    fn second_link_for_busy_vehicle_is_rejected() {
        let mut world = World::new();
        let a = world.spawn_empty().id();
        let b = world.spawn_empty().id();
        let c = world.spawn_empty().id();

        let mut registry = TowRegistry::default();
        assert!(registry.insert(link(a, b)));

        // b буксируется — не может стать тягачом
        assert!(!registry.insert(link(b, c)));
        // и не может буксироваться вторым тросом
        assert!(!registry.insert(link(c, b)));
        // a тянет — не может буксироваться
        assert!(!registry.insert(link(c, a)));

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_clears_reverse_index() {
        let mut world = World::new();
        let a = world.spawn_empty().id();
        let b = world.spawn_empty().id();
        let c = world.spawn_empty().id();

        let mut registry = TowRegistry::default();
        registry.insert(link(a, b));

        let removed = registry.remove(a).unwrap();
        assert_eq!(removed.towed, b);
        assert!(!registry.is_linked(a));
        assert!(!registry.is_linked(b));
        assert_eq!(registry.puller_of(b), None);

        // После снятия обе машины снова свободны
        assert!(registry.insert(link(c, b)));
    }

    #[test]
    fn selection_is_taken_once() {
        let mut world = World::new();
        let operator = world.spawn_empty().id();
        let puller = world.spawn_empty().id();

        let mut selections = SelectionState::default();
        selections.begin(
            operator,
            HookSelection {
                puller,
                anchor_local: Vec3::ZERO,
            },
        );
        assert!(selections.is_selecting(operator));

        let taken = selections.take(operator).unwrap();
        assert_eq!(taken.puller, puller);
        assert!(selections.take(operator).is_none());
    }
}
