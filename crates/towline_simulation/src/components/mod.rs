//! ECS Components для буксировочной симуляции
//!
//! Организация по доменам:
//! - vehicle: машины (Vehicle, VehicleBody, Wheels, VehicleHealth, Occupants)
//! - operator: актор с крюком (Operator + cooldown tick)

pub mod operator;
pub mod vehicle;

// Re-exports для удобного импорта
pub use operator::*;
pub use vehicle::*;
