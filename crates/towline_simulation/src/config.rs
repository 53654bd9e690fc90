//! Конфигурация буксировки
//!
//! Один плоский struct со всеми тюнинг-параметрами, JSON-файл на диске.
//! Загрузка терпима к мусору: битый файл → defaults + перезапись,
//! неизвестные поля игнорируются, отсутствующие добираются из Default.
//!
//! Инвариант: в App попадает только конфиг, прошедший validate().

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::logger::{log_error, log_warning};

/// Имя файла конфигурации по умолчанию (рабочая директория процесса)
pub const DEFAULT_CONFIG_PATH: &str = "tow_config.json";

/// Параметры буксировочной связки: трос, ассист, авто-удлинение,
/// звуки, отрисовка.
///
/// Default = эталонный тюнинг; JSON-файл может переопределить любое поле.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TowConfig {
    // === Звуки ===
    pub play_sound_on_link: bool,
    pub sound_on_link: String,
    pub play_sound_on_release: bool,
    pub sound_on_release: String,
    pub play_sound_on_break: bool,
    pub sound_on_break: String,
    /// Кому слышно: "drivers" (экипажи обеих машин) или "nearby"
    pub sound_audience: String,
    /// Радиус "nearby"-аудитории звука (метры)
    pub sound_range: f32,

    // === Выравнивание по рысканию ===
    pub align_yaw_when_taut: bool,
    pub align_yaw_kp: f32,
    pub align_yaw_kd: f32,
    /// Кламп PD-момента (Н·м)
    pub align_yaw_max_torque: f32,
    /// Постоянная прижимная сила в точке крепления (Н)
    pub align_downforce_n: f32,
    /// Ниже этой суммарной скорости выравнивание молчит (м/с)
    pub align_min_speed: f32,

    // === Отрисовка троса ===
    pub show_rope: bool,
    /// "r,g,b[,a]", компоненты 0..1
    pub rope_color: String,
    /// Сегментов на кривую (используется клампнутым в 2..=4)
    pub rope_segments: u32,
    /// Провис середины троса (метры)
    pub rope_sag: f32,
    /// "drivers" или "nearby"
    pub rope_audience: String,
    /// Радиус "nearby"-аудитории отрисовки (метры)
    pub rope_visible_distance: f32,
    /// Максимум зрителей на связку за проход
    pub rope_max_viewers: usize,

    // === Тормоза буксируемой ===
    pub ease_towed_brakes: bool,
    /// Потолок тормозного момента колеса на буксире (Н·м)
    pub towed_brake_torque: f32,
    /// Повторно поджимать тормоза каждый sweep (машина могла их вернуть)
    pub persist_brake_ease: bool,

    // === Стабилизирующий ассист ===
    pub assist_when_taut: bool,
    /// Доля rope_limit, с которой включается ассист (0..1]
    pub assist_threshold: f32,
    /// Скорость буксируемой вдоль троса, выше которой тягу не добавляем (м/с)
    pub assist_max_towed_speed: f32,
    pub assist_kp: f32,
    pub assist_kd: f32,
    /// Кламп ускорения буксируемой (м/с²)
    pub assist_max_towed_accel: f32,
    /// Кламп обратного ускорения тягача (м/с²)
    pub assist_max_puller_accel: f32,
    /// Доля корректирующего ускорения, достающаяся тягачу
    pub assist_puller_share: f32,

    // === Авто-удлинение ===
    pub auto_extend_when_taut: bool,
    /// Потолок длины троса (метры)
    pub rope_length_max: f32,
    /// Темп удлинения (м/с, умножается на интервал sweep)
    pub auto_extend_rate: f32,
    /// Дистанция/rope_limit, с которой начинаем удлинять (0..1]
    pub extend_at_fraction: f32,

    // === Трос ===
    /// Нижняя граница длины троса (метры)
    pub rope_length_min: f32,
    /// Желаемая длина при сцепке (метры)
    pub rope_length_desired: f32,
    /// Демпфер джойнта / headless-фоллбэка
    pub rope_damper: f32,

    // === Сопротивление среды на время буксировки ===
    pub raise_puller_drag: bool,
    /// Прибавка линейного демпфирования тягача
    pub puller_drag_delta: f32,
    /// Прибавка линейного демпфирования буксируемой
    pub towed_drag_delta: f32,
    /// Прибавка углового демпфирования буксируемой
    pub towed_angular_drag_delta: f32,

    // === Авто-отцеп по дистанции ===
    /// Нижний предел дистанции разрыва (метры)
    pub max_separation_floor: f32,
    /// Буфер сверх rope_limit, доля
    pub release_buffer_fraction: f32,
    /// Буфер сверх rope_limit, минимум в метрах
    pub release_buffer_min: f32,

    // === Порог разрушения джойнта (считывает физический бэкенд) ===
    pub break_force: f32,
    pub break_torque: f32,

    // === Якоря и выбор цели ===
    /// Вынос переднего якоря вперёд от центра (метры)
    pub front_anchor_forward: f32,
    /// Вынос заднего якоря назад от центра (метры)
    pub rear_anchor_back: f32,
    /// Высота якоря над центром (метры)
    pub anchor_height: f32,
    /// Дальность луча выбора (метры, использует тактический слой)
    pub ray_distance: f32,
    /// Радиус поиска машины вокруг точки попадания (метры)
    pub target_search_radius: f32,

    // === Предусловия сцепки ===
    /// Минимальная доля health у обеих машин (0..1)
    pub min_health_ratio: f32,
    /// Кулдаун оператора после успешной сцепки (секунды, 0 = выключен)
    pub attach_cooldown_seconds: f32,

    // === Прочее ===
    pub debug_log: bool,
}

impl Default for TowConfig {
    fn default() -> Self {
        Self {
            play_sound_on_link: true,
            sound_on_link: "fx/strap_attach".to_string(),
            play_sound_on_release: true,
            sound_on_release: "fx/strap_release".to_string(),
            play_sound_on_break: true,
            sound_on_break: "fx/strap_break".to_string(),
            sound_audience: "drivers".to_string(),
            sound_range: 25.0,

            align_yaw_when_taut: true,
            align_yaw_kp: 2.8,
            align_yaw_kd: 0.7,
            align_yaw_max_torque: 8000.0,
            align_downforce_n: 4000.0,
            align_min_speed: 0.5,

            show_rope: true,
            rope_color: "0.35,0.22,0.10,1".to_string(),
            rope_segments: 3,
            rope_sag: 0.35,
            rope_audience: "nearby".to_string(),
            rope_visible_distance: 30.0,
            rope_max_viewers: 6,

            ease_towed_brakes: true,
            towed_brake_torque: 30.0,
            persist_brake_ease: true,

            assist_when_taut: true,
            assist_threshold: 0.70, // включаемся при 70% натяга
            assist_max_towed_speed: 18.0,
            assist_kp: 5.0,
            assist_kd: 3.0,
            assist_max_towed_accel: 14.0,
            assist_max_puller_accel: 6.0,
            assist_puller_share: 0.5,

            auto_extend_when_taut: true,
            rope_length_max: 6.5,
            auto_extend_rate: 1.0,
            extend_at_fraction: 0.90,

            rope_length_min: 2.5,
            rope_length_desired: 1.5,
            rope_damper: 90.0,

            raise_puller_drag: true,
            puller_drag_delta: 0.25,
            towed_drag_delta: 0.05,
            towed_angular_drag_delta: 0.05,

            max_separation_floor: 18.0,
            release_buffer_fraction: 0.20,
            release_buffer_min: 1.5,

            break_force: 3_000_000.0,
            break_torque: 3_000_000.0,

            front_anchor_forward: 1.8,
            rear_anchor_back: 1.8,
            anchor_height: 0.5,
            ray_distance: 12.0,
            target_search_radius: 4.0,

            min_health_ratio: 0.2, // 20% health
            attach_cooldown_seconds: 2.0,

            debug_log: false,
        }
    }
}

/// Ошибка валидации конфига. Загрузчик логирует её и подставляет Default.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// rope_length_min вне (0, rope_length_max]
    RopeBounds { min: f32, max: f32 },
    /// rope_length_desired больше потолка
    DesiredAboveMax { desired: f32, max: f32 },
    /// extend_at_fraction вне (0, 1]
    ExtendFraction(f32),
    /// Буферный отцеп сработал бы раньше удлинения
    ReleaseBeforeExtend { buffer_fraction: f32, extend_at: f32 },
    /// assist_threshold вне (0, 1]
    AssistThreshold(f32),
    /// min_health_ratio вне [0, 1]
    HealthRatio(f32),
    /// Поле обязано быть неотрицательным
    NegativeField { field: &'static str, value: f32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::RopeBounds { min, max } => write!(
                f,
                "rope_length_min must satisfy 0 < min <= rope_length_max (min={min}, max={max})"
            ),
            ConfigError::DesiredAboveMax { desired, max } => write!(
                f,
                "rope_length_desired {desired} exceeds rope_length_max {max}"
            ),
            ConfigError::ExtendFraction(v) => {
                write!(f, "extend_at_fraction must be in (0, 1], got {v}")
            }
            ConfigError::ReleaseBeforeExtend {
                buffer_fraction,
                extend_at,
            } => write!(
                f,
                "release buffer (1 + {buffer_fraction}) must exceed extend_at_fraction {extend_at}"
            ),
            ConfigError::AssistThreshold(v) => {
                write!(f, "assist_threshold must be in (0, 1], got {v}")
            }
            ConfigError::HealthRatio(v) => {
                write!(f, "min_health_ratio must be in [0, 1], got {v}")
            }
            ConfigError::NegativeField { field, value } => {
                write!(f, "{field} must be non-negative, got {value}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl TowConfig {
    /// Проверка перекрёстных инвариантов. Возвращает первую найденную ошибку.
    ///
    /// Ключевой порядок: порог удлинения (extend_at_fraction) обязан лежать
    /// ниже буферного порога отцепа (1 + release_buffer_fraction), иначе
    /// связка рвалась бы раньше, чем трос успел удлиниться.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.rope_length_min > 0.0 && self.rope_length_min <= self.rope_length_max) {
            return Err(ConfigError::RopeBounds {
                min: self.rope_length_min,
                max: self.rope_length_max,
            });
        }
        if self.rope_length_desired > self.rope_length_max {
            return Err(ConfigError::DesiredAboveMax {
                desired: self.rope_length_desired,
                max: self.rope_length_max,
            });
        }
        if !(self.extend_at_fraction > 0.0 && self.extend_at_fraction <= 1.0) {
            return Err(ConfigError::ExtendFraction(self.extend_at_fraction));
        }
        if self.release_buffer_fraction <= 0.0
            || 1.0 + self.release_buffer_fraction <= self.extend_at_fraction
        {
            return Err(ConfigError::ReleaseBeforeExtend {
                buffer_fraction: self.release_buffer_fraction,
                extend_at: self.extend_at_fraction,
            });
        }
        if !(self.assist_threshold > 0.0 && self.assist_threshold <= 1.0) {
            return Err(ConfigError::AssistThreshold(self.assist_threshold));
        }
        if !(0.0..=1.0).contains(&self.min_health_ratio) {
            return Err(ConfigError::HealthRatio(self.min_health_ratio));
        }

        let non_negative: [(&'static str, f32); 16] = [
            ("auto_extend_rate", self.auto_extend_rate),
            ("rope_damper", self.rope_damper),
            ("puller_drag_delta", self.puller_drag_delta),
            ("towed_drag_delta", self.towed_drag_delta),
            ("towed_angular_drag_delta", self.towed_angular_drag_delta),
            ("assist_max_towed_accel", self.assist_max_towed_accel),
            ("assist_max_puller_accel", self.assist_max_puller_accel),
            ("assist_puller_share", self.assist_puller_share),
            ("align_yaw_max_torque", self.align_yaw_max_torque),
            ("align_downforce_n", self.align_downforce_n),
            ("towed_brake_torque", self.towed_brake_torque),
            ("max_separation_floor", self.max_separation_floor),
            ("release_buffer_min", self.release_buffer_min),
            ("sound_range", self.sound_range),
            ("rope_visible_distance", self.rope_visible_distance),
            ("attach_cooldown_seconds", self.attach_cooldown_seconds),
        ];
        for (field, value) in non_negative {
            if value < 0.0 {
                return Err(ConfigError::NegativeField { field, value });
            }
        }
        Ok(())
    }

    /// Загрузка из JSON-файла: битый/невалидный файл → defaults + перезапись,
    /// отсутствующий файл → defaults + создание.
    pub fn load_or_default(path: &Path) -> TowConfig {
        let loaded = match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<TowConfig>(&text) {
                Ok(config) => Some(config),
                Err(err) => {
                    log_warning(&format!(
                        "tow config: parse error in {}: {err}, rewriting defaults",
                        path.display()
                    ));
                    None
                }
            },
            Err(_) => None,
        };

        let config = match loaded {
            Some(config) => match config.validate() {
                Ok(()) => return config,
                Err(err) => {
                    log_error(&format!("tow config: {err}, falling back to defaults"));
                    TowConfig::default()
                }
            },
            None => TowConfig::default(),
        };

        config.save(path);
        config
    }

    /// Запись на диск (pretty JSON). Ошибки I/O только логируются.
    pub fn save(&self, path: &Path) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(err) = std::fs::write(path, json) {
                    log_warning(&format!(
                        "tow config: cannot write {}: {err}",
                        path.display()
                    ));
                }
            }
            Err(err) => log_error(&format!("tow config: serialize failed: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert_eq!(TowConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rope_min_above_max_is_rejected() {
        let mut config = TowConfig::default();
        config.rope_length_min = 8.0; // потолок 6.5
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RopeBounds { .. })
        ));
    }

    #[test]
    fn extend_fraction_must_be_unit_interval() {
        let mut config = TowConfig::default();
        config.extend_at_fraction = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ExtendFraction(_))
        ));

        config.extend_at_fraction = 1.2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ExtendFraction(_))
        ));
    }

    #[test]
    fn release_buffer_must_sit_above_extend_threshold() {
        let mut config = TowConfig::default();
        config.release_buffer_fraction = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ReleaseBeforeExtend { .. })
        ));
    }

    #[test]
    fn negative_extend_rate_is_rejected() {
        let mut config = TowConfig::default();
        config.auto_extend_rate = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NegativeField {
                field: "auto_extend_rate",
                ..
            })
        ));
    }

    #[test]
    fn unknown_and_missing_fields_tolerated() {
        // Частичный файл: остальное добирается из Default,
        // незнакомые ключи молча пропускаются.
        let json = r#"{ "rope_length_max": 10.0, "legacy_field": 42 }"#;
        let config: TowConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.rope_length_max, 10.0);
        assert_eq!(config.rope_length_min, 2.5);
        assert_eq!(config.validate(), Ok(()));
    }
}
