use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

/// Конфигурация шины сообщений.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusConfig {
    /// Подключение внешней базы. Наличие значения включает внешнюю
    /// публикацию (`has_backing`).
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Имена типов, исключаемых из внешней публикации. Одноразовый:
    /// вычерпывается из конфигурации при создании шины.
    #[serde(default)]
    pub types_filter: Vec<String>,
}

/// Параметры внешней базы. Шина их не интерпретирует: из них платформа
/// собирает хэндл стока.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    /// Интервал буферизации записи, миллисекунды.
    #[serde(default)]
    pub buffer_interval_ms: Option<u64>,
}

impl BusConfig {
    /// Загружает конфигурацию из переменных окружения с префиксом TRADIX_.
    pub fn load() -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            .add_source(Environment::with_prefix("TRADIX").separator("__"))
            .build()?;

        cfg.try_deserialize()
    }
}
