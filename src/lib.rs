//! Tradix — внутрипроцессная шина сообщений торговой платформы.
//!
//! Мультиплексирует три паттерна обмена поверх одного реестра:
//! - point-to-point: `send` по имени endpoint;
//! - request/response: корреляция запросов и колбэков ответов;
//! - publish/subscribe: топики с шаблонами `*` и `?` и кешем резолюции.
//!
//! Шина однопоточная и не потокобезопасная: все вызовы делаются из потока
//! событийного цикла платформы. Обработчики вызываются синхронно и могут
//! повторно входить в шину.
//!
//! Основные модули:
//! - `bus` — ядро шины: диспетчеризация, сопоставление шаблонов, кеш
//!   резолюции, внешняя публикация
//! - `config` — конфигурация шины (внешняя база, фильтр типов)
//! - `error` — типы ошибок

/// Ядро шины: диспетчеризация, сопоставление шаблонов, внешняя публикация.
pub mod bus;
/// Конфигурация шины.
pub mod config;
/// Типы ошибок.
pub mod error;

// -----------------------------------------------------------------------------
//  Часто используемые публичные типы
// -----------------------------------------------------------------------------

/// Реэкспорт API шины сообщений.
pub use bus::{
    is_match, BusMessage, ExternalSink, ExternalType, Handler, JsonSerializer, MessageBus,
    MessageBusBuilder, PayloadSerializer, Request, Response, Subscription,
};
/// Реэкспорт настроек конфигурации.
pub use config::{BusConfig, DatabaseConfig};
/// Реэкспорт типов ошибок.
pub use error::BusError;
