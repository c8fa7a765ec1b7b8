use thiserror::Error;

/// Ошибки валидации аргументов и регистрации.
///
/// Ошибки маршрутизации времени исполнения (неизвестный endpoint, повторный
/// request id, неизвестная корреляция) сюда не попадают: они логируются и
/// глотаются, чтобы одна потерянная доставка не роняла событийный цикл.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("endpoint '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("endpoint '{0}' is not registered")]
    NotRegistered(String),

    #[error("handler '{handler}' does not match the registered handler for endpoint '{endpoint}'")]
    HandlerMismatch { endpoint: String, handler: String },

    #[error("serialization failed: {0}")]
    Serialization(String),
}
