//! Внешняя публикация: реестр допущенных типов, сериализация и байтовый сток.

use std::{
    any::{Any, TypeId},
    collections::{HashMap, HashSet},
};

use bytes::Bytes;
use serde::Serialize;
use tracing::warn;

use super::BusMessage;
use crate::error::BusError;

/// Идентификатор конкретного типа сообщения, допущенного к внешней
/// публикации. Пара «имя для конфигурации — TypeId для проверки на
/// горячем пути».
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalType {
    name: &'static str,
    type_id: TypeId,
}

impl ExternalType {
    /// Регистрирует тип `T` под именем, используемым в `types_filter`.
    pub fn of<T: Any>(name: &'static str) -> Self {
        Self {
            name,
            type_id: TypeId::of::<T>(),
        }
    }

    /// Имя типа в конфигурации.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }
}

/// Строит действующее множество публикуемых типов: вселенная минус фильтр.
/// Имена фильтра, не входящие во вселенную, ни на что не влияют и только
/// логируются.
pub(crate) fn publishable_types(
    universe: &[ExternalType],
    types_filter: &[String],
) -> HashSet<TypeId> {
    for name in types_filter {
        if !universe.iter().any(|t| t.name() == name) {
            warn!("types_filter entry '{name}' is not an external publishing type");
        }
    }

    universe
        .iter()
        .filter(|t| !types_filter.iter().any(|name| name == t.name()))
        .map(|t| t.type_id())
        .collect()
}

/// Сериализатор полезной нагрузки для внешней публикации.
///
/// Реализация обязана узнавать конкретный тип сообщения; незнакомый тип —
/// это `BusError::Serialization`, который шина логирует и глотает.
pub trait PayloadSerializer {
    fn serialize(
        &self,
        message: &dyn Any,
    ) -> Result<Bytes, BusError>;
}

/// Внешний приёмник сериализованных сообщений — слепой байтовый сток.
///
/// Шина вызывает `publish` не более одного раза на публикацию, строго после
/// всех внутрипроцессных обработчиков, и не предполагает ни долговечности,
/// ни подтверждений: вызов обязан просто вернуться.
pub trait ExternalSink {
    fn publish(
        &mut self,
        message: BusMessage,
    );

    /// Освобождает нативный хэндл. Шина вызывает это при разрушении.
    fn close(&mut self) {}
}

type EncodeFn = Box<dyn Fn(&dyn Any) -> Result<Bytes, BusError>>;

/// JSON-сериализатор поверх serde для заранее зарегистрированных типов.
#[derive(Default)]
pub struct JsonSerializer {
    encoders: HashMap<TypeId, EncodeFn>,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует кодировщик для типа `T`.
    pub fn with_type<T>(mut self) -> Self
    where
        T: Serialize + Any,
    {
        self.encoders.insert(
            TypeId::of::<T>(),
            Box::new(|message: &dyn Any| {
                let value = message.downcast_ref::<T>().ok_or_else(|| {
                    BusError::Serialization("message type does not match encoder".to_string())
                })?;
                serde_json::to_vec(value)
                    .map(Bytes::from)
                    .map_err(|e| BusError::Serialization(e.to_string()))
            }),
        );
        self
    }
}

impl PayloadSerializer for JsonSerializer {
    fn serialize(
        &self,
        message: &dyn Any,
    ) -> Result<Bytes, BusError> {
        match self.encoders.get(&message.type_id()) {
            Some(encode) => encode(message),
            None => Err(BusError::Serialization(
                "no encoder registered for message type".to_string(),
            )),
        }
    }
}
