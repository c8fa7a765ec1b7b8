use std::{any::Any, fmt, rc::Rc, sync::Arc};

use bytes::Bytes;
use uuid::Uuid;

use super::{intern_topic, Handler};

/// Сериализованное сообщение для внешнего приёмника.
///
/// Содержит имя топика и полезную нагрузку в виде байтов. Это единственная
/// форма, в которой сообщения покидают процесс: шина сериализует публикацию
/// и отдаёт конверт внешнему стоку после всех внутрипроцессных обработчиков.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Топик, в который было опубликовано сообщение.
    pub topic: Arc<str>,
    /// Сериализованная полезная нагрузка.
    pub payload: Bytes,
}

impl BusMessage {
    /// Создаёт конверт из топика и полезной нагрузки.
    ///
    /// `topic` — любой тип с `AsRef<str>`, `payload` — любой тип,
    /// преобразуемый в `Bytes` (`Vec<u8>`, `&'static [u8]`, `Bytes`).
    pub fn new<S, P>(
        topic: S,
        payload: P,
    ) -> Self
    where
        S: AsRef<str>,
        P: Into<Bytes>,
    {
        Self {
            topic: intern_topic(topic),
            payload: payload.into(),
        }
    }

    /// Создаёт конверт из статических данных без копирования нагрузки.
    pub fn from_static(
        topic: &'static str,
        payload: &'static [u8],
    ) -> Self {
        Self {
            topic: intern_topic(topic),
            payload: Bytes::from_static(payload),
        }
    }

    /// Размер полезной нагрузки в байтах.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Запрос к endpoint с корреляцией ответа.
///
/// Шина запоминает `callback` под ключом `id` и доставляет сам запрос
/// обработчику endpoint; ответ с тем же correlation id вернётся в колбэк.
#[derive(Clone)]
pub struct Request {
    /// Уникальный идентификатор запроса.
    pub id: Uuid,
    /// Колбэк, который получит ответ.
    pub callback: Handler,
    /// Полезная нагрузка запроса; обработчик endpoint приводит её к
    /// ожидаемому конкретному типу.
    pub payload: Rc<dyn Any>,
}

impl Request {
    pub fn new<P: Any>(
        id: Uuid,
        callback: Handler,
        payload: P,
    ) -> Self {
        Self {
            id,
            callback,
            payload: Rc::new(payload),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("callback", &self.callback)
            .finish_non_exhaustive()
    }
}

/// Ответ на ранее отправленный запрос.
#[derive(Clone)]
pub struct Response {
    /// Идентификатор запроса, на который отвечаем.
    pub correlation_id: Uuid,
    /// Полезная нагрузка ответа.
    pub payload: Rc<dyn Any>,
}

impl Response {
    pub fn new<P: Any>(
        correlation_id: Uuid,
        payload: P,
    ) -> Self {
        Self {
            correlation_id,
            payload: Rc::new(payload),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Response")
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}
