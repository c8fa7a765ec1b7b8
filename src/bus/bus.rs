use std::{
    any::{Any, TypeId},
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use indexmap::IndexMap;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{
    external::publishable_types, intern_topic, is_match, BusMessage, ExternalSink, ExternalType,
    Handler, PayloadSerializer, Request, Response, Subscription,
};
use crate::{config::BusConfig, error::BusError};

/// Имя компонента по умолчанию.
const DEFAULT_NAME: &str = "MessageBus";

/// Внутрипроцессная шина сообщений торговой платформы.
///
/// Один реестр обслуживает три паттерна обмена:
/// - `send` — point-to-point по имени endpoint;
/// - `request`/`response` — корреляция запроса с колбэком ответа,
///   доставка ответа не более одного раза;
/// - `publish`/`subscribe` — топики с шаблонами `*` и `?`.
///
/// Резолюция топика мемоизируется: первый `publish` в топик сканирует
/// индекс подписок и записывает отсортированный список совпадений в кеш,
/// последующие публикации идут по кешу. subscribe/unsubscribe переписывают
/// затронутые записи кеша, так что кеш всегда согласован с индексом.
///
/// Шина однопоточная и не потокобезопасная: внутри `Rc`/`RefCell`, снаружи —
/// контракт «все вызовы из потока событийного цикла». Обработчики вызываются
/// синхронно и могут повторно входить в шину: диспетчеризация всегда идёт по
/// снимку кешированного списка, снятому до первого вызова.
pub struct MessageBus {
    /// Идентификатор трейдера, которому принадлежит шина.
    trader_id: Arc<str>,
    /// Уникальный идентификатор экземпляра.
    instance_id: Uuid,
    /// Имя компонента.
    name: String,

    /// endpoint -> обработчик (point-to-point).
    endpoints: RefCell<IndexMap<Arc<str>, Handler>>,
    /// request id -> колбэк ответа.
    correlation: RefCell<HashMap<Uuid, Handler>>,
    /// Подписка -> отсортированный список конкретных топиков, в чьих
    /// кешированных резолюциях она сейчас состоит.
    subscriptions: RefCell<IndexMap<Subscription, Vec<Arc<str>>>>,
    /// Конкретный топик -> подписки по убыванию приоритета.
    cache: RefCell<HashMap<Arc<str>, Vec<Subscription>>>,

    serializer: Option<Box<dyn PayloadSerializer>>,
    sink: RefCell<Option<Box<dyn ExternalSink>>>,
    /// Действующее множество типов внешней публикации:
    /// вселенная минус types_filter, вычислено при создании.
    publishable: HashSet<TypeId>,
    has_backing: bool,

    sent_count: Cell<u64>,
    req_count: Cell<u64>,
    res_count: Cell<u64>,
    pub_count: Cell<u64>,
}

impl MessageBus {
    /// Создаёт шину с настройками по умолчанию: без внешней базы,
    /// без сериализатора, с сгенерированным instance id.
    pub fn new<S: AsRef<str>>(trader_id: S) -> Result<Self, BusError> {
        Self::builder(trader_id).build()
    }

    /// Построитель шины.
    pub fn builder<S: AsRef<str>>(trader_id: S) -> MessageBusBuilder {
        MessageBusBuilder::new(trader_id.as_ref())
    }

    // -------------------------------------------------------------------------
    //  Point-to-point
    // -------------------------------------------------------------------------

    /// Регистрирует обработчик за именем endpoint.
    /// На каждый endpoint допускается ровно один обработчик.
    pub fn register(
        &self,
        endpoint: &str,
        handler: Handler,
    ) -> Result<(), BusError> {
        if endpoint.is_empty() {
            return Err(BusError::InvalidArgument("endpoint name is empty".into()));
        }

        let mut endpoints = self.endpoints.borrow_mut();
        if endpoints.contains_key(endpoint) {
            return Err(BusError::AlreadyRegistered(endpoint.to_string()));
        }

        debug!("Registering endpoint '{endpoint}' with handler '{}'", handler.id());
        endpoints.insert(intern_topic(endpoint), handler);
        Ok(())
    }

    /// Снимает регистрацию endpoint. Переданный обработчик обязан совпадать
    /// по идентичности с зарегистрированным.
    pub fn deregister(
        &self,
        endpoint: &str,
        handler: &Handler,
    ) -> Result<(), BusError> {
        if endpoint.is_empty() {
            return Err(BusError::InvalidArgument("endpoint name is empty".into()));
        }

        let mut endpoints = self.endpoints.borrow_mut();
        let registered = endpoints
            .get(endpoint)
            .ok_or_else(|| BusError::NotRegistered(endpoint.to_string()))?;
        if registered != handler {
            return Err(BusError::HandlerMismatch {
                endpoint: endpoint.to_string(),
                handler: handler.id().to_string(),
            });
        }

        endpoints.shift_remove(endpoint);
        debug!("Deregistered endpoint '{endpoint}'");
        Ok(())
    }

    /// Доставляет сообщение обработчику endpoint.
    /// Неизвестный endpoint логируется и не считается доставкой.
    pub fn send(
        &self,
        endpoint: &str,
        message: &dyn Any,
    ) -> Result<(), BusError> {
        if endpoint.is_empty() {
            return Err(BusError::InvalidArgument("endpoint name is empty".into()));
        }

        let handler = self.endpoints.borrow().get(endpoint).cloned();
        let Some(handler) = handler else {
            error!("send: no registered endpoint '{endpoint}'");
            return Ok(());
        };

        handler.call(message);
        self.sent_count.set(self.sent_count.get() + 1);
        Ok(())
    }

    // -------------------------------------------------------------------------
    //  Request / response
    // -------------------------------------------------------------------------

    /// Отправляет запрос обработчику endpoint, запоминая колбэк ответа
    /// под `request.id`. Повторный запрос с живым id логируется и
    /// отбрасывается целиком.
    pub fn request(
        &self,
        endpoint: &str,
        request: &Request,
    ) -> Result<(), BusError> {
        if endpoint.is_empty() {
            return Err(BusError::InvalidArgument("endpoint name is empty".into()));
        }

        {
            let mut correlation = self.correlation.borrow_mut();
            if correlation.contains_key(&request.id) {
                error!("request: id '{}' is already pending", request.id);
                return Ok(());
            }
            // Корреляция записывается до поиска endpoint: запрос к ещё не
            // зарегистрированному сервису оставляет живую запись, и поздно
            // поднявшийся сервис всё ещё может быть отвечен.
            correlation.insert(request.id, request.callback.clone());
        }

        let handler = self.endpoints.borrow().get(endpoint).cloned();
        let Some(handler) = handler else {
            error!("request: no registered endpoint '{endpoint}'");
            return Ok(());
        };

        handler.call(request);
        self.req_count.set(self.req_count.get() + 1);
        Ok(())
    }

    /// Доставляет ответ колбэку, сохранённому под `response.correlation_id`.
    /// Запись корреляции снимается до вызова колбэка, поэтому доставка
    /// не более чем однократная.
    pub fn response(
        &self,
        response: &Response,
    ) {
        let callback = self
            .correlation
            .borrow_mut()
            .remove(&response.correlation_id);
        let Some(callback) = callback else {
            error!(
                "response: no pending request with correlation id '{}'",
                response.correlation_id
            );
            return;
        };

        callback.call(response);
        self.res_count.set(self.res_count.get() + 1);
    }

    // -------------------------------------------------------------------------
    //  Publish / subscribe
    // -------------------------------------------------------------------------

    /// Подписывает обработчик на шаблон топика.
    ///
    /// Дубликат `(pattern, handler)` логируется и отбрасывается; приоритет
    /// существующей подписки при этом не меняется. Все уже кешированные
    /// топики, которые покрывает шаблон, получают переписанную резолюцию.
    pub fn subscribe(
        &self,
        pattern: &str,
        handler: Handler,
        priority: u8,
    ) -> Result<(), BusError> {
        if pattern.is_empty() {
            return Err(BusError::InvalidArgument(
                "subscription pattern is empty".into(),
            ));
        }

        let sub = Subscription::new(intern_topic(pattern), handler, priority);

        let mut subscriptions = self.subscriptions.borrow_mut();
        if subscriptions.contains_key(&sub) {
            warn!("subscribe: {sub:?} already exists, priority not updated");
            return Ok(());
        }

        let mut matched = Vec::new();
        let mut cache = self.cache.borrow_mut();
        for (topic, subs) in cache.iter_mut() {
            if is_match(topic, sub.pattern()) {
                subs.push(sub.clone());
                subs.sort_by(|a, b| b.priority().cmp(&a.priority()));
                matched.push(topic.clone());
            }
        }
        matched.sort();

        debug!(
            "Subscribed {sub:?}, rewrote {} cached resolution(s)",
            matched.len()
        );
        subscriptions.insert(sub, matched);
        Ok(())
    }

    /// Снимает подписку `(pattern, handler)`.
    ///
    /// Подписка удаляется из резолюции каждого топика, помеченного в её
    /// записи индекса. Опустевшие записи кеша сохраняются: публикация в
    /// такой топик диспетчеризуется в никуда, что корректно.
    pub fn unsubscribe(
        &self,
        pattern: &str,
        handler: &Handler,
    ) -> Result<(), BusError> {
        if pattern.is_empty() {
            return Err(BusError::InvalidArgument(
                "subscription pattern is empty".into(),
            ));
        }

        let probe = Subscription::new(intern_topic(pattern), handler.clone(), 0);

        let mut subscriptions = self.subscriptions.borrow_mut();
        let Some(topics) = subscriptions.shift_remove(&probe) else {
            warn!(
                "unsubscribe: no subscription for pattern '{pattern}' and handler '{}'",
                handler.id()
            );
            return Ok(());
        };

        let mut cache = self.cache.borrow_mut();
        for topic in &topics {
            if let Some(subs) = cache.get_mut(topic) {
                subs.retain(|s| s != &probe);
            }
        }

        debug!("Unsubscribed handler '{}' from '{pattern}'", handler.id());
        Ok(())
    }

    /// Публикует сообщение в конкретный топик.
    ///
    /// Обработчики вызываются в порядке убывания приоритета по снимку
    /// кешированной резолюции; промах кеша запускает резолюцию. После всех
    /// внутрипроцессных обработчиков сообщение при необходимости
    /// сериализуется и уходит во внешний сток.
    pub fn publish(
        &self,
        topic: &str,
        message: &dyn Any,
    ) -> Result<(), BusError> {
        if topic.is_empty() {
            return Err(BusError::InvalidArgument("topic is empty".into()));
        }

        let snapshot = self.matching_subscriptions(topic);
        for sub in &snapshot {
            sub.handler().call(message);
        }

        self.emit_external(topic, message);
        self.pub_count.set(self.pub_count.get() + 1);
        Ok(())
    }

    /// Снимок резолюции топика; при промахе кеша выполняет резолюцию.
    fn matching_subscriptions(
        &self,
        topic: &str,
    ) -> Vec<Subscription> {
        if let Some(subs) = self.cache.borrow().get(topic) {
            return subs.clone();
        }
        self.resolve(topic)
    }

    /// Сканирует индекс подписок, строит отсортированную резолюцию топика,
    /// записывает её в кеш и помечает каждую совпавшую подписку этим топиком.
    fn resolve(
        &self,
        topic: &str,
    ) -> Vec<Subscription> {
        let topic = intern_topic(topic);

        let mut subscriptions = self.subscriptions.borrow_mut();
        let mut matching = Vec::new();
        for (sub, topics) in subscriptions.iter_mut() {
            if is_match(&topic, sub.pattern()) {
                matching.push(sub.clone());
                if let Err(pos) = topics.binary_search(&topic) {
                    topics.insert(pos, topic.clone());
                }
            }
        }
        matching.sort_by(|a, b| b.priority().cmp(&a.priority()));

        debug!(
            "Resolved topic '{topic}' to {} subscription(s)",
            matching.len()
        );
        self.cache.borrow_mut().insert(topic, matching.clone());
        matching
    }

    /// Отдаёт сериализованную публикацию внешнему стоку, если он настроен,
    /// сериализатор задан и конкретный тип сообщения публикуем вовне.
    fn emit_external(
        &self,
        topic: &str,
        message: &dyn Any,
    ) {
        if !self.has_backing || !self.publishable.contains(&message.type_id()) {
            return;
        }
        let Some(serializer) = &self.serializer else {
            return;
        };
        let mut sink = self.sink.borrow_mut();
        let Some(sink) = sink.as_mut() else {
            return;
        };

        match serializer.serialize(message) {
            Ok(payload) => sink.publish(BusMessage::new(topic, payload)),
            Err(e) => error!("publish: failed to serialize message for topic '{topic}': {e}"),
        }
    }

    // -------------------------------------------------------------------------
    //  Интроспекция
    // -------------------------------------------------------------------------

    /// Идентификатор трейдера.
    pub fn trader_id(&self) -> &str {
        &self.trader_id
    }

    /// Идентификатор экземпляра шины.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Имя компонента.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Включена ли внешняя публикация.
    pub fn has_backing(&self) -> bool {
        self.has_backing
    }

    /// Имена всех зарегистрированных endpoint в порядке регистрации.
    pub fn endpoints(&self) -> Vec<Arc<str>> {
        self.endpoints.borrow().keys().cloned().collect()
    }

    /// Зарегистрирован ли endpoint.
    pub fn is_registered(
        &self,
        endpoint: &str,
    ) -> bool {
        self.endpoints.borrow().contains_key(endpoint)
    }

    /// Отсортированные уникальные шаблоны активных подписок.
    pub fn topics(&self) -> Vec<Arc<str>> {
        let mut patterns: Vec<Arc<str>> = self
            .subscriptions
            .borrow()
            .keys()
            .map(|sub| sub.pattern_arc().clone())
            .collect();
        patterns.sort();
        patterns.dedup();
        patterns
    }

    /// Подписки, чей шаблон покрывается аргументом (по умолчанию `*` — все).
    pub fn subscriptions(
        &self,
        pattern: Option<&str>,
    ) -> Vec<Subscription> {
        let pattern = pattern.unwrap_or("*");
        self.subscriptions
            .borrow()
            .keys()
            .filter(|sub| is_match(sub.pattern(), pattern))
            .cloned()
            .collect()
    }

    /// Есть ли хотя бы одна подписка, покрываемая шаблоном.
    pub fn has_subscribers(
        &self,
        pattern: &str,
    ) -> bool {
        !self.subscriptions(Some(pattern)).is_empty()
    }

    /// Состоит ли `(pattern, handler)` в индексе подписок.
    pub fn is_subscribed(
        &self,
        pattern: &str,
        handler: &Handler,
    ) -> bool {
        let probe = Subscription::new(intern_topic(pattern), handler.clone(), 0);
        self.subscriptions.borrow().contains_key(&probe)
    }

    /// Ожидает ли запрос с данным id ответа.
    pub fn is_pending_request(
        &self,
        id: &Uuid,
    ) -> bool {
        self.correlation.borrow().contains_key(id)
    }

    /// Число успешных point-to-point доставок.
    pub fn sent_count(&self) -> u64 {
        self.sent_count.get()
    }

    /// Число успешно отправленных запросов.
    pub fn req_count(&self) -> u64 {
        self.req_count.get()
    }

    /// Число успешно доставленных ответов.
    pub fn res_count(&self) -> u64 {
        self.res_count.get()
    }

    /// Число публикаций.
    pub fn pub_count(&self) -> u64 {
        self.pub_count.get()
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("trader_id", &self.trader_id)
            .field("instance_id", &self.instance_id)
            .field("name", &self.name)
            .field("endpoints", &self.endpoints.borrow().len())
            .field("subscriptions", &self.subscriptions.borrow().len())
            .field("has_backing", &self.has_backing)
            .finish_non_exhaustive()
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.get_mut().as_mut() {
            sink.close();
        }
    }
}

/// Построитель [`MessageBus`].
pub struct MessageBusBuilder {
    trader_id: Arc<str>,
    instance_id: Option<Uuid>,
    name: Option<String>,
    serializer: Option<Box<dyn PayloadSerializer>>,
    sink: Option<Box<dyn ExternalSink>>,
    publish_types: Vec<ExternalType>,
    has_backing: bool,
    types_filter: Vec<String>,
}

impl MessageBusBuilder {
    fn new(trader_id: &str) -> Self {
        Self {
            trader_id: Arc::from(trader_id),
            instance_id: None,
            name: None,
            serializer: None,
            sink: None,
            publish_types: Vec::new(),
            has_backing: false,
            types_filter: Vec::new(),
        }
    }

    /// Задаёт идентификатор экземпляра; без него генерируется v4.
    pub fn instance_id(
        mut self,
        id: Uuid,
    ) -> Self {
        self.instance_id = Some(id);
        self
    }

    /// Задаёт имя компонента.
    pub fn name<S: Into<String>>(
        mut self,
        name: S,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Задаёт сериализатор полезной нагрузки для внешней публикации.
    pub fn serializer(
        mut self,
        serializer: Box<dyn PayloadSerializer>,
    ) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Задаёт хэндл внешнего стока, собранный платформой из
    /// `DatabaseConfig`.
    pub fn sink(
        mut self,
        sink: Box<dyn ExternalSink>,
    ) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Задаёт вселенную типов, публикуемых вовне.
    pub fn publish_types<I>(
        mut self,
        types: I,
    ) -> Self
    where
        I: IntoIterator<Item = ExternalType>,
    {
        self.publish_types = types.into_iter().collect();
        self
    }

    /// Применяет конфигурацию шины. `types_filter` вычерпывается из
    /// переданной конфигурации: он одноразовый и после создания шины
    /// не читается.
    pub fn config(
        mut self,
        config: &mut BusConfig,
    ) -> Self {
        self.has_backing = config.database.is_some();
        self.types_filter = config.types_filter.drain(..).collect();
        self
    }

    pub fn build(self) -> Result<MessageBus, BusError> {
        if self.trader_id.is_empty() {
            return Err(BusError::InvalidArgument("trader id is empty".into()));
        }
        let name = self.name.unwrap_or_else(|| DEFAULT_NAME.to_string());
        if name.is_empty() {
            return Err(BusError::InvalidArgument("bus name is empty".into()));
        }

        let publishable = publishable_types(&self.publish_types, &self.types_filter);

        let sink = if self.has_backing {
            self.sink
        } else {
            if self.sink.is_some() {
                warn!("external sink provided without database configuration, backing disabled");
            }
            None
        };

        Ok(MessageBus {
            trader_id: self.trader_id,
            instance_id: self.instance_id.unwrap_or_else(Uuid::new_v4),
            name,
            endpoints: RefCell::new(IndexMap::new()),
            correlation: RefCell::new(HashMap::new()),
            subscriptions: RefCell::new(IndexMap::new()),
            cache: RefCell::new(HashMap::new()),
            serializer: self.serializer,
            sink: RefCell::new(sink),
            publishable,
            has_backing: self.has_backing,
            sent_count: Cell::new(0),
            req_count: Cell::new(0),
            res_count: Cell::new(0),
            pub_count: Cell::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    fn bus() -> MessageBus {
        MessageBus::new("TRADER-001").unwrap()
    }

    fn noop(id: &str) -> Handler {
        Handler::new(id, |_| {})
    }

    /// Построитель валидирует пустые идентификаторы.
    #[test]
    fn builder_rejects_empty_arguments() {
        assert!(matches!(
            MessageBus::new("").unwrap_err(),
            BusError::InvalidArgument(_)
        ));
        assert!(matches!(
            MessageBus::builder("TRADER-001").name("").build().unwrap_err(),
            BusError::InvalidArgument(_)
        ));
    }

    /// Без явного instance id генерируется уникальный.
    #[test]
    fn instance_id_generated_when_absent() {
        let a = bus();
        let b = bus();
        assert_ne!(a.instance_id(), b.instance_id());
        assert_eq!(a.name(), "MessageBus");
        assert_eq!(a.trader_id(), "TRADER-001");
    }

    /// Повторная регистрация endpoint — ошибка.
    #[test]
    fn register_rejects_duplicate_endpoint() {
        let bus = bus();
        bus.register("risk", noop("a")).unwrap();
        assert_eq!(
            bus.register("risk", noop("b")).unwrap_err(),
            BusError::AlreadyRegistered("risk".to_string())
        );

        bus.register("exec", noop("c")).unwrap();
        let endpoints = bus.endpoints();
        let names: Vec<&str> = endpoints.iter().map(|e| &**e).collect();
        assert_eq!(names, vec!["risk", "exec"]);
    }

    /// deregister сверяет идентичность обработчика.
    #[test]
    fn deregister_checks_handler_identity() {
        let bus = bus();
        bus.register("risk", noop("a")).unwrap();

        assert!(matches!(
            bus.deregister("risk", &noop("b")).unwrap_err(),
            BusError::HandlerMismatch { .. }
        ));
        bus.deregister("risk", &noop("a")).unwrap();
        assert!(matches!(
            bus.deregister("risk", &noop("a")).unwrap_err(),
            BusError::NotRegistered(_)
        ));
        assert!(!bus.is_registered("risk"));
    }

    /// send в неизвестный endpoint не падает и не меняет счётчик.
    #[test]
    fn send_to_unknown_endpoint_is_non_fatal() {
        let bus = bus();
        bus.send("nope", &1u32).unwrap();
        assert_eq!(bus.sent_count(), 0);
    }

    /// send доставляет сообщение и инкрементирует счётчик.
    #[test]
    fn send_dispatches_and_counts() {
        let bus = bus();
        let received = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        bus.register(
            "exec",
            Handler::new("exec", move |msg| {
                let value = *msg.downcast_ref::<u32>().unwrap();
                received_clone.borrow_mut().push(value);
            }),
        )
        .unwrap();

        bus.send("exec", &7u32).unwrap();
        bus.send("exec", &8u32).unwrap();
        assert_eq!(*received.borrow(), vec![7, 8]);
        assert_eq!(bus.sent_count(), 2);
    }

    /// Пустой topic/endpoint/pattern — InvalidArgument во всех точках входа.
    #[test]
    fn empty_names_are_invalid_arguments() {
        let bus = bus();
        assert!(bus.register("", noop("a")).is_err());
        assert!(bus.deregister("", &noop("a")).is_err());
        assert!(bus.send("", &1u32).is_err());
        assert!(bus.subscribe("", noop("a"), 0).is_err());
        assert!(bus.unsubscribe("", &noop("a")).is_err());
        assert!(bus.publish("", &1u32).is_err());
        let request = Request::new(Uuid::new_v4(), noop("cb"), 1u32);
        assert!(bus.request("", &request).is_err());
    }

    /// Публикация без подписчиков всё равно считается публикацией.
    #[test]
    fn publish_without_subscribers_counts() {
        let bus = bus();
        bus.publish("data.trade", &1u32).unwrap();
        assert_eq!(bus.pub_count(), 1);
    }

    /// Интроспекция: topics отсортирован и уникален, subscriptions
    /// фильтруется шаблоном.
    #[test]
    fn introspection_lists_patterns() {
        let bus = bus();
        bus.subscribe("data.trade", noop("a"), 0).unwrap();
        bus.subscribe("data.*", noop("b"), 0).unwrap();
        bus.subscribe("events.order", noop("c"), 0).unwrap();

        let topics = bus.topics();
        let rendered: Vec<&str> = topics.iter().map(|t| &**t).collect();
        assert_eq!(rendered, vec!["data.*", "data.trade", "events.order"]);

        assert_eq!(bus.subscriptions(None).len(), 3);
        assert_eq!(bus.subscriptions(Some("data.*")).len(), 2);
        assert!(bus.has_subscribers("events.*"));
        assert!(!bus.has_subscribers("fills.*"));
        assert!(bus.is_subscribed("data.*", &noop("b")));
        assert!(!bus.is_subscribed("data.*", &noop("z")));
    }
}
