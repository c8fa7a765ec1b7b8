use std::{
    any::Any,
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Счётчик для идентификаторов анонимных обработчиков.
static ANONYMOUS_HANDLER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Именованный синхронный обработчик сообщений.
///
/// Идентичность обработчика задаётся только его `id`: два замыкания с
/// одинаковым телом, но разными `id`, считаются разными обработчиками,
/// а повторная регистрация под тем же `id` — тем же самым.
#[derive(Clone)]
pub struct Handler {
    id: Arc<str>,
    callback: Rc<dyn Fn(&dyn Any)>,
}

impl Handler {
    /// Создаёт обработчик с явным идентификатором.
    pub fn new<S, F>(
        id: S,
        callback: F,
    ) -> Self
    where
        S: AsRef<str>,
        F: Fn(&dyn Any) + 'static,
    {
        Self {
            id: Arc::from(id.as_ref()),
            callback: Rc::new(callback),
        }
    }

    /// Создаёт анонимный обработчик с уникальным идентификатором.
    /// Два эквивалентных замыкания получают разные id и остаются
    /// различимыми для шины.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(&dyn Any) + 'static,
    {
        let seq = ANONYMOUS_HANDLER_SEQ.fetch_add(1, Ordering::Relaxed);
        Self::new(format!("handler-{seq}"), callback)
    }

    /// Идентификатор обработчика.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Синхронно вызывает обработчик с сообщением.
    #[inline]
    pub fn call(
        &self,
        message: &dyn Any,
    ) {
        (self.callback)(message);
    }
}

impl PartialEq for Handler {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.id == other.id
    }
}

impl Eq for Handler {}

impl Hash for Handler {
    fn hash<H: Hasher>(
        &self,
        state: &mut H,
    ) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Handler {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.id).finish()
    }
}

/// Подписка: неизменяемая тройка (шаблон, обработчик, приоритет).
///
/// Идентичность и хеширование используют только `(pattern, handler)`:
/// приоритет исключён намеренно, чтобы повторная подписка с другим
/// приоритетом распознавалась как дубликат. Изменение приоритета — это
/// unsubscribe и новый subscribe.
#[derive(Clone)]
pub struct Subscription {
    pattern: Arc<str>,
    handler: Handler,
    priority: u8,
}

impl Subscription {
    pub(crate) fn new(
        pattern: Arc<str>,
        handler: Handler,
        priority: u8,
    ) -> Self {
        Self {
            pattern,
            handler,
            priority,
        }
    }

    /// Шаблон топика подписки.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub(crate) fn pattern_arc(&self) -> &Arc<str> {
        &self.pattern
    }

    /// Обработчик подписки.
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Приоритет диспетчеризации; больший вызывается раньше.
    pub fn priority(&self) -> u8 {
        self.priority
    }
}

impl PartialEq for Subscription {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.pattern == other.pattern && self.handler == other.handler
    }
}

impl Eq for Subscription {}

impl Hash for Subscription {
    fn hash<H: Hasher>(
        &self,
        state: &mut H,
    ) {
        self.pattern.hash(state);
        self.handler.hash(state);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .field("handler", &self.handler)
            .field("priority", &self.priority)
            .finish()
    }
}
