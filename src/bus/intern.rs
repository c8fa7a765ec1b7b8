use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Пул повторного использования `Arc<str>` для топиков и шаблонов подписок.
/// Ключи кеша резолюции, аннотации индекса подписок и конверты внешней
/// публикации делят одну аллокацию на каждое различное имя.
static TOPIC_INTERN: Lazy<DashMap<String, Arc<str>>> = Lazy::new(DashMap::new);

/// Возвращает interned `Arc<str>` для данного топика или шаблона.
/// При первом вызове для нового имени создаёт `Arc<str>` и сохраняет в пуле.
#[inline(always)]
pub(crate) fn intern_topic<S: AsRef<str>>(topic: S) -> Arc<str> {
    let key = topic.as_ref();
    if let Some(existing) = TOPIC_INTERN.get(key) {
        return existing.clone();
    }
    let arc: Arc<str> = Arc::from(key);
    TOPIC_INTERN.insert(key.to_string(), arc.clone());
    arc
}
