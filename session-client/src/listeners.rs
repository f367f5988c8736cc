//! 监听器注册表
//!
//! 按事件名保存有序的回调列表；每个回调在独立的 panic 边界内执行

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::error;

/// 监听器回调类型
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// 事件名 → 回调列表
pub struct ListenerRegistry<T> {
    listeners: Mutex<HashMap<String, Vec<Listener<T>>>>,
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Vec<Listener<T>>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 注册回调，返回的句柄用于 [`ListenerRegistry::unsubscribe`]
    pub fn subscribe<F>(&self, event: &str, callback: F) -> Listener<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let listener: Listener<T> = Arc::new(callback);
        self.subscribe_listener(event, listener.clone());
        listener
    }

    /// 注册已有句柄；同一句柄可重复注册，会被触发多次
    pub fn subscribe_listener(&self, event: &str, listener: Listener<T>) {
        self.entries()
            .entry(event.to_string())
            .or_default()
            .push(listener);
    }

    /// 按指针相等移除一次注册；不存在时什么也不做
    pub fn unsubscribe(&self, event: &str, listener: &Listener<T>) {
        let mut entries = self.entries();
        if let Some(list) = entries.get_mut(event) {
            if let Some(pos) = list.iter().position(|l| Arc::ptr_eq(l, listener)) {
                list.remove(pos);
            }
            if list.is_empty() {
                entries.remove(event);
            }
        }
    }

    /// 按注册顺序调用该事件的所有回调，返回是否存在监听器
    ///
    /// 回调在快照上执行，锁不会跨回调持有
    pub fn emit(&self, event: &str, payload: &T) -> bool {
        let snapshot: Vec<Listener<T>> = match self.entries().get(event) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return false,
        };

        for listener in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                error!(
                    "[ListenerRegistry] Listener for '{}' panicked: {}",
                    event,
                    panic_message(panic.as_ref())
                );
            }
        }
        true
    }

    /// 清空某个事件的监听器；`None` 时清空全部
    pub fn clear(&self, event: Option<&str>) {
        let mut entries = self.entries();
        match event {
            Some(name) => {
                entries.remove(name);
            }
            None => entries.clear(),
        }
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.entries().get(event).map(Vec::len).unwrap_or(0)
    }
}

/// 取出 panic 携带的文本
fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "<non-string panic payload>"
    }
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_without_listeners() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        assert!(!registry.emit("tick", &1));
    }

    #[test]
    fn test_emit_in_registration_order() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            registry.subscribe("tick", move |v| seen.lock().unwrap().push((tag, *v)));
        }

        assert!(registry.emit("tick", &7));
        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7), ("c", 7)]);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        registry.subscribe("tick", |_| panic!("listener blew up"));
        let counter = hits.clone();
        registry.subscribe("tick", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.emit("tick", &1));
        assert!(registry.emit("tick", &2));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panic_message_extracts_text() {
        let literal = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(literal.as_ref()), "boom");

        let formatted = catch_unwind(|| panic!("bad frame {}", 7)).unwrap_err();
        assert_eq!(panic_message(formatted.as_ref()), "bad frame 7");

        let opaque = catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(opaque.as_ref()), "<non-string panic payload>");
    }

    #[test]
    fn test_duplicate_registration_fires_twice() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let listener = registry.subscribe("tick", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry.subscribe_listener("tick", listener.clone());

        registry.emit("tick", &0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        registry.unsubscribe("tick", &listener);
        registry.emit("tick", &0);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(registry.listener_count("tick"), 1);
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        let stray: Listener<u32> = Arc::new(|_| {});
        registry.unsubscribe("missing", &stray);
        registry.subscribe("tick", |_| {});
        registry.unsubscribe("tick", &stray);
        assert_eq!(registry.listener_count("tick"), 1);
    }

    #[test]
    fn test_clear_one_and_all() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        registry.subscribe("a", |_| {});
        registry.subscribe("b", |_| {});

        registry.clear(Some("a"));
        assert_eq!(registry.listener_count("a"), 0);
        assert_eq!(registry.listener_count("b"), 1);

        registry.clear(None);
        assert!(!registry.emit("b", &0));
    }

    #[test]
    fn test_listener_can_subscribe_during_emit() {
        let registry: Arc<ListenerRegistry<u32>> = Arc::new(ListenerRegistry::new());
        let inner = registry.clone();
        registry.subscribe("tick", move |_| {
            inner.subscribe("tock", |_| {});
        });

        registry.emit("tick", &0);
        assert_eq!(registry.listener_count("tock"), 1);
    }
}
