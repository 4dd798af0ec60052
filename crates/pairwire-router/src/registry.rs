use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::handler::NativeHandler;

/// One registered handler.
pub enum Route<C> {
    Native(Arc<dyn NativeHandler>),
    Script(C),
}

impl<C: Clone> Clone for Route<C> {
    fn clone(&self) -> Self {
        match self {
            Route::Native(handler) => Route::Native(Arc::clone(handler)),
            Route::Script(closure) => Route::Script(closure.clone()),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for Route<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Native(handler) => f
                .debug_tuple("Native")
                .field(&Arc::as_ptr(handler).cast::<()>())
                .finish(),
            Route::Script(closure) => f.debug_tuple("Script").field(closure).finish(),
        }
    }
}

/// Label to handlers, in registration order.
///
/// A label is present exactly while at least one handler is registered
/// for it.
pub struct Registry<C> {
    routes: HashMap<String, Vec<Route<C>>>,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }
}

impl<C: Clone + PartialEq> Registry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_native(&mut self, label: impl Into<String>, handler: Arc<dyn NativeHandler>) {
        self.routes
            .entry(label.into())
            .or_default()
            .push(Route::Native(handler));
    }

    pub fn register_script(&mut self, label: impl Into<String>, closure: C) {
        self.routes
            .entry(label.into())
            .or_default()
            .push(Route::Script(closure));
    }

    /// Remove the first registration of this exact handler `Arc`.
    pub fn unregister_native(&mut self, label: &str, handler: &Arc<dyn NativeHandler>) -> bool {
        let target = Arc::as_ptr(handler).cast::<()>();
        self.remove_first(label, |route| match route {
            Route::Native(h) => Arc::as_ptr(h).cast::<()>() == target,
            Route::Script(_) => false,
        })
    }

    /// Remove the first script registration equal to `closure`.
    pub fn unregister_script(&mut self, label: &str, closure: &C) -> bool {
        self.remove_first(label, |route| match route {
            Route::Native(_) => false,
            Route::Script(c) => c == closure,
        })
    }

    fn remove_first(&mut self, label: &str, matches: impl Fn(&Route<C>) -> bool) -> bool {
        let Some(list) = self.routes.get_mut(label) else {
            return false;
        };
        let Some(index) = list.iter().position(matches) else {
            return false;
        };
        list.remove(index);
        if list.is_empty() {
            self.routes.remove(label);
        }
        true
    }

    /// Handlers for `label` in dispatch order: natives, then scripts.
    pub fn snapshot(&self, label: &str) -> Vec<Route<C>> {
        let Some(list) = self.routes.get(label) else {
            return Vec::new();
        };
        let natives = list.iter().filter(|r| matches!(r, Route::Native(_)));
        let scripts = list.iter().filter(|r| matches!(r, Route::Script(_)));
        natives.chain(scripts).cloned().collect()
    }

    /// Labels with at least one handler, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.routes.keys().cloned().collect();
        labels.sort();
        labels
    }

    pub fn handler_count(&self, label: &str) -> usize {
        self.routes.get(label).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    fn noop() -> Arc<dyn NativeHandler> {
        handler_fn(|_| Ok(()))
    }

    fn kinds(routes: &[Route<&'static str>]) -> Vec<String> {
        routes
            .iter()
            .map(|r| match r {
                Route::Native(_) => "native".to_string(),
                Route::Script(name) => format!("script:{name}"),
            })
            .collect()
    }

    #[test]
    fn natives_dispatch_before_scripts() {
        let mut registry = Registry::new();
        registry.register_script("x", "first");
        registry.register_native("x", noop());
        registry.register_script("x", "second");
        registry.register_native("x", noop());

        assert_eq!(
            kinds(&registry.snapshot("x")),
            vec!["native", "native", "script:first", "script:second"]
        );
    }

    #[test]
    fn labels_are_exact_and_case_sensitive() {
        let mut registry: Registry<&'static str> = Registry::new();
        registry.register_native("Chat", noop());
        assert!(registry.snapshot("chat").is_empty());
        assert!(registry.snapshot("Chat ").is_empty());
        assert_eq!(registry.handler_count("Chat"), 1);
    }

    #[test]
    fn unregister_native_removes_first_matching_arc_only() {
        let mut registry: Registry<&'static str> = Registry::new();
        let handler = noop();
        let other = noop();
        registry.register_native("x", Arc::clone(&handler));
        registry.register_native("x", Arc::clone(&other));
        registry.register_native("x", Arc::clone(&handler));

        assert!(registry.unregister_native("x", &handler));
        assert_eq!(registry.handler_count("x"), 2);
        assert!(registry.unregister_native("x", &handler));
        assert!(!registry.unregister_native("x", &handler));
        assert_eq!(registry.handler_count("x"), 1);
    }

    #[test]
    fn emptied_label_disappears() {
        let mut registry = Registry::new();
        let handler = noop();
        registry.register_native("a", Arc::clone(&handler));
        registry.register_script("a", "s");
        registry.register_script("b", "s");
        assert_eq!(registry.labels(), vec!["a", "b"]);

        assert!(registry.unregister_script("a", &"s"));
        assert!(registry.unregister_native("a", &handler));
        assert_eq!(registry.labels(), vec!["b"]);
        assert!(!registry.unregister_script("a", &"s"));
        assert!(!registry.unregister_script("b", &"missing"));
    }
}
