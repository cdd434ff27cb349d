//! Action handlers and the registry mapping `(component, action)` to them.

pub mod context;
pub mod echo;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use switchboard_core::ComponentDescriptor;
use tracing::debug;

pub use context::ActionContext;

use crate::errors::HandlerError;

/// Trait implemented by every action handler.
///
/// The returned value is normalized into the `{success, error?, ...}`
/// result contract; an `Err` becomes a failed result carrying its message.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute the action.
    async fn handle(&self, ctx: &ActionContext, payload: Value) -> Result<Value, HandlerError>;
}

/// A closure-backed [`ActionHandler`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as an [`ActionHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(ActionContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(ActionContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn handle(&self, ctx: &ActionContext, payload: Value) -> Result<Value, HandlerError> {
        (self.0)(ctx.clone(), payload).await
    }
}

/// A pluggable component: a descriptor plus its actions.
pub trait Component: Send + Sync {
    /// Public description listed to clients.
    fn descriptor(&self) -> ComponentDescriptor;

    /// `(action, handler)` pairs the component serves.
    fn actions(&self) -> Vec<(String, Arc<dyn ActionHandler>)>;
}

/// Registry mapping `(component, action)` pairs to handlers.
///
/// Populated once at startup, then shared read-only.
pub struct HandlerRegistry {
    handlers: HashMap<(String, String), Arc<dyn ActionHandler>>,
    components: BTreeMap<String, ComponentDescriptor>,
    scopes: HashMap<String, BTreeSet<String>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            components: BTreeMap::new(),
            scopes: HashMap::new(),
        }
    }

    /// Register a handler for a `(component, action)` pair, replacing any
    /// previous one.
    pub fn register(&mut self, component: &str, action: &str, handler: impl ActionHandler + 'static) {
        self.register_arc(component, action, Arc::new(handler));
    }

    /// Register a shared handler.
    pub fn register_arc(&mut self, component: &str, action: &str, handler: Arc<dyn ActionHandler>) {
        debug!(component, action, "handler registered");
        let _ = self
            .handlers
            .insert((component.to_owned(), action.to_owned()), handler);
    }

    /// Record a component's public descriptor.
    pub fn describe(&mut self, descriptor: ComponentDescriptor) {
        let _ = self.components.insert(descriptor.id.clone(), descriptor);
    }

    /// Register a component's descriptor and all its actions.
    pub fn install(&mut self, component: &dyn Component) {
        let descriptor = component.descriptor();
        let id = descriptor.id.clone();
        for (action, handler) in component.actions() {
            self.register_arc(&id, &action, handler);
        }
        self.describe(descriptor);
    }

    /// Make a component available in `scope`.
    ///
    /// A scope with no associations lists every described component.
    pub fn associate(&mut self, scope: &str, component_id: &str) {
        let _ = self
            .scopes
            .entry(scope.to_owned())
            .or_default()
            .insert(component_id.to_owned());
    }

    /// Look up the handler for a pair.
    pub fn get(&self, component: &str, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers
            .get(&(component.to_owned(), action.to_owned()))
            .cloned()
    }

    /// Whether a handler exists for the pair.
    pub fn has_handler(&self, component: &str, action: &str) -> bool {
        self.handlers
            .contains_key(&(component.to_owned(), action.to_owned()))
    }

    /// All registered `(component, action)` pairs, sorted.
    pub fn actions(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self.handlers.keys().cloned().collect();
        pairs.sort();
        pairs
    }

    /// Descriptors of the components available in `scope`, sorted by id.
    pub fn components_for_scope(&self, scope: &str) -> Vec<ComponentDescriptor> {
        match self.scopes.get(scope) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.components.get(id))
                .cloned()
                .collect(),
            None => self.components.values().cloned().collect(),
        }
    }

    /// Descriptor of one component.
    pub fn descriptor(&self, component_id: &str) -> Option<&ComponentDescriptor> {
        self.components.get(component_id)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Constant(Value);

    #[async_trait]
    impl ActionHandler for Constant {
        async fn handle(&self, _ctx: &ActionContext, _payload: Value) -> Result<Value, HandlerError> {
            Ok(self.0.clone())
        }
    }

    struct Chart;

    impl Component for Chart {
        fn descriptor(&self) -> ComponentDescriptor {
            ComponentDescriptor::new("chart", "Chart").requires("svg")
        }

        fn actions(&self) -> Vec<(String, Arc<dyn ActionHandler>)> {
            let render: Arc<dyn ActionHandler> = Arc::new(Constant(json!({"ok": 1})));
            let clear: Arc<dyn ActionHandler> = Arc::new(Constant(Value::Null));
            vec![("render".into(), render), ("clear".into(), clear)]
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = HandlerRegistry::new();
        reg.register("chart", "render", Constant(json!(1)));
        assert!(reg.has_handler("chart", "render"));
        assert!(reg.get("chart", "render").is_some());
        assert!(!reg.has_handler("chart", "other"));
        assert!(reg.get("table", "render").is_none());
    }

    #[test]
    fn install_registers_actions_and_descriptor() {
        let mut reg = HandlerRegistry::new();
        reg.install(&Chart);
        assert_eq!(
            reg.actions(),
            vec![
                ("chart".to_owned(), "clear".to_owned()),
                ("chart".to_owned(), "render".to_owned())
            ]
        );
        assert_eq!(reg.descriptor("chart").unwrap().required_features, vec!["svg"]);
    }

    #[test]
    fn scope_without_associations_lists_everything() {
        let mut reg = HandlerRegistry::new();
        reg.install(&Chart);
        reg.describe(ComponentDescriptor::new("table", "Table"));
        let ids: Vec<String> = reg
            .components_for_scope("any")
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["chart", "table"]);
    }

    #[test]
    fn associated_scope_lists_only_its_components() {
        let mut reg = HandlerRegistry::new();
        reg.install(&Chart);
        reg.describe(ComponentDescriptor::new("table", "Table"));
        reg.associate("agent_1", "table");
        reg.associate("agent_1", "missing");
        let listed = reg.components_for_scope("agent_1");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "table");
        assert_eq!(reg.components_for_scope("agent_2").len(), 2);
    }

    #[test]
    fn re_register_replaces() {
        let mut reg = HandlerRegistry::new();
        reg.register("chart", "render", Constant(json!(1)));
        reg.register("chart", "render", Constant(json!(2)));
        assert_eq!(reg.actions().len(), 1);
    }

    #[tokio::test]
    async fn closure_handler_runs() {
        let handler = handler_fn(|ctx: ActionContext, payload: Value| async move {
            Ok(json!({"action": ctx.action, "echo": payload}))
        });
        let ctx = ActionContext {
            request_id: "req_1".into(),
            component: "chart".into(),
            action: "render".into(),
            origin: None,
            connections: Arc::new(crate::connections::ConnectionRegistry::default()),
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        let out = handler.handle(&ctx, json!(5)).await.unwrap();
        assert_eq!(out, json!({"action": "render", "echo": 5}));
    }
}
