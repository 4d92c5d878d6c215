//! Post-commit mutation handlers + registry.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::IndexerError;
use crate::store::AppliedMutation;

/// Trait for user-provided handlers of applied mutations.
///
/// Handlers run after the page transaction commits, so they only ever see
/// durable state. A failing handler does not roll anything back.
#[async_trait]
pub trait MutationHandler: Send + Sync {
    async fn handle(&self, mutation: &AppliedMutation, page: u32) -> Result<(), IndexerError>;

    /// Name used in logs when the handler fails.
    fn name(&self) -> &str;
}

/// Registry of mutation handlers, called in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn MutationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_mutation(&mut self, handler: Arc<dyn MutationHandler>) {
        self.handlers.push(handler);
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch each mutation to every handler. Handler errors are logged
    /// and do not stop delivery to the remaining handlers.
    pub async fn dispatch(&self, mutations: &[AppliedMutation], page: u32) {
        for mutation in mutations {
            for handler in &self.handlers {
                if let Err(e) = handler.handle(mutation, page).await {
                    tracing::warn!(
                        handler = handler.name(),
                        username = mutation.username(),
                        error = %e,
                        "mutation handler failed"
                    );
                }
            }
        }
    }
}
