//! Context for the current step
//!

use core::fmt;

use crate::store::StoreKind;

/// Holds the context for the current step. Used for prefixing logs.
#[derive(Default, Debug, Clone, Copy)]
pub struct Context {
    /// The store being worked on.
    pub store: Option<StoreKind>,

    /// The current step.
    pub current_context: &'static str,
}

impl Context {
    /// Context for a step against a store.
    pub fn new(store: StoreKind, current_context: &'static str) -> Self {
        Self {
            store: Some(store),
            current_context,
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(store) = &self.store {
            write!(f, "[{store}] ")?;
        }

        write!(f, "[{}] ", self.current_context)?;

        Ok(())
    }
}
