//! Logical-to-wire method and event name translation.
//!
//! Applications often address remote methods by short logical names while the
//! server expects its own casing or namespacing. The service resolves every
//! command and event name through a [`MethodResolver`] before touching the
//! connection; unknown names are passed through untouched and validated, if at
//! all, by the connection itself.

use std::collections::HashMap;

/// Translates logical names into the wire names the connection expects.
pub trait MethodResolver: Send + Sync {
    /// Resolves `name` to its wire form.
    fn resolve(&self, name: &str) -> String;
}

/// Passthrough resolver: wire names equal logical names.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl MethodResolver for Identity {
    fn resolve(&self, name: &str) -> String {
        name.to_string()
    }
}

/// Explicit overrides table with passthrough for unmapped names.
#[derive(Clone, Debug, Default)]
pub struct MethodMap {
    entries: HashMap<String, String>,
}

impl MethodMap {
    /// Creates an empty map; every name passes through unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a logical-to-wire override.
    pub fn with(mut self, logical: impl Into<String>, wire: impl Into<String>) -> Self {
        self.entries.insert(logical.into(), wire.into());
        self
    }
}

impl MethodResolver for MethodMap {
    fn resolve(&self, name: &str) -> String {
        self.entries
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}
