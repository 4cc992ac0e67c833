//! Component descriptor resolution.
//!
//! The builder never consults a process-wide registry. Callers inject a
//! [`ComponentResolver`] capability, and the stock table below is just the
//! default implementation an embedder can start from.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// What the runtime knows about a named component, as far as parsing cares:
/// whether a body is legal, and whether one is mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentDescriptor {
    pub allows_body: bool,
    pub requires_body: bool,
}

impl ComponentDescriptor {
    pub const fn new(allows_body: bool, requires_body: bool) -> ComponentDescriptor {
        ComponentDescriptor {
            allows_body,
            requires_body,
        }
    }
}

/// Resolve a component name (case-insensitive) to its descriptor. `None`
/// means the component is unknown to the resolver; the parser then assumes
/// an optional body and leaves validation to later stages.
pub trait ComponentResolver {
    fn resolve(&self, name: &str) -> Option<ComponentDescriptor>;
}

static BUILTIN_COMPONENTS: Lazy<HashMap<&'static str, ComponentDescriptor>> = Lazy::new(|| {
    let body = ComponentDescriptor::new(true, false);
    let body_required = ComponentDescriptor::new(true, true);
    let bodyless = ComponentDescriptor::new(false, false);
    HashMap::from([
        ("loop", body),
        ("transaction", body),
        ("http", body),
        ("mail", body),
        ("savecontent", body_required),
        ("lock", body_required),
        ("timer", body_required),
        ("query", body_required),
        ("include", bodyless),
        ("throw", bodyless),
        ("param", bodyless),
        ("abort", bodyless),
        ("dump", bodyless),
        ("setting", bodyless),
        ("httpparam", bodyless),
        ("file", bodyless),
        ("log", bodyless),
        ("flush", bodyless),
        ("sleep", bodyless),
    ])
});

/// The stock component table. Construct with [`Default::default`] for the
/// built-in set, or [`DefaultRegistry::empty`] and [`DefaultRegistry::with`]
/// to build a custom one.
#[derive(Debug, Clone)]
pub struct DefaultRegistry {
    components: HashMap<String, ComponentDescriptor>,
}

impl DefaultRegistry {
    pub fn empty() -> DefaultRegistry {
        DefaultRegistry {
            components: HashMap::new(),
        }
    }

    pub fn with(mut self, name: &str, descriptor: ComponentDescriptor) -> DefaultRegistry {
        self.register(name, descriptor);
        self
    }

    pub fn register(&mut self, name: &str, descriptor: ComponentDescriptor) {
        self.components.insert(name.to_ascii_lowercase(), descriptor);
    }
}

impl Default for DefaultRegistry {
    fn default() -> DefaultRegistry {
        DefaultRegistry {
            components: BUILTIN_COMPONENTS
                .iter()
                .map(|(name, descriptor)| (name.to_string(), *descriptor))
                .collect(),
        }
    }
}

impl ComponentResolver for DefaultRegistry {
    fn resolve(&self, name: &str) -> Option<ComponentDescriptor> {
        self.components.get(&name.to_ascii_lowercase()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_is_case_insensitive() {
        let registry = DefaultRegistry::default();
        assert_eq!(registry.resolve("SaveContent"), registry.resolve("savecontent"));
        assert!(registry.resolve("savecontent").unwrap().requires_body);
    }

    #[test]
    fn unknown_components_resolve_to_none() {
        let registry = DefaultRegistry::empty();
        assert!(registry.resolve("anything").is_none());
    }

    #[test]
    fn custom_entries_override_nothing_by_default() {
        let registry =
            DefaultRegistry::empty().with("widget", ComponentDescriptor::new(true, true));
        assert!(registry.resolve("WIDGET").unwrap().requires_body);
        assert!(registry.resolve("loop").is_none());
    }
}
