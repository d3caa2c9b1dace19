// Explicit provider composition. Instead of patching whatever provider a
// page already has, every provider is registered here with a priority and
// the page is handed the winner.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub name: String,
    /// Reverse-DNS identifier, e.g. `io.ember.wallet`.
    pub rdns: String,
    #[serde(default)]
    pub icon: Option<String>,
}

struct Entry<P> {
    info: ProviderInfo,
    priority: i32,
    provider: P,
}

pub struct ProviderRegistry<P> {
    // Kept sorted: priority descending, registration order within a priority
    entries: Vec<Entry<P>>,
}

impl<P> Default for ProviderRegistry<P> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<P> ProviderRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Re-registering an `rdns` replaces the old entry.
    pub fn register(&mut self, info: ProviderInfo, priority: i32, provider: P) {
        self.unregister(&info.rdns);
        let at = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, Entry { info, priority, provider });
    }

    pub fn unregister(&mut self, rdns: &str) -> Option<P> {
        let index = self.entries.iter().position(|e| e.info.rdns == rdns)?;
        Some(self.entries.remove(index).provider)
    }

    /// The provider the page should use.
    pub fn primary(&self) -> Option<&P> {
        self.entries.first().map(|e| &e.provider)
    }

    pub fn get(&self, rdns: &str) -> Option<&P> {
        self.entries.iter().find(|e| e.info.rdns == rdns).map(|e| &e.provider)
    }

    /// Registered providers in priority order.
    pub fn infos(&self) -> Vec<&ProviderInfo> {
        self.entries.iter().map(|e| &e.info).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(rdns: &str) -> ProviderInfo {
        ProviderInfo { name: rdns.to_string(), rdns: rdns.to_string(), icon: None }
    }

    #[test]
    fn highest_priority_wins_and_ties_keep_order() {
        let mut registry = ProviderRegistry::new();
        registry.register(info("page.existing"), 0, "existing");
        registry.register(info("io.ember.wallet"), 10, "ember");
        registry.register(info("other.wallet"), 10, "other");

        assert_eq!(registry.primary(), Some(&"ember"));
        let order: Vec<_> = registry.infos().iter().map(|i| i.rdns.clone()).collect();
        assert_eq!(order, vec!["io.ember.wallet", "other.wallet", "page.existing"]);
    }

    #[test]
    fn reregistering_replaces_and_unregister_falls_back() {
        let mut registry = ProviderRegistry::new();
        registry.register(info("page.existing"), 0, "existing");
        registry.register(info("io.ember.wallet"), 10, "ember");
        registry.register(info("io.ember.wallet"), -5, "ember-low");

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.primary(), Some(&"existing"));
        assert_eq!(registry.unregister("page.existing"), Some("existing"));
        assert_eq!(registry.primary(), Some(&"ember-low"));
        assert_eq!(registry.get("missing"), None);
    }
}
