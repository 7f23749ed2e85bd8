//! Protocol name -> plugin mapping. The single answer to "is this crackable".

use crate::plugin::CrackPlugin;
use crate::plugins::{MongodbPlugin, RedisPlugin, WmiPlugin};
use astra_common::CrackJob;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Populated once at startup and shared read-only afterwards.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: BTreeMap<&'static str, Arc<dyn CrackPlugin>>,
    aliases: HashMap<&'static str, &'static str>,
}

impl PluginRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in plugin.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MongodbPlugin));
        registry.register(Arc::new(RedisPlugin));
        registry.register(Arc::new(WmiPlugin));
        registry
    }

    /// Add a plugin under its name and aliases. A later registration for the
    /// same name replaces the earlier one.
    pub fn register(&mut self, plugin: Arc<dyn CrackPlugin>) {
        let name = plugin.name();
        for &alias in plugin.aliases() {
            self.aliases.insert(alias, name);
        }
        self.plugins.insert(name, plugin);
    }

    /// Canonical plugin name for a service name reported by fingerprinting.
    pub fn resolve(&self, service: &str) -> Option<&'static str> {
        let service = service.to_ascii_lowercase();
        if let Some((name, _)) = self.plugins.get_key_value(service.as_str()) {
            return Some(name);
        }
        self.aliases.get(service.as_str()).copied()
    }

    pub fn is_crackable(&self, service: &str) -> bool {
        self.resolve(service).is_some()
    }

    pub fn get(&self, protocol: &str) -> Option<Arc<dyn CrackPlugin>> {
        let name = self.resolve(protocol)?;
        self.plugins.get(name).cloned()
    }

    /// Registered canonical names, sorted.
    pub fn protocols(&self) -> Vec<&'static str> {
        self.plugins.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Keep only jobs whose protocol is in `modules`. An empty list or `all`
/// keeps everything. Module names may be aliases.
pub fn filter_modules(
    jobs: Vec<CrackJob>,
    modules: &[String],
    registry: &PluginRegistry,
) -> Vec<CrackJob> {
    if modules.is_empty() || modules.iter().any(|m| m.eq_ignore_ascii_case("all")) {
        return jobs;
    }
    let wanted: Vec<&str> = modules
        .iter()
        .filter_map(|m| registry.resolve(m.trim()))
        .collect();
    jobs
        .into_iter()
        .filter(|job| wanted.contains(&job.protocol.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_registered() {
        let registry = PluginRegistry::with_defaults();
        assert_eq!(registry.protocols(), vec!["mongodb", "redis", "wmi"]);
        assert!(registry.is_crackable("mongodb"));
        assert!(registry.is_crackable("Redis"));
        assert!(!registry.is_crackable("ssh"));
        assert!(!registry.is_crackable("http"));
    }

    #[test]
    fn aliases_resolve_to_canonical_names() {
        let registry = PluginRegistry::with_defaults();
        assert_eq!(registry.resolve("msrpc"), Some("wmi"));
        assert_eq!(registry.resolve("wmihash"), Some("wmi"));
        assert_eq!(registry.resolve("mongod"), Some("mongodb"));
        assert_eq!(registry.get("msrpc").unwrap().name(), "wmi");
    }

    #[test]
    fn module_filter() {
        let registry = PluginRegistry::with_defaults();
        let jobs = vec![
            CrackJob::new("10.0.0.1:27017".parse().unwrap(), "mongodb"),
            CrackJob::new("10.0.0.1:6379".parse().unwrap(), "redis"),
            CrackJob::new("10.0.0.1:135".parse().unwrap(), "wmi"),
        ];

        let all = filter_modules(jobs.clone(), &["all".to_string()], &registry);
        assert_eq!(all.len(), 3);

        let some = filter_modules(jobs.clone(), &["redis".into(), "msrpc".into()], &registry);
        let protocols: Vec<_> = some.iter().map(|j| j.protocol.as_str()).collect();
        assert_eq!(protocols, vec!["redis", "wmi"]);

        assert_eq!(filter_modules(jobs, &[], &registry).len(), 3);
    }
}
