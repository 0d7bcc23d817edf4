use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::{DetectionCapability, DetectorBackend};

pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Select a backend that supports the requested capability.
    ///
    /// Prefers the default backend when it supports the capability.
    pub fn backend_for_capability(&self, capability: DetectionCapability) -> Result<SharedBackend> {
        if let Some(default_backend) = self.default_backend() {
            if supports(&default_backend, capability)? {
                return Ok(default_backend);
            }
        }

        for name in self.list() {
            let backend = &self.backends[&name];
            if supports(backend, capability)? {
                return Ok(backend.clone());
            }
        }

        Err(anyhow!(
            "no registered backend supports capability {:?}",
            capability
        ))
    }

    /// Backend for seat occupancy: pose when any backend offers it, plain
    /// person boxes otherwise.
    pub fn person_detector(&self) -> Result<SharedBackend> {
        self.backend_for_capability(DetectionCapability::Pose)
            .or_else(|_| self.backend_for_capability(DetectionCapability::PersonBoxes))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn supports(backend: &SharedBackend, capability: DetectionCapability) -> Result<bool> {
    let guard = backend
        .lock()
        .map_err(|_| anyhow!("backend lock poisoned"))?;
    Ok(guard.supports(capability))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;

    struct FixedBackend {
        name: &'static str,
        pose: bool,
    }

    impl DetectorBackend for FixedBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn supports(&self, capability: DetectionCapability) -> bool {
            match capability {
                DetectionCapability::Pose => self.pose,
                DetectionCapability::PersonBoxes => true,
            }
        }

        fn detect(&mut self, _: &[u8], _: u32, _: u32, _: f32) -> Result<Vec<Detection>> {
            Ok(Vec::new())
        }
    }

    fn backend_name(backend: &SharedBackend) -> &'static str {
        backend.lock().unwrap().name()
    }

    #[test]
    fn person_detector_prefers_pose() {
        let mut registry = BackendRegistry::new();
        registry.register(FixedBackend {
            name: "boxes",
            pose: false,
        });
        registry.register(FixedBackend {
            name: "pose",
            pose: true,
        });

        assert_eq!(backend_name(&registry.default_backend().unwrap()), "boxes");
        assert_eq!(backend_name(&registry.person_detector().unwrap()), "pose");
    }

    #[test]
    fn person_detector_falls_back_to_boxes() {
        let mut registry = BackendRegistry::new();
        registry.register(FixedBackend {
            name: "boxes",
            pose: false,
        });
        assert_eq!(backend_name(&registry.person_detector().unwrap()), "boxes");
    }

    #[test]
    fn empty_registry_has_no_detector() {
        let registry = BackendRegistry::default();
        assert!(registry.person_detector().is_err());
        assert!(registry.get("tract").is_none());
    }
}
