//! Resolved, validated service descriptions.
//!
//! A [`ServiceSpec`] is pure data: everything the orchestration engine needs
//! to bring one service up, produced from settings after template
//! resolution. The [`ServiceCatalog`] owns the enabled specs and resolves
//! requested names.

use std::collections::{BTreeMap, HashMap};

use crate::config::Settings;
use crate::error::{Error, Result};

/// One published (host, container) port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// A named volume or bind mount attached to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
}

impl VolumeMount {
    /// Absolute sources are bind mounts; everything else is a named volume.
    pub fn is_bind(&self) -> bool {
        self.source.starts_with('/')
    }
}

/// Declared health endpoint with an inclusive accepted status range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub path: String,
    pub accept_low: u16,
    pub accept_high: u16,
}

impl HealthCheck {
    pub fn accepts(&self, status: u16) -> bool {
        (self.accept_low..=self.accept_high).contains(&status)
    }
}

/// Specification for one containerized service.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub group: String,
    pub container: String,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub env: BTreeMap<String, String>,
    pub gpu: bool,
    pub health: Option<HealthCheck>,
    pub needs_secret: bool,
}

impl ServiceSpec {
    /// Host port the health probe targets.
    pub fn primary_host_port(&self) -> Option<u16> {
        self.ports.first().map(|p| p.host)
    }
}

/// Catalog of enabled service specs in stable order.
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    specs: Vec<ServiceSpec>,
}

impl ServiceCatalog {
    /// Build the catalog from resolved settings, dropping disabled services
    /// and validating cross-service invariants: host ports, group names, and
    /// container names must each be unique.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut specs = Vec::new();

        for (name, service) in &settings.services {
            if !service.enabled {
                continue;
            }
            specs.push(ServiceSpec {
                name: name.clone(),
                image: service.image.clone(),
                group: service.group.clone(),
                container: service.container.clone(),
                ports: service
                    .ports
                    .iter()
                    .map(|p| PortMapping {
                        host: p.host,
                        container: p.container,
                    })
                    .collect(),
                volumes: service
                    .volumes
                    .values()
                    .map(|v| VolumeMount {
                        source: v.source.clone(),
                        target: v.target.clone(),
                    })
                    .collect(),
                env: service.env.clone(),
                gpu: service.gpu,
                health: service.health.as_ref().map(|h| HealthCheck {
                    path: h.path.clone(),
                    accept_low: h.expected_status[0],
                    accept_high: h.expected_status[1],
                }),
                needs_secret: service.needs_secret,
            });
        }

        let catalog = Self { specs };
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<()> {
        let mut host_ports: HashMap<u16, &str> = HashMap::new();
        let mut groups: HashMap<&str, &str> = HashMap::new();
        let mut containers: HashMap<&str, &str> = HashMap::new();

        for spec in &self.specs {
            for port in &spec.ports {
                if let Some(other) = host_ports.insert(port.host, &spec.name) {
                    return Err(Error::InvalidSpec(format!(
                        "host port {} declared by both '{}' and '{}'",
                        port.host, other, spec.name
                    )));
                }
            }
            if let Some(other) = groups.insert(&spec.group, &spec.name) {
                return Err(Error::InvalidSpec(format!(
                    "group '{}' declared by both '{}' and '{}'",
                    spec.group, other, spec.name
                )));
            }
            if let Some(other) = containers.insert(&spec.container, &spec.name) {
                return Err(Error::InvalidSpec(format!(
                    "container '{}' declared by both '{}' and '{}'",
                    spec.container, other, spec.name
                )));
            }
        }
        Ok(())
    }

    pub fn all(&self) -> &[ServiceSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&ServiceSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|spec| spec.name.as_str()).collect()
    }

    /// Resolve requested names to specs; an empty request means all enabled
    /// services. Unknown names produce an actionable error listing what is
    /// available.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<&ServiceSpec>> {
        if names.is_empty() {
            return Ok(self.specs.iter().collect());
        }

        let missing: Vec<&str> = names
            .iter()
            .filter(|name| self.get(name).is_none())
            .map(|name| name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::UnknownService {
                requested: missing.join(", "),
                available: self.names().join(", "),
            });
        }

        Ok(names
            .iter()
            .filter_map(|name| self.get(name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn load(toml: &str) -> Result<ServiceCatalog> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, toml).unwrap();
        let settings = Settings::load(&path)?;
        ServiceCatalog::from_settings(&settings)
    }

    fn builtin_catalog() -> ServiceCatalog {
        let settings =
            Settings::load(&PathBuf::from("/no/such/config.toml")).expect("builtin settings");
        ServiceCatalog::from_settings(&settings).expect("builtin catalog")
    }

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = builtin_catalog();
        assert_eq!(catalog.names(), vec!["comfyui", "ollama", "open-webui"]);
    }

    #[test]
    fn duplicate_host_port_is_rejected() {
        let err = load(concat!(
            "[services.a]\n",
            "image = \"img-a\"\ngroup = \"a\"\ncontainer = \"a-0\"\n",
            "ports = [{ host = 9000, container = 9000 }]\n",
            "[services.b]\n",
            "image = \"img-b\"\ngroup = \"b\"\ncontainer = \"b-0\"\n",
            "ports = [{ host = 9000, container = 8080 }]\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("host port 9000"));
    }

    #[test]
    fn duplicate_container_name_is_rejected() {
        let err = load(concat!(
            "[services.a]\n",
            "image = \"img-a\"\ngroup = \"a\"\ncontainer = \"shared-0\"\n",
            "[services.b]\n",
            "image = \"img-b\"\ngroup = \"b\"\ncontainer = \"shared-0\"\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("container 'shared-0'"));
    }

    #[test]
    fn disabled_services_are_excluded() {
        let catalog = load(concat!(
            "[services.a]\n",
            "image = \"img-a\"\ngroup = \"a\"\ncontainer = \"a-0\"\n",
            "[services.b]\n",
            "enabled = false\n",
            "image = \"img-b\"\ngroup = \"b\"\ncontainer = \"b-0\"\n",
        ))
        .unwrap();
        assert_eq!(catalog.names(), vec!["a"]);
    }

    #[test]
    fn disabled_services_do_not_count_for_port_uniqueness() {
        let catalog = load(concat!(
            "[services.a]\n",
            "image = \"img-a\"\ngroup = \"a\"\ncontainer = \"a-0\"\n",
            "ports = [{ host = 9000, container = 9000 }]\n",
            "[services.b]\n",
            "enabled = false\n",
            "image = \"img-b\"\ngroup = \"b\"\ncontainer = \"b-0\"\n",
            "ports = [{ host = 9000, container = 9000 }]\n",
        ))
        .unwrap();
        assert_eq!(catalog.names(), vec!["a"]);
    }

    #[test]
    fn unknown_service_lists_available() {
        let catalog = builtin_catalog();
        let err = catalog.resolve(&["nope".to_string()]).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("nope"));
        assert!(text.contains("ollama"));
    }

    #[test]
    fn bind_mounts_are_detected_by_absolute_source() {
        let named = VolumeMount {
            source: "podstack_ollama_data".to_string(),
            target: "/root/.ollama".to_string(),
        };
        let bind = VolumeMount {
            source: "/srv/comfyui/workspace".to_string(),
            target: "/workspace".to_string(),
        };
        assert!(!named.is_bind());
        assert!(bind.is_bind());
    }

    #[test]
    fn health_check_range_is_inclusive() {
        let check = HealthCheck {
            path: "/".to_string(),
            accept_low: 200,
            accept_high: 299,
        };
        assert!(check.accepts(200));
        assert!(check.accepts(299));
        assert!(!check.accepts(404));
        assert!(!check.accepts(300));
    }
}
