//! Rules mapping booting hosts to recipes: hostname regexes matched against
//! the reverse-DNS name, and CIDR networks matched against the client IP.
//! Rules keep their YAML declaration order and the first match wins.

use std::{collections::BTreeMap, net::IpAddr, path::Path};

use common::prelude::tracing;
use ipnet::IpNet;
use models::{Params, Recipe};
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// A hostname pattern tied to a recipe. Patterns are compiled as authored:
/// an unanchored pattern matches anywhere in the hostname.
#[derive(Debug, Clone)]
pub struct HostnameRule {
    pub pattern: Regex,
    pub recipe: Recipe,
}

/// A network tied to a recipe.
#[derive(Debug, Clone)]
pub struct NetworkRule {
    pub network: IpNet,
    pub recipe: Recipe,
}

impl Serialize for HostnameRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("HostnameRule", 2)?;
        s.serialize_field("hostname", self.pattern.as_str())?;
        s.serialize_field("script", &self.recipe)?;
        s.end()
    }
}

impl Serialize for NetworkRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("NetworkRule", 2)?;
        s.serialize_field("network", &self.network.to_string())?;
        s.serialize_field("script", &self.recipe)?;
        s.end()
    }
}

/// The YAML layout of the mappings file.
#[derive(Debug, Deserialize)]
struct MappingsFile {
    #[serde(default, rename = "networkMaps")]
    network_maps: Vec<YamlNetworkMap>,
    #[serde(default, rename = "hostnameMaps")]
    hostname_maps: Vec<YamlHostnameMap>,
}

#[derive(Debug, Deserialize)]
struct YamlNetworkMap {
    network: String,
    script: YamlScript,
}

#[derive(Debug, Deserialize)]
struct YamlHostnameMap {
    hostname: String,
    script: YamlScript,
}

#[derive(Debug, Deserialize)]
struct YamlScript {
    name: String,
    #[serde(default)]
    environment: String,
    #[serde(default)]
    params: BTreeMap<String, String>,
}

impl From<YamlScript> for Recipe {
    fn from(script: YamlScript) -> Self {
        let mut params = Params::new();
        for (key, value) in script.params {
            params.insert(key, Value::String(value));
        }
        Recipe {
            name: script.name,
            environment: script.environment,
            params,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("couldn't read mappings file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("couldn't parse mappings file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid hostname pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("invalid network {network:?}: {source}")]
    Network {
        network: String,
        source: ipnet::AddrParseError,
    },
}

/// The loaded rule set. Immutable after startup; lookups clone the matched
/// recipe so callers can bind per-request parameters freely.
#[derive(Debug, Default)]
pub struct Mappings {
    hostname_rules: Vec<HostnameRule>,
    network_rules: Vec<NetworkRule>,
}

impl Mappings {
    pub fn load(path: &Path) -> Result<Self, MappingError> {
        tracing::info!(source = %path.display(), "reading mappings");
        let raw = std::fs::read_to_string(path).map_err(|source| MappingError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, MappingError> {
        let file: MappingsFile = serde_yaml::from_str(raw)?;

        let mut hostname_rules = Vec::with_capacity(file.hostname_maps.len());
        for map in file.hostname_maps {
            let pattern = Regex::new(&map.hostname).map_err(|source| MappingError::Pattern {
                pattern: map.hostname.clone(),
                source,
            })?;
            hostname_rules.push(HostnameRule {
                pattern,
                recipe: map.script.into(),
            });
        }

        let mut network_rules = Vec::with_capacity(file.network_maps.len());
        for map in file.network_maps {
            let network = map
                .network
                .parse::<IpNet>()
                .map_err(|source| MappingError::Network {
                    network: map.network.clone(),
                    source,
                })?;
            network_rules.push(NetworkRule {
                network,
                recipe: map.script.into(),
            });
        }

        Ok(Mappings {
            hostname_rules,
            network_rules,
        })
    }

    /// First hostname rule whose pattern matches, in declaration order.
    pub fn find_for_hostname(&self, hostname: &str) -> Option<Recipe> {
        self.hostname_rules
            .iter()
            .find(|rule| rule.pattern.is_match(hostname))
            .map(|rule| rule.recipe.clone())
    }

    /// First network rule containing the IP, in declaration order.
    pub fn find_for_network(&self, ip: IpAddr) -> Option<Recipe> {
        self.network_rules
            .iter()
            .find(|rule| rule.network.contains(&ip))
            .map(|rule| rule.recipe.clone())
    }

    pub fn hostname_rules(&self) -> &[HostnameRule] {
        &self.hostname_rules
    }

    pub fn network_rules(&self) -> &[NetworkRule] {
        &self.network_rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MAPPINGS: &str = r#"
networkMaps:
  - network: 10.0.0.0/8
    script:
      name: coreos.ipxe
      params:
        version: "11"
  - network: 10.2.0.0/16
    script:
      name: shadowed.ipxe
  - network: 192.168.0.0/16
    script:
      name: ubuntu.ipxe
      environment: testing
hostnameMaps:
  - hostname: "^node-[0-9]+"
    script:
      name: worker.ipxe
  - hostname: "node-1"
    script:
      name: catchall.ipxe
"#;

    #[test]
    fn test_parse_keeps_declaration_order() {
        let mappings = Mappings::parse(MAPPINGS).unwrap();
        assert_eq!(mappings.network_rules().len(), 3);
        assert_eq!(mappings.hostname_rules().len(), 2);
        assert_eq!(mappings.network_rules()[0].recipe.name, "coreos.ipxe");
        assert_eq!(mappings.hostname_rules()[0].recipe.name, "worker.ipxe");
    }

    #[test]
    fn test_first_network_match_wins() {
        let mappings = Mappings::parse(MAPPINGS).unwrap();
        // 10.2.0.0/16 is more specific, but declared later
        let recipe = mappings
            .find_for_network("10.2.3.4".parse().unwrap())
            .unwrap();
        assert_eq!(recipe.name, "coreos.ipxe");
        assert_eq!(
            recipe.params.get("version"),
            Some(&Value::String("11".to_owned()))
        );
    }

    #[test]
    fn test_network_lookup_respects_environment() {
        let mappings = Mappings::parse(MAPPINGS).unwrap();
        let recipe = mappings
            .find_for_network("192.168.1.1".parse().unwrap())
            .unwrap();
        assert_eq!(recipe.name, "ubuntu.ipxe");
        assert_eq!(recipe.environment, "testing");
    }

    #[test]
    fn test_unmatched_network_returns_none() {
        let mappings = Mappings::parse(MAPPINGS).unwrap();
        assert!(mappings
            .find_for_network("8.8.8.8".parse().unwrap())
            .is_none());
    }

    #[test]
    fn test_first_hostname_match_wins() {
        let mappings = Mappings::parse(MAPPINGS).unwrap();
        let recipe = mappings.find_for_hostname("node-1.example.com").unwrap();
        assert_eq!(recipe.name, "worker.ipxe");
    }

    #[test]
    fn test_hostname_match_is_unanchored() {
        let mappings = Mappings::parse(MAPPINGS).unwrap();
        // "node-1" matches in the middle of the name via the second rule,
        // but the first rule does not (its pattern is anchored at the start)
        let recipe = mappings.find_for_hostname("rack2-node-12").unwrap();
        assert_eq!(recipe.name, "catchall.ipxe");
    }

    #[test]
    fn test_unmatched_hostname_returns_none() {
        let mappings = Mappings::parse(MAPPINGS).unwrap();
        assert!(mappings.find_for_hostname("db.example.com").is_none());
    }

    #[test]
    fn test_lookups_clone_recipes() {
        let mappings = Mappings::parse(MAPPINGS).unwrap();
        let mut first = mappings
            .find_for_network("10.0.0.1".parse().unwrap())
            .unwrap();
        first
            .params
            .insert("hostname".to_owned(), Value::String("edited".to_owned()));

        let second = mappings
            .find_for_network("10.0.0.1".parse().unwrap())
            .unwrap();
        assert!(!second.params.contains_key("hostname"));
    }

    #[test]
    fn test_bad_pattern_is_a_load_error() {
        let raw = "hostnameMaps:\n  - hostname: \"[\"\n    script:\n      name: x\n";
        assert!(matches!(
            Mappings::parse(raw),
            Err(MappingError::Pattern { .. })
        ));
    }

    #[test]
    fn test_bad_network_is_a_load_error() {
        let raw = "networkMaps:\n  - network: 10.0.0.0/33\n    script:\n      name: x\n";
        assert!(matches!(
            Mappings::parse(raw),
            Err(MappingError::Network { .. })
        ));
    }
}
