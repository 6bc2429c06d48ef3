//! Serde models for the YAML configuration tree, plus the resolved
//! [`ServerConfig`].
//!
//! Unknown fields are tolerated everywhere (forward compatibility); missing
//! required fields fail at load time.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::models::template::OutputKind;

/// Resolved server runtime options with defaults applied.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_sessions: usize,
    pub session_timeout_minutes: i64,
    pub template_cache_size: u64,
    pub session_cache_size: u64,
    pub default_flow: String,
    pub quality_gate_default_threshold: f64,
    /// Embedded database location; `":memory:"` selects the in-memory
    /// engine.
    pub database_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            session_timeout_minutes: 60,
            template_cache_size: 50,
            session_cache_size: 20,
            default_flow: "comprehensive_analysis".to_string(),
            quality_gate_default_threshold: 0.7,
            database_path: "data/sessions.db".to_string(),
        }
    }
}

/// Top level of the YAML config document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerOptions,
    #[serde(default)]
    pub thinking_flows: indexmap_like::OrderedMap<FlowFile>,
    #[serde(default)]
    pub templates: indexmap_like::OrderedMap<TemplateFile>,
}

/// `server:` section; every option is optional and falls back to the
/// [`ServerConfig`] default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerOptions {
    pub max_sessions: Option<usize>,
    pub session_timeout_minutes: Option<i64>,
    pub template_cache_size: Option<u64>,
    pub session_cache_size: Option<u64>,
    pub default_flow: Option<String>,
    pub quality_gate_default_threshold: Option<f64>,
    pub database_path: Option<String>,
}

impl ServerOptions {
    pub fn resolve(&self) -> ServerConfig {
        let d = ServerConfig::default();
        ServerConfig {
            max_sessions: self.max_sessions.unwrap_or(d.max_sessions),
            session_timeout_minutes: self
                .session_timeout_minutes
                .unwrap_or(d.session_timeout_minutes),
            template_cache_size: self.template_cache_size.unwrap_or(d.template_cache_size),
            session_cache_size: self.session_cache_size.unwrap_or(d.session_cache_size),
            default_flow: self.default_flow.clone().unwrap_or(d.default_flow),
            quality_gate_default_threshold: self
                .quality_gate_default_threshold
                .unwrap_or(d.quality_gate_default_threshold),
            database_path: self.database_path.clone().unwrap_or(d.database_path),
        }
    }
}

/// One entry under `thinking_flows:`.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepFile>,
}

/// One step of a flow file.
#[derive(Debug, Clone, Deserialize)]
pub struct StepFile {
    pub name: String,
    #[serde(alias = "template")]
    pub template_name: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub quality_threshold: Option<f64>,
    #[serde(default)]
    pub conditional: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub for_each: Option<String>,
    /// Batching hint only; never parallelised at runtime.
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub retry_on_failure: bool,
    #[serde(default, rename = "final")]
    pub is_final: bool,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

/// One entry under `templates:`. Body is either inline or a file path
/// resolved relative to the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateFile {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub optional_params: Vec<String>,
    #[serde(default)]
    pub expected_output: OutputKind,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
}

/// Tiny insertion-ordered map so flows keep their file order without an
/// extra dependency.
pub mod indexmap_like {
    use serde::{Deserialize, Deserializer};

    #[derive(Debug, Clone)]
    pub struct OrderedMap<V>(pub Vec<(String, V)>);

    impl<V> Default for OrderedMap<V> {
        fn default() -> Self {
            Self(Vec::new())
        }
    }

    impl<V> OrderedMap<V> {
        pub fn iter(&self) -> impl Iterator<Item = &(String, V)> {
            self.0.iter()
        }
    }

    impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            struct Visitor<V>(std::marker::PhantomData<V>);

            impl<'de, V: Deserialize<'de>> serde::de::Visitor<'de> for Visitor<V> {
                type Value = OrderedMap<V>;

                fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                    f.write_str("a mapping")
                }

                fn visit_map<A: serde::de::MapAccess<'de>>(
                    self,
                    mut access: A,
                ) -> Result<Self::Value, A::Error> {
                    let mut entries = Vec::new();
                    while let Some((key, value)) = access.next_entry::<String, V>()? {
                        entries.push((key, value));
                    }
                    Ok(OrderedMap(entries))
                }
            }

            deserializer.deserialize_map(Visitor(std::marker::PhantomData))
        }
    }
}
