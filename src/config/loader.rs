use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::builtin::builtin_flows;
use crate::config::model::{ConfigFile, FlowFile, ServerConfig, TemplateFile};
use crate::config::validate;
use crate::flow::condition::Condition;
use crate::flow::model::{Flow, FlowStep};
use crate::flow::reference::ForEachRef;
use crate::models::template::{Template, TemplateSource};
use crate::template::{builtin::builtin_templates, TemplateSet};
use crate::MullError;

/// Everything loaded from configuration, as one immutable snapshot.
///
/// Reload builds a fresh snapshot and swaps the `Arc`; tool calls already in
/// flight keep the snapshot they started with.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub server: ServerConfig,
    pub flows: HashMap<String, Arc<Flow>>,
    pub templates: Arc<TemplateSet>,
}

impl ConfigSnapshot {
    pub fn flow(&self, flow_type: &str) -> Result<Arc<Flow>, MullError> {
        self.flows
            .get(flow_type)
            .cloned()
            .ok_or_else(|| MullError::FlowNotFound {
                flow_type: flow_type.to_string(),
            })
    }

    /// Flow types sorted for stable listings.
    pub fn flow_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.flows.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }
}

/// Load configuration.
///
/// With `path = None` the snapshot is builtins plus defaults; with a path the
/// YAML document there is parsed and merged over the builtins (flows and
/// templates override by name). All referential validation happens here so a
/// bad file never becomes a running snapshot.
pub fn load(path: Option<&Path>) -> Result<ConfigSnapshot, MullError> {
    let (file, base_dir) = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p).map_err(|e| {
                MullError::Config(format!("cannot read config file {}: {}", p.display(), e))
            })?;
            let parsed: ConfigFile = serde_yaml::from_str(&text)?;
            (parsed, p.parent().map(|d| d.to_path_buf()))
        }
        None => (ConfigFile::default(), None),
    };

    let server = file.server.resolve();

    // Templates: builtins first, config entries override by name.
    let mut templates: Vec<Template> = builtin_templates();
    for (name, entry) in file.templates.iter() {
        let template = resolve_template(name, entry, base_dir.as_deref())?;
        templates.retain(|t| t.name != *name);
        templates.push(template);
    }
    let templates = Arc::new(TemplateSet::from_templates(templates));

    // Flows: builtins first, config entries override by flow_type.
    let mut flow_files: Vec<(String, FlowFile)> = builtin_flows();
    for (flow_type, entry) in file.thinking_flows.iter() {
        flow_files.retain(|(t, _)| t != flow_type);
        flow_files.push((flow_type.clone(), entry.clone()));
    }

    let mut flows: HashMap<String, Arc<Flow>> = HashMap::new();
    for (flow_type, flow_file) in flow_files {
        let flow = build_flow(&flow_type, &flow_file, &server)?;
        flows.insert(flow_type, Arc::new(flow));
    }

    validate::validate(&server, &flows, &templates)?;

    Ok(ConfigSnapshot {
        server,
        flows,
        templates,
    })
}

fn resolve_template(
    name: &str,
    entry: &TemplateFile,
    base_dir: Option<&Path>,
) -> Result<Template, MullError> {
    let (body, source) = match (&entry.body, &entry.file) {
        (Some(body), None) => (body.clone(), TemplateSource::Inline),
        (None, Some(rel)) => {
            let path = match base_dir {
                Some(dir) => dir.join(rel),
                None => Path::new(rel).to_path_buf(),
            };
            let body = std::fs::read_to_string(&path).map_err(|e| {
                MullError::Config(format!(
                    "template '{}': cannot read body file {}: {}",
                    name,
                    path.display(),
                    e
                ))
            })?;
            (body, TemplateSource::File(path))
        }
        (Some(_), Some(_)) => {
            return Err(MullError::Config(format!(
                "template '{}' declares both 'body' and 'file'",
                name
            )))
        }
        (None, None) => {
            return Err(MullError::Config(format!(
                "template '{}' declares neither 'body' nor 'file'",
                name
            )))
        }
    };

    Ok(Template {
        name: name.to_string(),
        description: entry.description.clone(),
        required_params: entry.required_params.clone(),
        optional_params: entry.optional_params.clone(),
        expected_output: entry.expected_output,
        body,
        source,
    })
}

fn build_flow(
    flow_type: &str,
    file: &FlowFile,
    server: &ServerConfig,
) -> Result<Flow, MullError> {
    let mut steps = Vec::with_capacity(file.steps.len());
    for step in &file.steps {
        let conditional = match &step.conditional {
            Some(src) => Some(Condition::parse(src).map_err(|e| {
                MullError::Config(format!(
                    "flow '{}', step '{}': invalid conditional: {}",
                    flow_type, step.name, e
                ))
            })?),
            None => None,
        };
        let for_each = match &step.for_each {
            Some(src) => Some(ForEachRef::parse(src).map_err(|e| {
                MullError::Config(format!(
                    "flow '{}', step '{}': {}",
                    flow_type, step.name, e
                ))
            })?),
            None => None,
        };
        steps.push(FlowStep {
            name: step.name.clone(),
            template: step.template_name.clone(),
            required: step.required,
            quality_threshold: step
                .quality_threshold
                .unwrap_or(server.quality_gate_default_threshold),
            conditional,
            depends_on: step.depends_on.clone(),
            for_each,
            parallel: step.parallel,
            retry_on_failure: step.retry_on_failure,
            is_final: step.is_final,
            instructions: step.instructions.clone(),
            metadata: step.metadata.clone(),
        });
    }

    Ok(Flow {
        flow_type: flow_type.to_string(),
        name: file.name.clone().unwrap_or_else(|| flow_type.to_string()),
        description: file.description.clone(),
        steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_load_without_a_file() {
        let snapshot = load(None).unwrap();
        assert_eq!(snapshot.server.max_sessions, 100);
        assert_eq!(snapshot.server.default_flow, "comprehensive_analysis");
        assert!(snapshot.flows.contains_key("comprehensive_analysis"));
        assert!(snapshot.flows.contains_key("quick_analysis"));
        assert!(snapshot.templates.contains("decomposition"));
    }

    #[test]
    fn reload_of_same_inputs_is_equivalent() {
        let a = load(None).unwrap();
        let b = load(None).unwrap();
        assert_eq!(a.flow_types(), b.flow_types());
        assert_eq!(a.templates.len(), b.templates.len());
        let fa = a.flow("comprehensive_analysis").unwrap();
        let fb = b.flow("comprehensive_analysis").unwrap();
        assert_eq!(
            fa.steps.iter().map(|s| &s.name).collect::<Vec<_>>(),
            fb.steps.iter().map(|s| &s.name).collect::<Vec<_>>()
        );
    }

    #[test]
    fn config_file_overrides_and_extends() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
server:
  max_sessions: 7
  default_flow: quick_analysis
thinking_flows:
  tiny:
    description: one step
    steps:
      - name: only
        template: reflection
        final: true
templates:
  shouting:
    description: test template
    required_params: [topic]
    expected_output: text
    body: "SHOUT ABOUT {{topic}}"
"#
        )
        .unwrap();

        let snapshot = load(Some(f.path())).unwrap();
        assert_eq!(snapshot.server.max_sessions, 7);
        assert_eq!(snapshot.server.default_flow, "quick_analysis");
        assert!(snapshot.flows.contains_key("tiny"));
        assert!(snapshot.flows.contains_key("comprehensive_analysis"));
        assert!(snapshot.templates.contains("shouting"));
    }

    #[test]
    fn template_body_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("probe.md"), "Probe {topic} deeply.").unwrap();
        let config_path = dir.path().join("mull.yaml");
        std::fs::write(
            &config_path,
            r#"
templates:
  probe:
    description: file-backed template
    required_params: [topic]
    file: probe.md
"#,
        )
        .unwrap();

        let snapshot = load(Some(&config_path)).unwrap();
        let template = snapshot.templates.get("probe").unwrap();
        assert_eq!(template.body, "Probe {topic} deeply.");
        assert!(matches!(
            template.source,
            crate::models::template::TemplateSource::File(_)
        ));
    }

    #[test]
    fn template_with_both_body_and_file_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
templates:
  torn:
    required_params: []
    body: inline
    file: elsewhere.md
"#
        )
        .unwrap();
        assert!(matches!(
            load(Some(f.path())).unwrap_err(),
            MullError::Config(_)
        ));
    }

    #[test]
    fn ill_formed_yaml_is_config_invalid() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "thinking_flows: [not, a, mapping").unwrap();
        assert!(matches!(
            load(Some(f.path())).unwrap_err(),
            MullError::Config(_)
        ));
    }

    #[test]
    fn missing_file_is_config_invalid() {
        assert!(matches!(
            load(Some(Path::new("/nonexistent/mull.yaml"))).unwrap_err(),
            MullError::Config(_)
        ));
    }
}
