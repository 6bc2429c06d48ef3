//! Load-time validation of the assembled configuration.
//!
//! Everything rejected here is a `ConfigInvalid` condition: the server never
//! starts (or a reload never lands) with a snapshot that could fail at
//! execution time for structural reasons.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::model::ServerConfig;
use crate::flow::model::Flow;
use crate::models::template::placeholders_in;
use crate::template::TemplateSet;
use crate::MullError;

pub fn validate(
    server: &ServerConfig,
    flows: &HashMap<String, Arc<Flow>>,
    templates: &TemplateSet,
) -> Result<(), MullError> {
    if !flows.contains_key(&server.default_flow) {
        return Err(MullError::Config(format!(
            "default_flow '{}' is not a loaded flow",
            server.default_flow
        )));
    }

    for template in templates.iter() {
        validate_template(template)?;
    }

    for flow in flows.values() {
        validate_flow(flow, templates)?;
    }

    Ok(())
}

fn validate_template(template: &crate::models::template::Template) -> Result<(), MullError> {
    let placeholders = placeholders_in(&template.body);
    for required in &template.required_params {
        if !placeholders.contains(required) {
            return Err(MullError::Config(format!(
                "template '{}': required parameter '{}' has no {{{}}} placeholder",
                template.name, required, required
            )));
        }
    }
    for placeholder in &placeholders {
        if !template.required_params.contains(placeholder)
            && !template.optional_params.contains(placeholder)
        {
            return Err(MullError::Config(format!(
                "template '{}': placeholder {{{}}} is not a declared parameter",
                template.name, placeholder
            )));
        }
    }
    Ok(())
}

fn validate_flow(flow: &Flow, templates: &TemplateSet) -> Result<(), MullError> {
    let err = |msg: String| MullError::Config(format!("flow '{}': {}", flow.flow_type, msg));

    if flow.steps.is_empty() {
        return Err(err("flow has no steps".into()));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in &flow.steps {
        if !seen.insert(step.name.as_str()) {
            return Err(err(format!("duplicate step name '{}'", step.name)));
        }
    }
    let names: HashMap<&str, usize> = flow
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    for (index, step) in flow.steps.iter().enumerate() {
        if !templates.contains(&step.template) {
            return Err(err(format!(
                "step '{}' references unknown template '{}'",
                step.name, step.template
            )));
        }

        if !(0.0..=1.0).contains(&step.quality_threshold) {
            return Err(err(format!(
                "step '{}' has quality_threshold {} outside [0,1]",
                step.name, step.quality_threshold
            )));
        }

        for dep in &step.depends_on {
            if !names.contains_key(dep.as_str()) {
                return Err(err(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.name, dep
                )));
            }
        }

        if let Some(reference) = &step.for_each {
            match names.get(reference.step.as_str()) {
                None => {
                    return Err(err(format!(
                        "step '{}' fans out over unknown step '{}'",
                        step.name, reference.step
                    )))
                }
                Some(&producer_index) if producer_index >= index => {
                    return Err(err(format!(
                        "step '{}' fans out over '{}', which is not declared earlier",
                        step.name, reference.step
                    )))
                }
                _ => {}
            }
        }

        if let Some(cond) = &step.conditional {
            for referenced in cond.referenced_steps() {
                if !names.contains_key(referenced) {
                    return Err(err(format!(
                        "step '{}' conditional references unknown step '{}'",
                        step.name, referenced
                    )));
                }
            }
        }

        if step.is_final && index + 1 != flow.steps.len() {
            return Err(err(format!(
                "step '{}' is final but {} step(s) follow it",
                step.name,
                flow.steps.len() - index - 1
            )));
        }
    }

    detect_dependency_cycle(flow)?;

    Ok(())
}

/// DFS over the `depends_on` graph. The step list is linear, but nothing
/// stops a file from writing mutually dependent steps.
fn detect_dependency_cycle(flow: &Flow) -> Result<(), MullError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }

    let index_of: HashMap<&str, usize> = flow
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();
    let mut marks = vec![Mark::White; flow.steps.len()];

    fn visit(
        flow: &Flow,
        index_of: &HashMap<&str, usize>,
        marks: &mut Vec<Mark>,
        i: usize,
    ) -> Result<(), String> {
        match marks[i] {
            Mark::Black => return Ok(()),
            Mark::Grey => return Err(flow.steps[i].name.clone()),
            Mark::White => {}
        }
        marks[i] = Mark::Grey;
        for dep in &flow.steps[i].depends_on {
            if let Some(&j) = index_of.get(dep.as_str()) {
                visit(flow, index_of, marks, j)?;
            }
        }
        marks[i] = Mark::Black;
        Ok(())
    }

    for i in 0..flow.steps.len() {
        visit(flow, &index_of, &mut marks, i).map_err(|step| {
            MullError::Config(format!(
                "flow '{}': dependency cycle through step '{}'",
                flow.flow_type, step
            ))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load;
    use std::io::Write;

    fn load_yaml(yaml: &str) -> Result<crate::config::loader::ConfigSnapshot, MullError> {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        load(Some(f.path()))
    }

    #[test]
    fn rejects_unknown_template_reference() {
        let err = load_yaml(
            r#"
thinking_flows:
  bad:
    steps:
      - name: a
        template: no_such_template
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown template"));
    }

    #[test]
    fn rejects_dependency_cycle() {
        let err = load_yaml(
            r#"
thinking_flows:
  bad:
    steps:
      - name: a
        template: reflection
        depends_on: [b]
      - name: b
        template: reflection
        depends_on: [a]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn rejects_forward_for_each() {
        let err = load_yaml(
            r#"
thinking_flows:
  bad:
    steps:
      - name: a
        template: reflection
        for_each: "b.items"
      - name: b
        template: reflection
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not declared earlier"));
    }

    #[test]
    fn rejects_final_with_trailing_steps() {
        let err = load_yaml(
            r#"
thinking_flows:
  bad:
    steps:
      - name: a
        template: reflection
        final: true
      - name: b
        template: reflection
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("final"));
    }

    #[test]
    fn rejects_unknown_step_in_conditional() {
        let err = load_yaml(
            r#"
thinking_flows:
  bad:
    steps:
      - name: a
        template: reflection
      - name: b
        template: reflection
        conditional: "ghost.quality_score >= 0.5"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown step 'ghost'"));
    }

    #[test]
    fn rejects_unknown_default_flow() {
        let err = load_yaml(
            r#"
server:
  default_flow: missing_flow
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("default_flow"));
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let err = load_yaml(
            r#"
thinking_flows:
  bad:
    steps:
      - name: a
        template: reflection
        quality_threshold: 1.5
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("outside [0,1]"));
    }

    #[test]
    fn rejects_template_with_undeclared_placeholder() {
        let err = load_yaml(
            r#"
templates:
  bad:
    required_params: [topic]
    body: "{topic} and {mystery}"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn rejects_required_param_without_placeholder() {
        let err = load_yaml(
            r#"
templates:
  bad:
    required_params: [topic, focus]
    body: "{topic} only"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("focus"));
    }
}
