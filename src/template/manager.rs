use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};

use moka::sync::Cache;

use crate::models::template::{OutputKind, Template};
use crate::template::TemplateSet;
use crate::MullError;

/// Metadata row returned by [`TemplateManager::list`].
#[derive(Debug, Clone)]
pub struct TemplateInfo {
    pub name: String,
    pub description: String,
    pub required_params: Vec<String>,
    pub optional_params: Vec<String>,
    pub expected_output: OutputKind,
    pub uses: u64,
}

/// Resolves `(name, params)` to a rendered prompt string.
///
/// Holds an immutable template snapshot behind an `RwLock<Arc<_>>` (swapped
/// wholesale on reload) and a bounded cache of rendered results. Renders are
/// pure: identical inputs yield byte-identical output.
pub struct TemplateManager {
    snapshot: RwLock<Arc<TemplateSet>>,
    rendered: Cache<u64, String>,
    usage: Mutex<HashMap<String, u64>>,
}

impl TemplateManager {
    pub fn new(snapshot: Arc<TemplateSet>, cache_size: u64) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            rendered: Cache::builder().max_capacity(cache_size).build(),
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Current snapshot. Callers hold the `Arc`, not the lock, so a reload
    /// mid-call is invisible to them.
    pub fn current(&self) -> Arc<TemplateSet> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swap in a new snapshot and drop all cached renders.
    pub fn reload(&self, new: Arc<TemplateSet>) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = new;
        self.rendered.invalidate_all();
    }

    /// Look up a template by name (cloned out of the snapshot).
    pub fn template(&self, name: &str) -> Option<Template> {
        self.current().get(name).cloned()
    }

    /// Render `name` with `params`.
    ///
    /// Missing required parameters produce a `ValidationError` naming them;
    /// extra parameters are permitted. Absent optional markers render as the
    /// empty string.
    pub fn get(&self, name: &str, params: &BTreeMap<String, String>) -> Result<String, MullError> {
        let snapshot = self.current();
        let template = snapshot
            .get(name)
            .ok_or_else(|| MullError::TemplateNotFound {
                name: name.to_string(),
            })?;

        let missing: Vec<&str> = template
            .required_params
            .iter()
            .filter(|p| !params.contains_key(p.as_str()))
            .map(|p| p.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(MullError::Validation(format!(
                "missing required parameters for template '{}': {}",
                name,
                missing.join(", ")
            )));
        }

        let key = cache_key(name, params);
        if let Some(hit) = self.rendered.get(&key) {
            self.count_use(name);
            return Ok(hit);
        }

        let rendered = substitute(&template.body, params);
        self.rendered.insert(key, rendered.clone());
        self.count_use(name);
        Ok(rendered)
    }

    /// All templates in the current snapshot, sorted by name.
    pub fn list(&self) -> Vec<TemplateInfo> {
        let usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<TemplateInfo> = self
            .current()
            .iter()
            .map(|t| TemplateInfo {
                name: t.name.clone(),
                description: t.description.clone(),
                required_params: t.required_params.clone(),
                optional_params: t.optional_params.clone(),
                expected_output: t.expected_output,
                uses: usage.get(&t.name).copied().unwrap_or(0),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Generic fallback body used when a flow references a template that
    /// disappeared between load and render.
    pub fn fallback(template_name: &str, step_name: &str) -> String {
        format!(
            "# Template unavailable\n\n\
             The template '{template_name}' for step '{step_name}' could not be \
             resolved. Proceed with the step using your own judgement for the \
             output format, and report the missing template to the operator."
        )
    }

    fn count_use(&self, name: &str) {
        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        *usage.entry(name.to_string()).or_insert(0) += 1;
    }
}

/// Stable hash over the template name and the sorted parameter pairs.
/// `BTreeMap` iteration order makes this deterministic.
fn cache_key(name: &str, params: &BTreeMap<String, String>) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    for (k, v) in params {
        k.hash(&mut hasher);
        v.hash(&mut hasher);
    }
    hasher.finish()
}

/// Replace every `{ident}` marker with the matching parameter value, or the
/// empty string when absent. Non-identifier braces pass through untouched;
/// no recursion (substituted values are never re-scanned).
fn substitute(body: &str, params: &BTreeMap<String, String>) -> String {
    let bytes = body.as_bytes();
    let mut out = String::with_capacity(body.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                end += 1;
            }
            if end > start
                && end < bytes.len()
                && bytes[end] == b'}'
                && !bytes[start].is_ascii_digit()
            {
                let name = &body[start..end];
                if let Some(value) = params.get(name) {
                    out.push_str(value);
                }
                i = end + 1;
                continue;
            }
        }
        // Safe: we only land on ASCII '{' boundaries above, so pushing the
        // raw byte run char-by-char needs the original char width.
        let ch = body[i..].chars().next().unwrap_or('\u{fffd}');
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::template::TemplateSource;

    fn manager_with(template: Template) -> TemplateManager {
        TemplateManager::new(
            Arc::new(TemplateSet::from_templates(vec![template])),
            50,
        )
    }

    fn simple_template() -> Template {
        Template {
            name: "greeting".to_string(),
            description: String::new(),
            required_params: vec!["name".to_string()],
            optional_params: vec!["mood".to_string()],
            expected_output: OutputKind::Text,
            body: "Hello {name}, you seem {mood} today. {name}!".to_string(),
            source: TemplateSource::Builtin,
        }
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_with_substitution() {
        let m = manager_with(simple_template());
        let out = m
            .get("greeting", &params(&[("name", "Ada"), ("mood", "sharp")]))
            .unwrap();
        assert_eq!(out, "Hello Ada, you seem sharp today. Ada!");
    }

    #[test]
    fn missing_optional_renders_empty() {
        let m = manager_with(simple_template());
        let out = m.get("greeting", &params(&[("name", "Ada")])).unwrap();
        assert_eq!(out, "Hello Ada, you seem  today. Ada!");
    }

    #[test]
    fn missing_required_names_the_parameter() {
        let m = manager_with(simple_template());
        let err = m.get("greeting", &params(&[])).unwrap_err();
        match err {
            MullError::Validation(msg) => assert!(msg.contains("name")),
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn unknown_template_is_not_found() {
        let m = manager_with(simple_template());
        assert!(matches!(
            m.get("nope", &params(&[])).unwrap_err(),
            MullError::TemplateNotFound { .. }
        ));
    }

    #[test]
    fn repeated_renders_are_identical() {
        let m = manager_with(simple_template());
        let p = params(&[("name", "Ada"), ("mood", "calm")]);
        let first = m.get("greeting", &p).unwrap();
        let second = m.get("greeting", &p).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn extra_params_are_permitted() {
        let m = manager_with(simple_template());
        let out = m
            .get(
                "greeting",
                &params(&[("name", "Ada"), ("mood", "calm"), ("unused", "x")]),
            )
            .unwrap();
        assert!(out.contains("Ada"));
    }

    #[test]
    fn reload_swaps_snapshot_and_drops_cache() {
        let m = manager_with(simple_template());
        let p = params(&[("name", "Ada")]);
        let before = m.get("greeting", &p).unwrap();

        let mut replacement = simple_template();
        replacement.body = "Goodbye {name}.".to_string();
        m.reload(Arc::new(TemplateSet::from_templates(vec![replacement])));

        let after = m.get("greeting", &p).unwrap();
        assert_ne!(before, after);
        assert_eq!(after, "Goodbye Ada.");
    }

    #[test]
    fn json_braces_survive_rendering() {
        let mut t = simple_template();
        t.body = r#"Use {name}. Reply: {"items": [{"id": 1}]}"#.to_string();
        let m = manager_with(t);
        let out = m.get("greeting", &params(&[("name", "Ada")])).unwrap();
        assert_eq!(out, r#"Use Ada. Reply: {"items": [{"id": 1}]}"#);
    }

    #[test]
    fn usage_counts_accumulate() {
        let m = manager_with(simple_template());
        let p = params(&[("name", "Ada")]);
        m.get("greeting", &p).unwrap();
        m.get("greeting", &p).unwrap();
        let info = m.list();
        assert_eq!(info[0].uses, 2);
    }
}
