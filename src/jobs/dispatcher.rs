use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use log::warn;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::jobs::JobTemplate;

/// Which namespace wins when a template names its own.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NamespacePolicy {
    /// The template's `metadata.namespace` if present, else the default.
    #[default]
    Template,
    /// Always the configured default.
    Override,
}

/// Turns a template into a uniquely named job ready for submission.
#[derive(Debug, Clone)]
pub struct JobPreparer {
    name_prefix: String,
    default_namespace: String,
    namespace_policy: NamespacePolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedJob {
    name: String,
    namespace: String,
    body: Value,
}

impl PreparedJob {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

impl JobPreparer {
    pub fn new(name_prefix: String, default_namespace: String, namespace_policy: NamespacePolicy) -> Self {
        Self {
            name_prefix,
            default_namespace,
            namespace_policy,
        }
    }

    /// `<prefix>-<8 hex chars>`
    pub fn generate_name(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.name_prefix, &suffix[..8])
    }

    pub fn prepare(&self, template: JobTemplate) -> PreparedJob {
        self.prepare_named(template, self.generate_name())
    }

    pub fn prepare_named(&self, template: JobTemplate, name: String) -> PreparedJob {
        let source = template.source().to_owned();
        let mut body = template.into_document();

        let Some(document) = body.as_object_mut() else {
            // Loading rejects these, but a hand built template may not have been loaded.
            warn!("Job template {:?} is not an object, submitting as is", source);
            return PreparedJob {
                name,
                namespace: self.default_namespace.clone(),
                body,
            };
        };

        let mut metadata = match document.remove("metadata") {
            Some(Value::Object(metadata)) => metadata,
            Some(_) => {
                warn!("Replacing non-object metadata in {:?}", source);
                Map::new()
            }
            None => Map::new(),
        };

        let template_namespace = metadata
            .get("namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(str::to_owned);
        let namespace = match (self.namespace_policy, template_namespace) {
            (NamespacePolicy::Template, Some(ns)) => ns,
            _ => self.default_namespace.clone(),
        };

        metadata.insert("name".to_owned(), Value::String(name.clone()));
        metadata.insert("namespace".to_owned(), Value::String(namespace.clone()));
        document.insert("metadata".to_owned(), Value::Object(metadata));

        PreparedJob {
            name,
            namespace,
            body,
        }
    }
}

#[derive(Debug)]
pub enum DispatchError {
    Token(std::io::Error),
    Certificate(String),
    Network(reqwest::Error),
    Rejected { status: u16, body: String },
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Token(e) => write!(f, "Failed to read service account token: {}", e),
            DispatchError::Certificate(e) => write!(f, "Failed to load CA certificate: {}", e),
            DispatchError::Network(e) => write!(f, "Network Error: {}", e),
            DispatchError::Rejected { status, body } => {
                write!(f, "Failed to create job: {} {}", status, body)
            }
        }
    }
}

impl std::error::Error for DispatchError {}

#[derive(Debug)]
pub enum DispatchOutcome {
    Created { name: String, namespace: String },
    Failed { name: String, error: DispatchError },
}

impl DispatchOutcome {
    #[cfg(test)]
    pub fn is_created(&self) -> bool {
        matches!(self, DispatchOutcome::Created { .. })
    }
}

/// Submits jobs to the orchestrator. Implementations report failure in the
/// outcome and never retry.
#[async_trait]
pub trait JobDispatcher {
    async fn dispatch(&self, template: JobTemplate) -> DispatchOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn template(document: Value) -> JobTemplate {
        JobTemplate::new(PathBuf::from("/app/jobs/output_pin_17.json"), document)
    }

    fn preparer(policy: NamespacePolicy) -> JobPreparer {
        JobPreparer::new("pass-creator-job".into(), "default".into(), policy)
    }

    fn assert_generated_name(name: &str) {
        let suffix = name
            .strip_prefix("pass-creator-job-")
            .unwrap_or_else(|| panic!("Unexpected prefix: {}", name));
        assert_eq!(suffix.len(), 8, "{}", name);
        assert!(
            suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()),
            "{}",
            name
        );
    }

    #[test]
    fn test_generated_names() {
        let preparer = preparer(NamespacePolicy::Template);
        let first = preparer.generate_name();
        let second = preparer.generate_name();
        assert_generated_name(&first);
        assert_generated_name(&second);
        assert_ne!(first, second);
    }

    #[test]
    fn test_missing_metadata_is_synthesized() {
        let job = preparer(NamespacePolicy::Template).prepare(template(json!({"spec": {"backoffLimit": 2}})));
        assert_generated_name(job.name());
        assert_eq!(job.namespace(), "default");
        assert_eq!(job.body()["metadata"]["name"], json!(job.name()));
        assert_eq!(job.body()["metadata"]["namespace"], json!("default"));
        assert_eq!(job.body()["spec"]["backoffLimit"], json!(2));
    }

    #[test]
    fn test_non_object_metadata_is_replaced() {
        let job = preparer(NamespacePolicy::Template)
            .prepare_named(template(json!({"metadata": "nonsense"})), "job-1".into());
        assert_eq!(job.body()["metadata"], json!({"name": "job-1", "namespace": "default"}));
    }

    #[test]
    fn test_existing_name_is_overwritten() {
        let job = preparer(NamespacePolicy::Template).prepare_named(
            template(json!({"metadata": {"name": "pass-creator-job", "labels": {"app": "pass"}}})),
            "pass-creator-job-0123abcd".into(),
        );
        assert_eq!(job.body()["metadata"]["name"], json!("pass-creator-job-0123abcd"));
        assert_eq!(job.body()["metadata"]["labels"]["app"], json!("pass"));
    }

    #[test]
    fn test_template_namespace_policy() {
        let job = preparer(NamespacePolicy::Template)
            .prepare(template(json!({"metadata": {"namespace": "parking"}})));
        assert_eq!(job.namespace(), "parking");
        assert_eq!(job.body()["metadata"]["namespace"], json!("parking"));

        let job = preparer(NamespacePolicy::Template)
            .prepare(template(json!({"metadata": {"namespace": ""}})));
        assert_eq!(job.namespace(), "default");
    }

    #[test]
    fn test_override_namespace_policy() {
        let job = preparer(NamespacePolicy::Override)
            .prepare(template(json!({"metadata": {"namespace": "parking"}})));
        assert_eq!(job.namespace(), "default");
        assert_eq!(job.body()["metadata"]["namespace"], json!("default"));
    }
}
