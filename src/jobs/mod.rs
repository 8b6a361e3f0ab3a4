use std::fmt::{Display, Formatter};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::debug;
use serde_json::Value;

use crate::registry::{PinId, PinState};

pub mod dispatcher;
pub mod dry_run;
pub mod kubernetes;
pub mod rate_limit;

/// A job specification read from disk. Opaque apart from `metadata`, which
/// the dispatcher fills in before submission.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTemplate {
    source: PathBuf,
    document: Value,
}

impl JobTemplate {
    pub fn new(source: PathBuf, document: Value) -> Self {
        Self { source, document }
    }

    /// The file this template was read from. Also the rate limit key.
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_document(self) -> Value {
        self.document
    }
}

#[derive(Debug)]
pub enum TemplateError {
    Io { path: PathBuf, error: std::io::Error },
    Parse { path: PathBuf, error: serde_json::Error },
    NotAnObject { path: PathBuf },
}

impl Display for TemplateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateError::Io { path, error } => write!(f, "Error reading {:?}: {}", path, error),
            TemplateError::Parse { path, error } => {
                write!(f, "Malformed job template {:?}: {}", path, error)
            }
            TemplateError::NotAnObject { path } => {
                write!(f, "Job template {:?} is not a JSON object", path)
            }
        }
    }
}

impl std::error::Error for TemplateError {}

/// `output_pin_<id>.json`
pub fn template_path(dir: &Path, pin: PinId) -> PathBuf {
    dir.join(format!("output_pin_{}.json", pin))
}

/// `output_pin_<id>_<on|off>.json`
pub fn state_template_path(dir: &Path, pin: PinId, state: PinState) -> PathBuf {
    dir.join(format!("output_pin_{}_{}.json", pin, state.file_suffix()))
}

/// Finds the template for a pin that has reached `state`. A state specific
/// file wins over the plain one. `Ok(None)` when neither exists.
pub fn load_template(dir: &Path, pin: PinId, state: PinState) -> Result<Option<JobTemplate>, TemplateError> {
    for path in [state_template_path(dir, pin, state), template_path(dir, pin)] {
        if let Some(template) = read_template(&path)? {
            return Ok(Some(template));
        }
    }
    debug!("No job template for pin {} in {:?}", pin, dir);
    Ok(None)
}

fn read_template(path: &Path) -> Result<Option<JobTemplate>, TemplateError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(TemplateError::Io {
                path: path.to_owned(),
                error,
            })
        }
    };

    let document: Value = serde_json::from_str(&data).map_err(|error| TemplateError::Parse {
        path: path.to_owned(),
        error,
    })?;

    if !document.is_object() {
        return Err(TemplateError::NotAnObject {
            path: path.to_owned(),
        });
    }

    Ok(Some(JobTemplate::new(path.to_owned(), document)))
}
