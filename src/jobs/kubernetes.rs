use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use log::{debug, error, info};
use reqwest::{Certificate, Client, StatusCode};

use crate::config::OrchestratorConfig;
use crate::jobs::dispatcher::{DispatchError, DispatchOutcome, JobDispatcher, JobPreparer, PreparedJob};
use crate::jobs::JobTemplate;

/// Creates jobs through the cluster's batch/v1 REST API using the pod's
/// service account credentials.
pub struct KubernetesDispatcher {
    client: Client,
    api_server: String,
    token_path: PathBuf,
    preparer: JobPreparer,
}

impl KubernetesDispatcher {
    pub fn create(config: &OrchestratorConfig, preparer: JobPreparer) -> Result<Self, DispatchError> {
        let mut builder = Client::builder().timeout(*config.get_request_timeout());

        if let Some(ca_cert_path) = config.resolve_ca_cert_path() {
            let pem = fs::read(&ca_cert_path)
                .map_err(|e| DispatchError::Certificate(format!("{:?}: {}", ca_cert_path, e)))?;
            let certificate = Certificate::from_pem(&pem)
                .map_err(|e| DispatchError::Certificate(format!("{:?}: {}", ca_cert_path, e)))?;
            builder = builder.add_root_certificate(certificate);
        }

        let client = builder.build().map_err(DispatchError::Network)?;
        let api_server = config.resolve_api_server();
        info!("Submitting jobs to {}", api_server);

        Ok(Self {
            client,
            api_server,
            token_path: config.get_token_path().to_owned(),
            preparer,
        })
    }

    fn jobs_url(&self, namespace: &str) -> String {
        format!(
            "{}/apis/batch/v1/namespaces/{}/jobs",
            self.api_server.trim_end_matches('/'),
            namespace
        )
    }

    // Read on every submission so a rotated token is picked up.
    fn load_token(&self) -> Result<String, DispatchError> {
        fs::read_to_string(&self.token_path)
            .map(|token| token.trim().to_owned())
            .map_err(DispatchError::Token)
    }

    async fn submit(&self, job: &PreparedJob) -> Result<(), DispatchError> {
        let token = self.load_token()?;
        let url = self.jobs_url(job.namespace());
        debug!("Posting job to {} with name {}", url, job.name());

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(job.body())
            .send()
            .await
            .map_err(DispatchError::Network)?;

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DispatchError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl JobDispatcher for KubernetesDispatcher {
    async fn dispatch(&self, template: JobTemplate) -> DispatchOutcome {
        let job = self.preparer.prepare(template);
        match self.submit(&job).await {
            Ok(()) => {
                info!("Job created successfully: {}", job.name());
                DispatchOutcome::Created {
                    name: job.name().to_owned(),
                    namespace: job.namespace().to_owned(),
                }
            }
            Err(error) => {
                error!("Failed to create job {}: {}", job.name(), error);
                DispatchOutcome::Failed {
                    name: job.name().to_owned(),
                    error,
                }
            }
        }
    }
}
