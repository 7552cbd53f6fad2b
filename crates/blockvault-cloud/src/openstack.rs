//! OpenStack compute and block-storage client.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use blockvault_core::config::CloudConfig;
use blockvault_core::error::AppError;
use blockvault_core::result::AppResult;
use blockvault_core::traits::{
    BackupCandidate, BackupQuota, BackupRequest, CloudBackupClient, RemoteBackupState,
};

use crate::error::CloudError;
use crate::models::{
    BackupEnvelope, CreateBackup, CreateBackupEnvelope, QuotaSetEnvelope, ServerList,
    VolumeEnvelope,
};
use crate::retry::RetryPolicy;

/// Longest volume or server name kept on a candidate.
const MAX_NAME_LEN: usize = 100;

/// Longest response body quoted in an error.
const MAX_ERROR_BODY: usize = 512;

/// REST client for an OpenStack-style cloud.
#[derive(Debug, Clone)]
pub struct OpenStackClient {
    http: Client,
    compute_endpoint: String,
    volume_endpoint: String,
    auth_token: String,
    metadata_key: Option<String>,
    force_delete: bool,
    retry: RetryPolicy,
}

impl OpenStackClient {
    /// Build a client from configuration.
    pub fn new(config: &CloudConfig) -> AppResult<Self> {
        if config.compute_endpoint.is_empty() || config.volume_endpoint.is_empty() {
            return Err(AppError::configuration(
                "cloud.compute_endpoint and cloud.volume_endpoint are required",
            ));
        }

        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            compute_endpoint: config.compute_endpoint.trim_end_matches('/').to_string(),
            volume_endpoint: config.volume_endpoint.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            metadata_key: config.backup_metadata_key.clone(),
            force_delete: config.force_delete,
            retry: RetryPolicy::from_config(&config.retry),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn volume_url(&self, path: &str) -> String {
        format!("{}/{}", self.volume_endpoint, path)
    }

    /// Send a request built by `build` under the retry policy and decode
    /// the JSON body.
    async fn fetch<T, F>(&self, operation: &str, build: F) -> Result<T, CloudError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        self.fetch_if(operation, CloudError::is_transient, build).await
    }

    /// Like [`fetch`](Self::fetch), resending only on failures accepted by
    /// `retryable`.
    async fn fetch_if<T, F>(
        &self,
        operation: &str,
        retryable: fn(&CloudError) -> bool,
        build: F,
    ) -> Result<T, CloudError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        self.retry
            .run_if(operation, retryable, || {
                let request = build(&self.http).header("X-Auth-Token", &self.auth_token);
                async move {
                    let response = check_status(request.send().await?).await?;
                    Ok(response.json::<T>().await?)
                }
            })
            .await
    }

    /// Like [`fetch`](Self::fetch) for calls without a response body.
    async fn execute<F>(&self, operation: &str, build: F) -> Result<(), CloudError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.retry
            .run(operation, || {
                let request = build(&self.http).header("X-Auth-Token", &self.auth_token);
                async move {
                    check_status(request.send().await?).await?;
                    Ok(())
                }
            })
            .await
    }

    async fn project_servers(&self, project_id: &str) -> Result<ServerList, CloudError> {
        let url = format!(
            "{}/servers/detail?all_tenants=True&project_id={}",
            self.compute_endpoint, project_id
        );
        self.fetch("list_servers", |c| c.get(&url)).await
    }

    async fn project_candidates(&self, project_id: &str) -> Result<Vec<BackupCandidate>, CloudError> {
        let servers = self.project_servers(project_id).await?;

        let mut candidates = Vec::new();
        for server in servers
            .servers
            .iter()
            .filter(|s| s.opted_in(self.metadata_key.as_deref()))
        {
            for attached in &server.volumes_attached {
                let url = self.volume_url(&format!("volumes/{}", attached.id));
                let volume = match self.fetch::<VolumeEnvelope, _>("get_volume", |c| c.get(&url)).await {
                    Ok(v) => v.volume,
                    Err(e) => {
                        warn!(volume_id = %attached.id, error = %e, "Skipping volume that could not be read");
                        continue;
                    }
                };
                if !volume.is_backupable() {
                    debug!(volume_id = %volume.id, status = %volume.status, "Volume not in a backupable state");
                    continue;
                }

                let volume_name = volume
                    .name
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| volume.id.clone());
                candidates.push(BackupCandidate {
                    project_id: project_id.to_string(),
                    volume_id: volume.id,
                    volume_name: truncate(&volume_name, MAX_NAME_LEN),
                    instance_id: server.id.clone(),
                    instance_name: truncate(&server.name, MAX_NAME_LEN),
                });
            }
        }
        Ok(candidates)
    }
}

#[async_trait]
impl CloudBackupClient for OpenStackClient {
    async fn list_backup_candidates(&self, projects: &[String]) -> AppResult<Vec<BackupCandidate>> {
        require_projects(projects)?;
        let mut candidates = Vec::new();
        for project_id in projects {
            match self.project_candidates(project_id).await {
                Ok(found) => {
                    debug!(project_id = %project_id, count = found.len(), "Listed backup candidates");
                    candidates.extend(found);
                }
                Err(e) => {
                    warn!(project_id = %project_id, error = %e, "Failed to list project servers, skipping project");
                }
            }
        }
        Ok(candidates)
    }

    async fn initiate_backup(&self, request: &BackupRequest) -> AppResult<String> {
        let url = self.volume_url("backups");
        let body = CreateBackupEnvelope {
            backup: CreateBackup {
                volume_id: &request.volume_id,
                name: &request.name,
                force: request.force,
                incremental: request.incremental,
            },
        };

        // A create that may have reached the provider is not sent again;
        // the duplicate it could produce would be tracked by no record.
        let created: BackupEnvelope = self
            .fetch_if("create_backup", CloudError::is_safe_to_resend, |c| {
                c.post(&url).json(&body)
            })
            .await
            .map_err(|e| {
                if e.is_transient() {
                    AppError::external_service(format!("create_backup outcome unknown: {e}"))
                } else {
                    AppError::from(e)
                }
            })?;
        info!(
            volume_id = %request.volume_id,
            backup_id = %created.backup.id,
            incremental = request.incremental,
            "Backup requested"
        );
        Ok(created.backup.id)
    }

    async fn get_backup_status(&self, backup_id: &str) -> AppResult<RemoteBackupState> {
        let url = self.volume_url(&format!("backups/{backup_id}"));
        match self.fetch::<BackupEnvelope, _>("get_backup", |c| c.get(&url)).await {
            Ok(found) => Ok(found
                .backup
                .status
                .as_deref()
                .map(RemoteBackupState::from_status)
                .unwrap_or_else(|| RemoteBackupState::Unknown(String::new()))),
            Err(CloudError::NotFound(_)) => Ok(RemoteBackupState::Missing),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_backup(&self, backup_id: &str, force: bool) -> AppResult<()> {
        let result = if force || self.force_delete {
            let url = self.volume_url(&format!("backups/{backup_id}/action"));
            let body = serde_json::json!({ "os-force_delete": {} });
            self.execute("force_delete_backup", |c| c.post(&url).json(&body))
                .await
        } else {
            let url = self.volume_url(&format!("backups/{backup_id}"));
            self.execute("delete_backup", |c| c.delete(&url)).await
        };

        match result {
            Ok(()) => Ok(()),
            Err(CloudError::NotFound(_)) => {
                debug!(backup_id = %backup_id, "Backup already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_backup_quota(&self, project_id: &str) -> AppResult<BackupQuota> {
        let url = self.volume_url(&format!("os-quota-sets/{project_id}?usage=True"));
        let quota: QuotaSetEnvelope = self.fetch("get_quota", |c| c.get(&url)).await?;
        Ok(BackupQuota {
            used: quota.quota_set.backups.in_use,
            limit: quota.quota_set.backups.limit,
        })
    }

    async fn list_instance_retention(
        &self,
        projects: &[String],
        metadata_key: &str,
    ) -> AppResult<HashMap<String, String>> {
        require_projects(projects)?;
        let mut policies = HashMap::new();
        for project_id in projects {
            let servers = match self.project_servers(project_id).await {
                Ok(list) => list.servers,
                Err(e) => {
                    warn!(project_id = %project_id, error = %e, "Failed to read server retention, skipping project");
                    continue;
                }
            };
            for server in servers {
                if let Some(policy) = server.metadata.get(metadata_key) {
                    policies.insert(server.id, policy.to_lowercase());
                }
            }
        }
        Ok(policies)
    }
}

/// The client only sees projects it is told about.
fn require_projects(projects: &[String]) -> AppResult<()> {
    if projects.is_empty() {
        return Err(AppError::configuration(
            "cloud.projects is empty; list the projects to back up",
        ));
    }
    Ok(())
}

/// Turn non-success responses into [`CloudError`]s.
async fn check_status(response: Response) -> Result<Response, CloudError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(CloudError::NotFound(response.url().to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(CloudError::Http {
        status: status.as_u16(),
        message: truncate(&body, MAX_ERROR_BODY),
    })
}

fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}
