//! Wire types of the compute and block-storage REST APIs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// `GET /servers/detail` response.
#[derive(Debug, Deserialize)]
pub struct ServerList {
    /// Servers visible to the token.
    #[serde(default)]
    pub servers: Vec<Server>,
}

/// One server.
#[derive(Debug, Deserialize)]
pub struct Server {
    /// Server id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// User metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Attached volumes.
    #[serde(rename = "os-extended-volumes:volumes_attached", default)]
    pub volumes_attached: Vec<AttachedVolume>,
}

impl Server {
    /// Whether the server opted in through metadata; every server passes
    /// when no key is configured.
    pub fn opted_in(&self, metadata_key: Option<&str>) -> bool {
        match metadata_key {
            None => true,
            Some(key) => self
                .metadata
                .get(key)
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
        }
    }
}

/// Reference to an attached volume.
#[derive(Debug, Deserialize)]
pub struct AttachedVolume {
    /// Volume id.
    pub id: String,
}

/// `GET /volumes/{id}` response.
#[derive(Debug, Deserialize)]
pub struct VolumeEnvelope {
    /// The volume.
    pub volume: Volume,
}

/// One volume.
#[derive(Debug, Deserialize)]
pub struct Volume {
    /// Volume id.
    pub id: String,
    /// Display name, may be unset.
    #[serde(default)]
    pub name: Option<String>,
    /// Provider status such as `available` or `in-use`.
    pub status: String,
}

impl Volume {
    /// Only idle or attached volumes can be backed up.
    pub fn is_backupable(&self) -> bool {
        matches!(self.status.as_str(), "available" | "in-use")
    }
}

/// `POST /backups` request.
#[derive(Debug, Serialize)]
pub struct CreateBackupEnvelope<'a> {
    /// The backup to create.
    pub backup: CreateBackup<'a>,
}

/// Backup creation parameters.
#[derive(Debug, Serialize)]
pub struct CreateBackup<'a> {
    /// Volume to back up.
    pub volume_id: &'a str,
    /// Backup name.
    pub name: &'a str,
    /// Back up attached volumes.
    pub force: bool,
    /// Incremental backup.
    pub incremental: bool,
}

/// `GET /backups/{id}` and `POST /backups` response.
#[derive(Debug, Deserialize)]
pub struct BackupEnvelope {
    /// The backup.
    pub backup: Backup,
}

/// One backup.
#[derive(Debug, Deserialize)]
pub struct Backup {
    /// Backup id.
    pub id: String,
    /// Provider status; absent in creation responses.
    #[serde(default)]
    pub status: Option<String>,
}

/// `GET /os-quota-sets/{project}?usage=True` response.
#[derive(Debug, Deserialize)]
pub struct QuotaSetEnvelope {
    /// Quota set of the project.
    pub quota_set: QuotaSet,
}

/// Quota usage; only backups are read.
#[derive(Debug, Deserialize)]
pub struct QuotaSet {
    /// Backup count usage.
    pub backups: QuotaUsage,
}

/// One quota item with usage.
#[derive(Debug, Deserialize)]
pub struct QuotaUsage {
    /// Units in use.
    pub in_use: i64,
    /// Maximum units; `-1` is unlimited.
    pub limit: i64,
}
