//! Nexus artifact store, upload only

use reqwest::blocking::{multipart, Client};
use tracing::{debug, info};

use super::{fill, Artifact, ArtifactDefaults, ArtifactError, ArtifactStore};

#[derive(Debug, Clone)]
pub struct NexusStore {
    pub artifact: Artifact,
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl NexusStore {
    pub fn new(artifact: Artifact, url: impl Into<String>) -> Self {
        Self {
            artifact,
            url: url.into(),
            user: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, user: Option<String>, password: Option<String>) -> Self {
        self.user = user.filter(|u| !u.is_empty());
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    /// Form fields of the upload request
    fn fields(&self) -> [(&'static str, String); 7] {
        [
            ("r", self.artifact.repo.clone()),
            ("hasPom", "false".to_string()),
            ("e", "gz".to_string()),
            ("p", "gz".to_string()),
            ("g", self.artifact.group.clone()),
            ("a", self.artifact.name.clone()),
            ("v", self.artifact.version.clone()),
        ]
    }

    fn http_error(&self, reason: impl ToString) -> ArtifactError {
        ArtifactError::Http {
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }
}

impl ArtifactStore for NexusStore {
    fn kind(&self) -> &'static str {
        "nexus"
    }

    fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    fn merge_defaults(&mut self, defaults: &ArtifactDefaults) {
        self.artifact.merge(defaults);
        fill(&mut self.url, defaults.get("url"));
        if self.user.is_none() {
            self.user = defaults.get("user").map(String::from);
        }
        if self.password.is_none() {
            self.password = defaults.get("password").map(String::from);
        }
    }

    fn upload(&self) -> Result<String, ArtifactError> {
        if self.url.is_empty() {
            return Err(ArtifactError::MissingField("url"));
        }

        let mut form = multipart::Form::new();
        for (name, value) in self.fields() {
            form = form.text(name, value);
        }
        let form = form
            .file("file", &self.artifact.file_name)
            .map_err(|source| ArtifactError::Io {
                path: self.artifact.file_name.clone().into(),
                source,
            })?;

        info!("Uploading artifact {} to: {}", self.artifact.file_name, self.url);
        let mut request = Client::new().post(&self.url).multipart(form);
        if let (Some(user), Some(password)) = (&self.user, &self.password) {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().map_err(|e| self.http_error(e))?;
        let status = response.status();
        let body = response.text().unwrap_or_default();
        debug!("Response: {status} {body}");

        if !status.is_success() {
            return Err(self.http_error(status));
        }
        Ok(self.url.clone())
    }

    fn download(&self) -> Result<(), ArtifactError> {
        Err(ArtifactError::Unsupported {
            store: "nexus",
            operation: "download",
        })
    }

    fn promote(&self, _from_repo: &str) -> Result<(), ArtifactError> {
        Err(ArtifactError::Unsupported {
            store: "nexus",
            operation: "promote",
        })
    }
}
