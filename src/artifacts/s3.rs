//! S3 artifact store on the AWS SDK

use std::path::{Path, PathBuf};

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{ObjectCannedAcl, ServerSideEncryption, StorageClass};
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::{
    clean_double_slashes, fill, fill_path, Artifact, ArtifactDefaults, ArtifactError,
    ArtifactStore,
};
use crate::aws::AwsSession;
use crate::config::ArtifactSettings;

const CONTENT_TYPE: &str = "binary/octet-stream";

#[derive(Debug, Clone)]
pub struct S3Store {
    pub artifact: Artifact,
    pub bucket: String,
    pub region: Option<String>,
    /// Object key template
    pub path: String,
    /// Bucket URL template
    pub bucket_url: String,
    pub encrypt: bool,
}

fn s3_error<E: std::error::Error>(operation: &'static str, err: E) -> ArtifactError {
    ArtifactError::Aws {
        operation,
        message: DisplayErrorContext(&err).to_string(),
    }
}

impl S3Store {
    pub fn new(artifact: Artifact, bucket: impl Into<String>, settings: &ArtifactSettings) -> Self {
        Self {
            artifact,
            bucket: bucket.into(),
            region: None,
            path: settings.s3_path.clone(),
            bucket_url: settings.s3_bucket_url.clone(),
            encrypt: true,
        }
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    /// Object key of the artifact in `repo`
    fn key_in(&self, repo: &str) -> String {
        let key = self.artifact.key();
        let path = fill_path(
            &self.path,
            &[
                ("Repo", repo),
                ("Key", &key),
                ("Group", &self.artifact.group),
                ("Name", &self.artifact.name),
                ("Version", &self.artifact.version),
                ("FileName", self.artifact.base_name()),
                ("Bucket", &self.bucket),
            ],
        );
        clean_double_slashes(&path)
    }

    /// Object key of the artifact
    pub fn artifact_path(&self) -> String {
        self.key_in(&self.artifact.repo)
    }

    /// Full `s3://` location of the artifact
    pub fn s3_artifact_path(&self) -> String {
        let url = fill_path(&self.bucket_url, &[("Bucket", &self.bucket)]);
        clean_double_slashes(&format!("{url}{}", self.artifact_path()))
    }

    fn require_bucket(&self) -> Result<(), ArtifactError> {
        if self.bucket.is_empty() {
            return Err(ArtifactError::MissingField("bucket"));
        }
        Ok(())
    }

    fn encryption(&self) -> Option<ServerSideEncryption> {
        self.encrypt.then_some(ServerSideEncryption::Aes256)
    }

    fn connect(&self) -> Result<(AwsSession, Client), ArtifactError> {
        self.require_bucket()?;
        let session = AwsSession::load(self.region.as_deref()).map_err(|e| ArtifactError::Aws {
            operation: "LoadConfig",
            message: e.to_string(),
        })?;
        let client = Client::new(session.config());
        Ok((session, client))
    }
}

impl ArtifactStore for S3Store {
    fn kind(&self) -> &'static str {
        "s3"
    }

    fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    fn merge_defaults(&mut self, defaults: &ArtifactDefaults) {
        self.artifact.merge(defaults);
        fill(&mut self.bucket, defaults.get("bucket"));
        if self.region.is_none() {
            self.region = defaults.get("region").map(String::from);
        }
    }

    fn upload(&self) -> Result<String, ArtifactError> {
        let file = Path::new(&self.artifact.file_name);
        if !file.is_file() {
            return Err(ArtifactError::Io {
                path: file.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        let (session, client) = self.connect()?;

        let location = self.s3_artifact_path();
        info!("Uploading artifact {} to: {location}", self.artifact.file_name);

        session.block_on(async {
            let body = ByteStream::from_path(file)
                .await
                .map_err(|e| ArtifactError::Io {
                    path: file.to_path_buf(),
                    source: std::io::Error::other(e),
                })?;

            client
                .put_object()
                .bucket(&self.bucket)
                .key(self.artifact_path())
                .body(body)
                .content_type(CONTENT_TYPE)
                .acl(ObjectCannedAcl::BucketOwnerFullControl)
                .storage_class(StorageClass::Standard)
                .set_server_side_encryption(self.encryption())
                .send()
                .await
                .map_err(|e| s3_error("PutObject", e))?;
            Ok::<_, ArtifactError>(())
        })?;

        Ok(location)
    }

    fn download(&self) -> Result<(), ArtifactError> {
        let (session, client) = self.connect()?;
        info!(
            "Downloading artifact {} from: {}",
            self.artifact.file_name,
            self.s3_artifact_path()
        );

        let bytes = session.block_on(async {
            let object = client
                .get_object()
                .bucket(&self.bucket)
                .key(self.artifact_path())
                .send()
                .await
                .map_err(|e| s3_error("GetObject", e))?;
            let data = object
                .body
                .collect()
                .await
                .map_err(|e| s3_error("GetObject", e))?;
            Ok::<_, ArtifactError>(data.into_bytes())
        })?;

        let path = PathBuf::from(&self.artifact.file_name);
        debug!("Writing {} bytes to {}", bytes.len(), path.display());
        std::fs::write(&path, &bytes).map_err(|source| ArtifactError::Io { path, source })
    }

    fn promote(&self, from_repo: &str) -> Result<(), ArtifactError> {
        let (session, client) = self.connect()?;
        let from = self.key_in(from_repo);
        let to = self.artifact_path();
        info!(
            "Promoting artifact {} from: {from} to: {to}",
            self.artifact.file_name
        );

        let call = client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{from}", self.bucket))
            .key(to)
            .acl(ObjectCannedAcl::BucketOwnerFullControl)
            .storage_class(StorageClass::Standard)
            .set_server_side_encryption(self.encryption());
        session
            .block_on(call.send())
            .map(drop)
            .map_err(|e| s3_error("CopyObject", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(version: &str) -> S3Store {
        let artifact = Artifact {
            repo: "dev".into(),
            group: "com.something".into(),
            name: "test".into(),
            file_name: "testing.tar.gz".into(),
            version: version.into(),
        };
        S3Store::new(artifact, "stuff", &ArtifactSettings::default())
    }

    #[test]
    fn path_without_version() {
        assert_eq!(
            store("").s3_artifact_path(),
            "s3://stuff/artifacts/dev/com/something/test/testing.tar.gz"
        );
    }

    #[test]
    fn path_with_version() {
        let s3 = store("0.1.2");
        assert_eq!(
            s3.s3_artifact_path(),
            "s3://stuff/artifacts/dev/com/something/test/0.1.2/testing.tar.gz"
        );
        assert_eq!(
            s3.artifact_path(),
            "artifacts/dev/com/something/test/0.1.2/testing.tar.gz"
        );
    }

    #[test]
    fn promotion_source_uses_the_other_repo() {
        let s3 = store("1.0.0");
        assert_eq!(
            s3.key_in("sandbox"),
            "artifacts/sandbox/com/something/test/1.0.0/testing.tar.gz"
        );
    }

    #[test]
    fn defaults_fill_bucket_and_region() {
        let mut s3 = store("");
        s3.bucket.clear();
        let mut defaults = ArtifactDefaults::default();
        defaults.insert("bucket", "from-config");
        defaults.insert("region", "us-west-2");
        defaults.insert("version", "2.0.0");

        s3.merge_defaults(&defaults);
        assert_eq!(s3.bucket, "from-config");
        assert_eq!(s3.region.as_deref(), Some("us-west-2"));
        assert_eq!(s3.artifact.version, "2.0.0");
    }

    #[test]
    fn missing_bucket_is_reported() {
        let mut s3 = store("");
        s3.bucket.clear();
        assert!(matches!(
            s3.promote("sandbox"),
            Err(ArtifactError::MissingField("bucket"))
        ));
    }

    #[test]
    fn writes_are_encrypted_unless_disabled() {
        let mut s3 = store("");
        assert_eq!(s3.encryption(), Some(ServerSideEncryption::Aes256));

        s3.encrypt = false;
        assert_eq!(s3.encryption(), None);
    }
}
