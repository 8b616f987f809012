//! Blocking access to the AWS SDK
//!
//! The SDK clients are async; the rest of the crate is not. An [`AwsSession`]
//! owns a current-thread tokio runtime and the loaded [`SdkConfig`], and
//! callers drive each request with [`AwsSession::block_on`].

use std::future::Future;

use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_cloudformation::config::Region;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

#[derive(Debug)]
pub struct AwsSession {
    runtime: Runtime,
    config: SdkConfig,
}

impl AwsSession {
    /// Loads credentials and region from the usual environment, profile and
    /// instance sources. An explicit `region` wins.
    pub fn load(region: Option<&str>) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let config = runtime.block_on(loader.load());
        debug!("AWS region: {:?}", config.region());

        Ok(Self { runtime, config })
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
