//! # Versioning
//!
//! The project version lives in `version.properties` as `version=<semver>`.
//! Git supplies commit, branch and tag metadata. [`default_render_vars`]
//! turns both into the variables every stack template can use:
//!
//! | Variable | Value |
//! |----------|-------|
//! | `LATEST_TAG` | most recent git tag |
//! | `BUILD_NUMBER` | `$USER` followed by the current UTC unix time |
//! | `ARTIFACT_VERSION` | version from `version.properties` |
//! | `STACK_VERSION` | the same version, safe for stack names |

mod git;
mod props;

use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use chrono::Utc;
use tracing::warn;

use crate::config::escape_stack_name;

pub use git::Git;
pub use props::{load_version, write_version, BuildProps, PropsError, BUILD_PROPS, VERSION_PROPS};

/// Template variables derived from the project in `dir`
pub fn default_render_vars(dir: &Path) -> BTreeMap<String, String> {
    let git = Git::new(dir);
    let user = env::var("USER").unwrap_or_else(|_| "unknown".to_string());

    let version = load_version(&dir.join(VERSION_PROPS))
        .unwrap_or_else(|e| {
            warn!("{}", e);
            Default::default()
        })
        .to_string();

    BTreeMap::from([
        ("LATEST_TAG".to_string(), git.latest_tag().unwrap_or_default()),
        ("BUILD_NUMBER".to_string(), format!("{}{}", user, Utc::now().timestamp())),
        ("STACK_VERSION".to_string(), escape_stack_name(&version)),
        ("ARTIFACT_VERSION".to_string(), version),
    ])
}
