//! Building provider adapters from settings

use blogsync_delta::dropbox::{DropboxSource, HttpDropboxApi};
use blogsync_delta::drive::{DriveSource, HttpDriveApi};
use blogsync_delta::local::LocalFolderSource;
use blogsync_delta::macagent::{MacAgentClient, MacAgentSource};
use blogsync_delta::{Provider, RemoteProvider};
use std::sync::Arc;

use crate::config::{BlogConfig, Settings};
use crate::{Error, Result};

pub const ENV_DROPBOX_TOKEN: &str = "BLOGSYNC_DROPBOX_TOKEN";
pub const ENV_DRIVE_TOKEN: &str = "BLOGSYNC_DRIVE_TOKEN";
pub const ENV_AGENT_SECRET: &str = "BLOGSYNC_AGENT_SECRET";

fn secret(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::config(format!("{name} is not set")))
}

fn required<'a>(blog: &'a BlogConfig, value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value.ok_or_else(|| Error::config(format!("blog {} needs `{field}`", blog.id)))
}

/// The provider adapter for a configured blog.
pub fn connect(settings: &Settings, blog: &BlogConfig) -> Result<Arc<dyn RemoteProvider>> {
    let mirror = settings.blog_folder(&blog.id);
    let retry = settings.retry_policy();

    let provider: Arc<dyn RemoteProvider> = match blog.provider {
        Provider::Local => {
            let source = blog
                .source
                .as_deref()
                .ok_or_else(|| Error::config(format!("blog {} needs `source`", blog.id)))?;
            Arc::new(LocalFolderSource::new(source, mirror))
        }
        Provider::Dropbox => {
            let api = HttpDropboxApi::new(
                secret(ENV_DROPBOX_TOKEN)?,
                settings.metadata_timeout(),
                settings.transfer_timeout(),
            );
            Arc::new(DropboxSource::new(Arc::new(api), blog.folder_id.clone(), mirror).with_retry_policy(retry))
        }
        Provider::GoogleDrive => {
            let folder_id = required(blog, blog.folder_id.as_deref(), "folder_id")?;
            let api = HttpDriveApi::new(
                secret(ENV_DRIVE_TOKEN)?,
                settings.metadata_timeout(),
                settings.transfer_timeout(),
            );
            let state_file = settings.data_dir.join("drive").join(format!("{}.json", blog.id));
            Arc::new(
                DriveSource::new(Arc::new(api), folder_id)
                    .with_retry_policy(retry)
                    .with_state_file(state_file)?,
            )
        }
        Provider::ICloud => {
            let url = required(blog, blog.agent_url.as_deref(), "agent_url")?;
            let client = MacAgentClient::new(url, &blog.id, secret(ENV_AGENT_SECRET)?)
                .with_timeouts(settings.metadata_timeout(), settings.transfer_timeout())
                .with_max_file_size(settings.reconcile.max_file_size);
            Arc::new(MacAgentSource::new(client, mirror).with_retry_policy(retry))
        }
    };

    tracing::debug!(blog_id = %blog.id, provider = %blog.provider, "Connected provider");
    Ok(provider)
}
