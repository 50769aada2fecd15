//! AWS IAM directory
//!
//! Users, groups and SSH keys come from IAM. The host role is read from the
//! EC2 instance metadata service.

use crate::Directory;
use async_trait::async_trait;
use aws_config::imds;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_iam::error::DisplayErrorContext;
use aws_sdk_iam::types::{EncodingType, StatusType};
use aws_sdk_iam::Client;
use bridge_core::config::AwsConfig;
use bridge_core::types::{DirectoryGroup, DirectoryUser, KeyStatus, SshPublicKey};
use bridge_core::{Error, Result};
use tracing::debug;

/// Metadata path listing the role names of the instance profile
const SECURITY_CREDENTIALS_PATH: &str = "/latest/meta-data/iam/security-credentials/";

/// IAM is global; the SDK still needs a region to sign requests
const FALLBACK_REGION: &str = "us-east-1";

pub struct IamDirectory {
    client: Client,
    imds: Option<imds::Client>,
}

impl IamDirectory {
    /// Build an IAM client from the default credential chain
    pub async fn from_config(config: &AwsConfig) -> Self {
        let region = RegionProviderChain::first_try(config.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(FALLBACK_REGION));

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;

        let imds = if config.resolve_host_role {
            Some(imds::Client::builder().build())
        } else {
            None
        };

        Self {
            client: Client::new(&sdk_config),
            imds,
        }
    }
}

#[async_trait]
impl Directory for IamDirectory {
    async fn host_role(&self) -> Result<Option<String>> {
        let Some(imds) = &self.imds else {
            return Ok(None);
        };

        let listing = imds.get(SECURITY_CREDENTIALS_PATH).await.map_err(|e| {
            Error::directory("GetInstanceRole", "instance metadata", DisplayErrorContext(&e))
        })?;

        let role = parse_role_listing(AsRef::<str>::as_ref(&listing));
        debug!("Host role: {:?}", role);
        Ok(role)
    }

    async fn list_groups(&self, prefixes: &[String]) -> Result<Vec<DirectoryGroup>> {
        let groups = self
            .client
            .list_groups()
            .into_paginator()
            .items()
            .send()
            .collect::<std::result::Result<Vec<_>, _>>()
            .await
            .map_err(|e| Error::directory("ListGroups", prefixes.join(","), DisplayErrorContext(&e)))?;

        let matched: Vec<DirectoryGroup> = groups
            .iter()
            .map(|g| DirectoryGroup::new(g.group_name(), g.group_id()))
            .filter(|g| g.matches_any(prefixes))
            .collect();

        debug!("{} of {} IAM groups match {:?}", matched.len(), groups.len(), prefixes);
        Ok(matched)
    }

    async fn group_members(&self, group: &DirectoryGroup) -> Result<Vec<String>> {
        let mut pages = self
            .client
            .get_group()
            .group_name(&group.group_name)
            .into_paginator()
            .send();

        let mut members = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                Error::directory("GetGroup", &group.group_name, DisplayErrorContext(&e))
            })?;
            members.extend(page.users().iter().map(|u| u.user_name().to_string()));
        }

        Ok(members)
    }

    async fn find_user(&self, username: &str) -> Result<Option<DirectoryUser>> {
        let output = match self.client.get_user().user_name(username).send().await {
            Ok(output) => output,
            Err(err) => {
                let err = err.into_service_error();
                if err.is_no_such_entity_exception() {
                    return Ok(None);
                }
                return Err(Error::directory("GetUser", username, DisplayErrorContext(&err)));
            }
        };

        let user = output
            .user()
            .ok_or_else(|| Error::directory("GetUser", username, "response contained no user"))?;

        Ok(Some(DirectoryUser {
            user_name: user.user_name().to_string(),
            user_id: user.user_id().to_string(),
            arn: user.arn().to_string(),
        }))
    }

    async fn ssh_public_keys(&self, username: &str) -> Result<Vec<SshPublicKey>> {
        let keys = self
            .client
            .list_ssh_public_keys()
            .user_name(username)
            .into_paginator()
            .items()
            .send()
            .collect::<std::result::Result<Vec<_>, _>>()
            .await
            .map_err(|e| Error::directory("ListSSHPublicKeys", username, DisplayErrorContext(&e)))?;

        Ok(keys
            .iter()
            .map(|k| SshPublicKey {
                user_name: k.user_name().to_string(),
                key_id: k.ssh_public_key_id().to_string(),
                status: match k.status() {
                    StatusType::Active => KeyStatus::Active,
                    _ => KeyStatus::Inactive,
                },
            })
            .collect())
    }

    async fn ssh_public_key_body(&self, username: &str, key_id: &str) -> Result<String> {
        let target = format!("{}/{}", username, key_id);

        let output = self
            .client
            .get_ssh_public_key()
            .user_name(username)
            .ssh_public_key_id(key_id)
            .encoding(EncodingType::Ssh)
            .send()
            .await
            .map_err(|e| Error::directory("GetSSHPublicKey", &target, DisplayErrorContext(&e)))?;

        let key = output
            .ssh_public_key()
            .ok_or_else(|| Error::directory("GetSSHPublicKey", &target, "response contained no key"))?;

        Ok(key.ssh_public_key_body().to_string())
    }
}

/// The metadata listing holds one role name per line; an instance profile has at most one
fn parse_role_listing(listing: &str) -> Option<String> {
    listing
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role_listing() {
        assert_eq!(parse_role_listing("web-server\n"), Some("web-server".to_string()));
        assert_eq!(parse_role_listing("\n  bastion  \n"), Some("bastion".to_string()));
        assert_eq!(parse_role_listing("db/"), Some("db".to_string()));
        assert_eq!(parse_role_listing(""), None);
        assert_eq!(parse_role_listing("\n\n"), None);
    }
}
