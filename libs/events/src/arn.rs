//! Resource name parsing.
//!
//! Saga messages only carry arns; the resource identifier (`SourceId`) is
//! always derived from them rather than trusted from the payload.

use std::fmt;
use std::str::FromStr;

use crate::error::EventError;

/// A parsed resource name: `arn:{partition}:{service}:{region}:{account}:{resource}`.
///
/// The resource part is either `{type}:{id}` (database snapshots) or
/// `{type}/{id}` (volume snapshots). Database ids may themselves contain
/// `:` (automated snapshots are `rds:{name}`), so only the first separator
/// splits type from id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Arn {
    partition: String,
    service: String,
    region: String,
    account: String,
    resource_type: String,
    separator: char,
    resource_id: String,
}

impl Arn {
    /// Builds an arn from its parts.
    pub fn new(
        service: impl Into<String>,
        region: impl Into<String>,
        account: impl Into<String>,
        resource_type: impl Into<String>,
        separator: char,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            partition: "aws".to_string(),
            service: service.into(),
            region: region.into(),
            account: account.into(),
            resource_type: resource_type.into(),
            separator,
            resource_id: resource_id.into(),
        }
    }

    /// Parses an arn string.
    pub fn parse(s: &str) -> Result<Self, EventError> {
        let invalid = |message: &str| EventError::InvalidArn {
            arn: s.to_string(),
            message: message.to_string(),
        };

        if s.is_empty() {
            return Err(invalid("empty"));
        }

        let parts: Vec<&str> = s.splitn(6, ':').collect();
        if parts.len() != 6 {
            return Err(invalid("expected six ':'-separated components"));
        }
        if parts[0] != "arn" {
            return Err(invalid("missing 'arn' prefix"));
        }
        if parts[2].is_empty() {
            return Err(invalid("missing service"));
        }

        let resource = parts[5];
        let Some(split_at) = resource.find([':', '/']) else {
            return Err(invalid("resource has no type separator"));
        };
        let (resource_type, rest) = resource.split_at(split_at);
        let separator = rest.chars().next().unwrap_or(':');
        let resource_id = &rest[separator.len_utf8()..];
        if resource_type.is_empty() || resource_id.is_empty() {
            return Err(invalid("empty resource type or id"));
        }

        Ok(Self {
            partition: parts[1].to_string(),
            service: parts[2].to_string(),
            region: parts[3].to_string(),
            account: parts[4].to_string(),
            resource_type: resource_type.to_string(),
            separator,
            resource_id: resource_id.to_string(),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// The resource type, e.g. `snapshot` or `cluster-snapshot`.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// The resource identifier after the type separator.
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Region of the resource.
    ///
    /// Scheduled-backup notifications put the region in the account slot
    /// (`arn:aws:ec2::us-west-2:snapshot/snap-…`); this accepts both forms.
    pub fn effective_region(&self) -> Option<&str> {
        if !self.region.is_empty() {
            return Some(&self.region);
        }
        if !self.account.is_empty() && !self.account.chars().all(|c| c.is_ascii_digit()) {
            return Some(&self.account);
        }
        None
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}{}{}",
            self.partition,
            self.service,
            self.region,
            self.account,
            self.resource_type,
            self.separator,
            self.resource_id
        )
    }
}

impl FromStr for Arn {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
