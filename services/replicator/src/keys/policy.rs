//! Key policy and directory naming.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Prefix of every alias created for a source.
pub const ALIAS_PREFIX: &str = "alias/draco/";

/// Maximum alias length accepted by the key service.
pub const MAX_ALIAS_LEN: usize = 256;

/// Hex characters of the SHA-256 digest appended to shortened aliases.
const DIGEST_SUFFIX_LEN: usize = 16;

/// Role the producer account runs as in `region`.
pub fn producer_role_arn(producer_account: &str, region: &str) -> String {
    format!("arn:aws:iam::{producer_account}:role/DracoProducer-{region}")
}

/// Policy of a provisioned DR key.
///
/// The DR account root keeps full control; the producer role may encrypt
/// with the key and create grants for the storage services it copies with.
pub fn key_policy(dr_account: &str, producer_account: &str, region: &str) -> Value {
    let producer = producer_role_arn(producer_account, region);
    json!({
        "Version": "2012-10-17",
        "Id": "dr_key_policy",
        "Statement": [
            {
                "Sid": "DR Root account full access",
                "Effect": "Allow",
                "Principal": { "AWS": format!("arn:aws:iam::{dr_account}:root") },
                "Action": "kms:*",
                "Resource": "*"
            },
            {
                "Sid": "Allow Producer to encrypt with the key",
                "Effect": "Allow",
                "Principal": { "AWS": producer },
                "Action": [
                    "kms:Encrypt",
                    "kms:ReEncrypt*",
                    "kms:GenerateDataKey*",
                    "kms:DescribeKey"
                ],
                "Resource": "*"
            },
            {
                "Sid": "Allow Producer to use this key with RDS and EC2",
                "Effect": "Allow",
                "Principal": { "AWS": producer },
                "Action": [
                    "kms:CreateGrant",
                    "kms:ListGrants",
                    "kms:RevokeGrant"
                ],
                "Resource": "*",
                "Condition": { "Bool": { "kms:GrantIsForAWSResource": "true" } }
            }
        ]
    })
}

/// Description of the key provisioned for `source_name`.
pub fn key_description(source_name: &str) -> String {
    format!("DRACO key for {source_name}")
}

/// Alias of the key provisioned for `source_name`.
///
/// Characters outside the alias charset become `-`. Whenever the name had
/// to be altered or shortened, a digest of the original name is appended so
/// distinct sources never share an alias.
pub fn alias_name(source_name: &str) -> String {
    let sanitized: String = source_name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '/' | '_' | '-' => c,
            _ => '-',
        })
        .collect();

    let fits = ALIAS_PREFIX.len() + sanitized.len() <= MAX_ALIAS_LEN;
    if sanitized == source_name && fits {
        return format!("{ALIAS_PREFIX}{sanitized}");
    }

    let digest = hex::encode(Sha256::digest(source_name.as_bytes()));
    let suffix = &digest[..DIGEST_SUFFIX_LEN];
    let room = MAX_ALIAS_LEN - ALIAS_PREFIX.len() - DIGEST_SUFFIX_LEN - 1;
    // Sanitized names are ASCII, so any byte offset is a char boundary.
    let head = &sanitized[..sanitized.len().min(room)];
    format!("{ALIAS_PREFIX}{head}-{suffix}")
}

/// Object holding the key id in the legacy key directory.
pub fn object_key(source_name: &str) -> String {
    format!("keys/{source_name}")
}
