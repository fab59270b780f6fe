//! Global condition keys
//!
//! Keys are stored lowercase; lookups must lowercase first.

use ahash::AHashSet;
use once_cell::sync::Lazy;

pub const PRINCIPAL_TAG_PREFIX: &str = "aws:principaltag/";
pub const RESOURCE_TAG_PREFIX: &str = "aws:resourcetag/";
pub const REQUEST_TAG_PREFIX: &str = "aws:requesttag/";

pub const PRINCIPAL_ARN: &str = "aws:principalarn";
pub const PRINCIPAL_ACCOUNT: &str = "aws:principalaccount";
pub const PRINCIPAL_ORG_PATHS: &str = "aws:principalorgpaths";
pub const PRINCIPAL_ORG_ID: &str = "aws:principalorgid";
pub const PRINCIPAL_TYPE: &str = "aws:principaltype";

pub const RESOURCE_ACCOUNT: &str = "aws:resourceaccount";
pub const RESOURCE_ORG_PATHS: &str = "aws:resourceorgpaths";
pub const RESOURCE_ORG_ID: &str = "aws:resourceorgid";

pub const CURRENT_TIME: &str = "aws:currenttime";
pub const EPOCH_TIME: &str = "aws:epochtime";

static GLOBAL_KEYS: Lazy<AHashSet<&'static str>> = Lazy::new(|| {
    [
        PRINCIPAL_ARN,
        PRINCIPAL_ACCOUNT,
        PRINCIPAL_ORG_PATHS,
        PRINCIPAL_ORG_ID,
        "aws:principalisawsservice",
        "aws:principalservicename",
        "aws:principalservicenameslist",
        PRINCIPAL_TYPE,
        "aws:userid",
        "aws:username",
        "aws:federatedprovider",
        "aws:tokenissuetime",
        "aws:multifactorauthage",
        "aws:multifactorauthpresent",
        "aws:ec2instancesourcevpc",
        "aws:ec2instancesourceprivateipv4",
        "aws:sourceidentity",
        "ec2:roledelivery",
        "ec2:sourceinstancearn",
        "aws:sourceip",
        "aws:sourcevpc",
        "aws:sourcevpce",
        "aws:vpcsourceip",
        RESOURCE_ACCOUNT,
        RESOURCE_ORG_PATHS,
        RESOURCE_ORG_ID,
        "aws:calledvia",
        "aws:calledviafirst",
        "aws:calledvialast",
        "aws:viaawsservice",
        CURRENT_TIME,
        EPOCH_TIME,
        "aws:referer",
        "aws:requestedregion",
        "aws:tagkeys",
        "aws:securetransport",
        "aws:sourcearn",
        "aws:sourceaccount",
        "aws:sourceorgpaths",
        "aws:sourceorgid",
        "aws:useragent",
    ]
    .into_iter()
    .collect()
});

/// Whether `key` (already lowercase) is usable with every action
pub fn is_global(key: &str) -> bool {
    GLOBAL_KEYS.contains(key)
        || key.starts_with(PRINCIPAL_TAG_PREFIX)
        || key.starts_with(RESOURCE_TAG_PREFIX)
        || key.starts_with(REQUEST_TAG_PREFIX)
}

/// Single-segment tag name after `prefix`, if `key` has that shape
///
/// `aws:principaltag/team` yields `team`; `aws:principaltag/a/b` yields nothing.
pub fn tag_name<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let name = key.strip_prefix(prefix)?;
    if name.is_empty() || name.contains('/') {
        return None;
    }
    Some(name)
}
