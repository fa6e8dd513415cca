//! Deterministic names for generated resources.
//!
//! Every generated object name is a DNS-1123 label: lowercase alphanumerics
//! and `-`, at most 63 characters, never starting or ending with `-`.
//!
//! Names are injective over their inputs. A readable name is used only when
//! the input can be read back from it (`team-a/blog` becomes `team-a-blog`);
//! otherwise the sanitized, truncated form gets a hash of the raw input as
//! its last segment (`team/a-blog` becomes `team-a-blog-<hash>`). Readable
//! names never end in a hash-shaped segment, so the two forms cannot meet.

use sha2::{Digest, Sha256};

/// Kubernetes object name length limit
pub const MAX_NAME_LEN: usize = 63;

/// Hex characters of the identity hash carried by lossy names
pub const HASH_LEN: usize = 10;

const FALLBACK_NAME: &str = "site";

/// Sanitizes an arbitrary string into a DNS-1123 label.
///
/// Lossy: use it for display only, never as an identity.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = sanitize_untruncated(raw);
    truncate_label(&mut out, MAX_NAME_LEN);
    if out.is_empty() { FALLBACK_NAME.to_string() } else { out }
}

fn sanitize_untruncated(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-').len();
    out.truncate(trimmed);
    out
}

fn truncate_label(label: &mut String, max: usize) {
    label.truncate(max);
    let trimmed = label.trim_end_matches('-').len();
    label.truncate(trimmed);
}

fn is_alnum(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

fn is_dns_label(label: &str) -> bool {
    !label.is_empty()
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

fn is_hash_shaped(segment: &str) -> bool {
    segment.len() == HASH_LEN && segment.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn identity_hash(identity: &str) -> String {
    let digest = hex::encode(Sha256::digest(identity.as_bytes()));
    digest[..HASH_LEN].to_string()
}

/// `readable` (plus suffix) when it is unambiguous and fits, otherwise a
/// truncated stem followed by the hash of `identity`
fn qualified_name(readable: &str, unambiguous: bool, identity: &str, suffix: Option<&str>) -> String {
    let with_suffix = |stem: &str| match suffix {
        Some(suffix) => format!("{stem}-{suffix}"),
        None => stem.to_string(),
    };

    if unambiguous {
        let name = with_suffix(readable);
        if name.len() <= MAX_NAME_LEN {
            return name;
        }
    }

    let hash = identity_hash(identity);
    let suffix_len = suffix.map_or(0, |s| s.len() + 1);
    let mut stem = sanitize_untruncated(readable);
    truncate_label(&mut stem, MAX_NAME_LEN.saturating_sub(HASH_LEN + 1 + suffix_len));
    if stem.is_empty() {
        with_suffix(&hash)
    } else {
        with_suffix(&format!("{stem}-{hash}"))
    }
}

/// Name derived from a record identity plus an optional suffix
pub fn resource_name(namespace: &str, name: &str, suffix: Option<&str>) -> String {
    let unambiguous = is_dns_label(namespace) && is_alnum(name) && !is_hash_shaped(name);
    qualified_name(
        &format!("{namespace}-{name}"),
        unambiguous,
        &format!("{namespace}/{name}"),
        suffix,
    )
}

/// Name shared by the site directory, the routing rule and the rewrite prefix
pub fn site_name(namespace: &str, name: &str) -> String {
    resource_name(namespace, name, None)
}

/// Name of the path-rewrite middleware
pub fn middleware_name(namespace: &str, name: &str) -> String {
    resource_name(namespace, name, Some("rewrite"))
}

fn domain_name(domain: &str, suffix: Option<&str>) -> String {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = domain.split('.').collect();
    let unambiguous = labels.iter().all(|l| is_alnum(l)) && labels.last().is_some_and(|l| !is_hash_shaped(l));
    qualified_name(&labels.join("-"), unambiguous, &domain, suffix)
}

/// Name of the shared certificate for a domain
pub fn certificate_name(domain: &str) -> String {
    domain_name(domain, None)
}

/// Name of the TLS secret issued for a domain
pub fn certificate_secret_name(domain: &str) -> String {
    domain_name(domain, Some("tls"))
}
