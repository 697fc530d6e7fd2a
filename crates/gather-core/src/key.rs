//! Cache key derivation.
//!
//! Two URLs that point at the same organization must share one cache entry
//! and one in-flight slot, so each kind first tries to pull a stable
//! organization id out of the URL and only falls back to hashing the whole
//! URL when none is present.

use std::sync::LazyLock;

use regex::Regex;
use sha1::{Digest, Sha1};

use crate::job::JobKind;

static GIS_FIRM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/firm/(\d+)").expect("valid 2gis firm pattern"));

static YANDEX_ORG_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/org/[^/]+/(\d+)").expect("valid yandex org pattern"));

static YANDEX_OID_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]oid=(\d+)").expect("valid yandex oid pattern"));

/// Extract the organization id for `kind` from `url`, if the kind has one.
pub fn extract_org_id(kind: JobKind, url: &str) -> Option<&str> {
    match kind {
        JobKind::Gis => first_group(&GIS_FIRM, url),
        JobKind::Yandex => {
            first_group(&YANDEX_ORG_PATH, url).or_else(|| first_group(&YANDEX_OID_PARAM, url))
        }
        JobKind::Google | JobKind::Doctors => None,
    }
}

fn first_group<'a>(re: &Regex, haystack: &'a str) -> Option<&'a str> {
    re.captures(haystack)?.get(1).map(|m| m.as_str())
}

/// Derive the cache key for a `(kind, url)` pair.
///
/// - `cache:{kind}:org:{id}` when an organization id is found
/// - `cache:{kind}:url:{sha1(url)}` otherwise
pub fn derive_key(kind: JobKind, url: &str) -> String {
    match extract_org_id(kind, url) {
        Some(id) => format!("cache:{kind}:org:{id}"),
        None => format!("cache:{kind}:url:{}", sha1_hex(url)),
    }
}

/// SHA-1 of a string, returned as 40-char lowercase hex.
pub fn sha1_hex(content: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
