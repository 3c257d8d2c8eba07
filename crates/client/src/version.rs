use ixsync_core::ClusterVersion;
use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\.(\d+)").unwrap());

/// Parse `implementationVersion` strings like `6.5.1-6299-enterprise`.
pub fn parse_version(s: &str) -> Option<ClusterVersion> {
    let caps = VERSION_RE.captures(s.trim())?;
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2)?.as_str().parse().ok()?;
    Some(ClusterVersion::new(major, minor))
}
