//! Classification of Director target paths for organization scoping.
//!
//! Org-scoped paths look like `<source>/<org_id>/<product>/...` (for example
//! `datadog/2/APM_TRACING/abc/config`). Paths under `employee/` are internal
//! and carry no organization.

/// Leading segment of internal, org-less target paths.
const EMPLOYEE_SOURCE: &str = "employee";
/// Minimum number of segments of an org-scoped path.
const MIN_SCOPED_SEGMENTS: usize = 4;

/// Namespace a target path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPathSource {
    /// `employee/<product>/...`; exempt from org scoping.
    Employee,
    /// Any other leading segment; must carry an org id.
    Scoped,
}

/// Structured view of a target path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPathInfo {
    pub source: TargetPathSource,
    pub product: String,
    /// Present for [`TargetPathSource::Scoped`] paths.
    pub org_id: Option<u64>,
}

pub fn classify_target_path(path: &str) -> TargetPathSource {
    match path.split('/').next() {
        Some(EMPLOYEE_SOURCE) => TargetPathSource::Employee,
        _ => TargetPathSource::Scoped,
    }
}

/// Parses `path`, returning a human-readable reason when it is not usable.
pub fn parse_target_path(path: &str) -> Result<TargetPathInfo, String> {
    let segments: Vec<&str> = path.split('/').collect();
    match classify_target_path(path) {
        TargetPathSource::Employee => {
            let product = segments.get(1).copied().unwrap_or_default();
            if product.is_empty() {
                return Err(format!("target path '{path}' has an empty product"));
            }
            Ok(TargetPathInfo {
                source: TargetPathSource::Employee,
                product: product.to_string(),
                org_id: None,
            })
        }
        TargetPathSource::Scoped => {
            if segments.len() < MIN_SCOPED_SEGMENTS {
                return Err(format!(
                    "target path '{path}' has {} segments, expected at least {MIN_SCOPED_SEGMENTS}",
                    segments.len()
                ));
            }
            let org_segment = segments[1];
            let org_id: u64 = org_segment.parse().map_err(|err| {
                format!("could not parse org id '{org_segment}' in target path '{path}': {err}")
            })?;
            let product = segments[2];
            if product.is_empty() {
                return Err(format!("target path '{path}' has an empty product"));
            }
            Ok(TargetPathInfo {
                source: TargetPathSource::Scoped,
                product: product.to_string(),
                org_id: Some(org_id),
            })
        }
    }
}
