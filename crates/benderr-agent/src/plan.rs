//! Plan file loading.
//!
//! A plan is an ordered list of sequence invocations plus the package policy
//! used to provision each test's environment. Relative paths in the file
//! resolve against the plan file's own directory.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("failed to read plan file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse plan file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("plan contains no tests")]
    EmptyPlan,
}

/// How test environments get their packages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct PackagePolicy {
    /// Root directory for per-sequence environments.
    pub env_root: Option<PathBuf>,
    /// Local package cache consulted before any index.
    pub find_links: Option<PathBuf>,
    /// Permit index lookups over the network.
    pub allow_online: bool,
    /// Additional indexes, only used when online.
    pub extra_index_urls: Vec<String>,
    /// Package specs every test environment needs.
    pub requirements: Vec<String>,
}

impl PackagePolicy {
    /// Environment root, defaulting to `<home>/.agent/envs`.
    pub fn resolved_env_root(&self) -> PathBuf {
        self.env_root.clone().unwrap_or_else(|| {
            dirs::home_dir().map_or_else(|| PathBuf::from(".agent/envs"), |h| h.join(".agent/envs"))
        })
    }
}

/// One sequence invocation in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanTest {
    pub name: String,
    pub config: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub packages: PackagePolicy,
    #[serde(default)]
    pub tests: Vec<PlanTest>,
}

/// Load and validate a plan file, resolving relative paths against its
/// directory.
pub fn plan_from_file(path: &Path) -> Result<Plan, PlanError> {
    let content = std::fs::read_to_string(path)?;
    let mut plan: Plan = serde_json::from_str(&content)?;
    if plan.tests.is_empty() {
        return Err(PlanError::EmptyPlan);
    }

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for test in &mut plan.tests {
        test.config = resolve(base, &test.config);
    }
    if let Some(env_root) = plan.packages.env_root.take() {
        plan.packages.env_root = Some(resolve(base, &env_root));
    }
    if let Some(find_links) = plan.packages.find_links.take() {
        plan.packages.find_links = Some(resolve(base, &find_links));
    }
    Ok(plan)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_plan(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("plan.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn full_plan_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plan(
            dir.path(),
            r#"{
                "packages": {
                    "env_root": "envs",
                    "find_links": "dist",
                    "allow_online": true,
                    "extra_index_urls": ["https://pypi.org/simple"],
                    "requirements": ["benderr-cli==0.2.0"]
                },
                "tests": [
                    {"name": "demo-sequence", "config": "demo_steps.json"},
                    {"name": "demo-sequence", "config": "/abs/steps.json"}
                ]
            }"#,
        );
        let plan = plan_from_file(&path).unwrap();
        assert_eq!(plan.tests.len(), 2);
        assert_eq!(plan.tests[0].config, dir.path().join("demo_steps.json"));
        assert_eq!(plan.tests[1].config, PathBuf::from("/abs/steps.json"));
        assert_eq!(plan.packages.env_root, Some(dir.path().join("envs")));
        assert_eq!(plan.packages.find_links, Some(dir.path().join("dist")));
        assert!(plan.packages.allow_online);
        assert_eq!(plan.packages.requirements, vec!["benderr-cli==0.2.0"]);
    }

    #[test]
    fn packages_section_is_optional_and_offline_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plan(
            dir.path(),
            r#"{"tests": [{"name": "demo-sequence", "config": "steps.json"}]}"#,
        );
        let plan = plan_from_file(&path).unwrap();
        assert!(!plan.packages.allow_online);
        assert!(plan.packages.requirements.is_empty());
        assert!(plan
            .packages
            .resolved_env_root()
            .ends_with(".agent/envs"));
    }

    #[test]
    fn empty_tests_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plan(dir.path(), r#"{"tests": []}"#);
        assert!(matches!(plan_from_file(&path), Err(PlanError::EmptyPlan)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plan(dir.path(), "{not json");
        assert!(matches!(plan_from_file(&path), Err(PlanError::Parse(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            plan_from_file(Path::new("/nonexistent/plan.json")),
            Err(PlanError::Io(_))
        ));
    }
}
