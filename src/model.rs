//! Wire types for the REST API.
//!
//! Field names follow the server's JSON exactly; the API mixes `snake_case`
//! (summaries, jobs) and `camelCase` (project detail, packages) per object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Ecosystems and packages
// ============================================================================

/// Canonical package registry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Npm,
    Pypi,
    Maven,
    Nuget,
    Rubygems,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::Npm => "npm",
            PackageType::Pypi => "pypi",
            PackageType::Maven => "maven",
            PackageType::Nuget => "nuget",
            PackageType::Rubygems => "rubygems",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single dependency as submitted for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub package_type: PackageType,
}

/// A declared dependency of a package.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageSpecifier {
    pub name: String,
    pub registry: String,
    pub version: String,
}

// ============================================================================
// Groups
// ============================================================================

/// A group the authenticated user belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGroup {
    pub group_name: String,
    pub owner_email: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListUserGroupsResponse {
    pub groups: Vec<UserGroup>,
}

// ============================================================================
// Projects
// ============================================================================

/// Lightweight description of a project, without dependencies or issues.
///
/// `group_name` is set for group projects and unset for personal ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub group_name: Option<String>,
    /// Determined by the project's latest job
    #[serde(default)]
    pub ecosystem: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectSummary {
    /// Group owning this project, treating an empty name as personal.
    pub fn group(&self) -> Option<&str> {
        self.group_name.as_deref().filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

/// Body of a successful `POST /data/projects`; only the id is guaranteed.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedProject {
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Full project detail: dependencies, issues and scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latest_job_created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dependencies: Vec<FullPackage>,
    #[serde(default)]
    pub issues: Vec<IssuesListItem>,
    #[serde(default)]
    pub issue_impacts: IssueImpacts,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub registry: Option<String>,
    /// How the project was ingested (CLI, GitHub integration, ...)
    #[serde(default)]
    pub ingestion_source: Option<String>,
    #[serde(default)]
    pub risk_scores: RiskScores,
    #[serde(default)]
    pub risk_threshold_actions: Option<RiskThresholds>,
    #[serde(default)]
    pub total_risk_score: f32,
}

/// A dependency inside a project detail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FullPackage {
    pub id: String,
    pub name: String,
    pub version: String,
    pub registry: String,
    pub complete: bool,
    pub description: Option<String>,
    pub license: Option<String>,
    pub published_date: String,
    pub repo_url: Option<String>,
    pub dep_specs: Vec<PackageSpecifier>,
    pub issues: Vec<IssuesListItem>,
    pub issues_details: Vec<Issue>,
    pub issue_impacts: IssueImpacts,
    pub risk_scores: RiskScores,
}

// ============================================================================
// Risk and issues
// ============================================================================

/// Per-domain risk scores in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskScores {
    pub author: f32,
    pub engineering: f32,
    pub license: f32,
    pub malicious_code: f32,
    pub total: f32,
    pub vulnerability: f32,
}

/// Count of issues per severity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IssueImpacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
    #[default]
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskDomain {
    Author,
    Engineering,
    License,
    MaliciousCode,
    Vulnerability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RiskType {
    AuthorsRisk,
    EngineeringRisk,
    LicenseRisk,
    MaliciousCodeRisk,
    TotalRisk,
    Vulnerabilities,
}

/// Suppression state of an issue; `False` means the issue is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IgnoredReason {
    #[default]
    False,
    FalsePositive,
    NotRelevant,
    Other,
}

/// An issue attached to a project or package.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuesListItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub ignored: IgnoredReason,
    pub impact: RiskLevel,
    pub risk_type: RiskType,
    #[serde(default)]
    pub score: f32,
}

const RECOMMENDATION_HEADING: &str = "### Recommendation";

impl IssuesListItem {
    pub fn is_ignored(&self) -> bool {
        self.ignored != IgnoredReason::False
    }

    /// The `### Recommendation` section of the description, heading included.
    pub fn remediation(&self) -> Option<&str> {
        self.description
            .find(RECOMMENDATION_HEADING)
            .map(|offset| &self.description[offset..])
    }
}

/// Detailed issue as reported by the analysis job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub severity: RiskLevel,
    pub domain: RiskDomain,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

// ============================================================================
// Thresholds and preferences
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdViolationAction {
    Break,
    #[default]
    None,
    Warn,
}

/// A user threshold setting for one risk domain.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdDescriptor {
    pub action: ThresholdViolationAction,
    pub active: bool,
    pub threshold: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskThresholds {
    pub author: ThresholdDescriptor,
    pub engineering: ThresholdDescriptor,
    pub license: ThresholdDescriptor,
    pub malicious_code: ThresholdDescriptor,
    pub total: ThresholdDescriptor,
    pub vulnerability: ThresholdDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoredIssue {
    pub id: String,
    pub reason: IgnoredReason,
    pub tag: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectPreferences {
    pub default_label: Option<String>,
    pub ignored_issues: Option<Vec<IgnoredIssue>>,
    pub thresholds: RiskThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPreferencesResponse {
    pub project_id: Uuid,
    pub preferences: ProjectPreferences,
}

// ============================================================================
// Jobs
// ============================================================================

/// Body of `POST /data/jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitPackageRequest {
    pub group_name: Option<String>,
    pub is_user: bool,
    pub label: String,
    pub packages: Vec<PackageDescriptor>,
    pub project: String,
    #[serde(rename = "type")]
    pub package_type: PackageType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitPackageResponse {
    /// Nil when the server omitted it
    #[serde(default)]
    pub job_id: Uuid,
}

/// Options for a job submission.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub label: String,
    pub group_name: Option<String>,
    /// Interactive submission rather than CI
    pub is_user: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            label: String::new(),
            group_name: None,
            is_user: true,
        }
    }
}

/// Thresholds captured with a job, as plain floats.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobThresholds {
    pub author: f32,
    pub engineering: f32,
    pub license: f32,
    pub malicious: f32,
    pub total: f32,
    pub vulnerability: f32,
}

/// Status of an analysis job; `P` is the per-package status shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus<P> {
    pub job_id: Uuid,
    pub ecosystem: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub pass: bool,
    pub project: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub last_updated: u64,
    #[serde(default)]
    pub num_incomplete: Option<u32>,
    #[serde(default = "Vec::new")]
    pub packages: Vec<P>,
    #[serde(default)]
    pub thresholds: JobThresholds,
    #[serde(default)]
    pub user_email: String,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub status: serde_json::Value,
    #[serde(default)]
    pub action: serde_json::Value,
}

/// Per-package status in the non-verbose job view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageStatus {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub last_updated: u64,
    #[serde(default)]
    pub num_dependencies: u32,
    #[serde(default)]
    pub num_vulnerabilities: u32,
    #[serde(default)]
    pub package_score: Option<f64>,
    #[serde(default)]
    pub status: serde_json::Value,
}

/// Per-package status in the verbose job view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageStatusExtended {
    #[serde(flatten)]
    pub base: PackageStatus,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
    #[serde(default, rename = "riskVectors")]
    pub risk_vectors: HashMap<String, f32>,
    #[serde(default, rename = "type")]
    pub package_type: Option<PackageType>,
}

// ============================================================================
// Service metadata
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Health {
    pub response: String,
}

/// OIDC `userinfo` document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthStatus {
    pub sub: String,
    pub email_verified: bool,
    pub name: String,
    pub preferred_username: String,
    pub given_name: String,
    pub family_name: String,
    pub email: String,
}

/// Error envelope returned with non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonErrorResponse {
    pub error: JsonErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonErrorBody {
    pub code: u16,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub error_id: Option<Uuid>,
}
