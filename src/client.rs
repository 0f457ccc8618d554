//! REST client.
//!
//! [`PhylumClient`] is cheap to clone: configuration, transport and token
//! cache live behind an `Arc` and are never mutated after construction,
//! except for the token cache, which guards itself.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::aggregate::{AggregateOutcome, DetailAggregator, DetailSource, FanOut};
use crate::auth::TokenCache;
use crate::config::{ClientConfig, Credentials};
use crate::error::{PhylumError, Result};
use crate::lockfile::{LockfileAdapter, RemoteLockfileParser};
use crate::model::{
    AuthStatus, CreateProjectRequest, CreatedProject, Health, IssuesListItem, JobStatus,
    ListUserGroupsResponse, PackageDescriptor, PackageStatus, PackageStatusExtended, PackageType,
    ProjectDetail, ProjectPreferencesResponse, ProjectSummary, SubmitOptions,
    SubmitPackageRequest, SubmitPackageResponse, UserGroup,
};
use crate::transport::{
    classify_response, ApiRequest, ApiResponse, HttpTransport, ReqwestTransport, RequestBody,
};

/// Rejects anything that is not a UUID, before any request is made.
///
/// `kind` names the identifier in the error, e.g. `"job id"`.
pub fn parse_uuid(kind: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|_| PhylumError::Validation(format!("{} '{}' is not a UUID", kind, value)))
}

pub fn parse_project_id(project_id: &str) -> Result<Uuid> {
    parse_uuid("project id", project_id)
}

/// Group names end up in URL paths.
pub fn check_group_name(group_name: &str) -> Result<&str> {
    if group_name.is_empty() || group_name.contains(['/', '?', '#']) {
        return Err(PhylumError::Validation(format!(
            "invalid group name '{}'",
            group_name
        )));
    }
    Ok(group_name)
}

/// Endpoint serving the detail of one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailRoute {
    Personal(Uuid),
    Group { group_name: String, project_id: Uuid },
}

impl DetailRoute {
    pub fn for_summary(summary: &ProjectSummary) -> Self {
        match summary.group() {
            Some(group) => DetailRoute::Group {
                group_name: group.to_string(),
                project_id: summary.id,
            },
            None => DetailRoute::Personal(summary.id),
        }
    }

    /// Path relative to the API base URL.
    pub fn path(&self) -> String {
        match self {
            DetailRoute::Personal(id) => format!("/data/projects/{}", id),
            DetailRoute::Group {
                group_name,
                project_id,
            } => format!("/groups/{}/projects/{}", group_name, project_id),
        }
    }
}

struct ClientInner {
    config: ClientConfig,
    api_url: String,
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenCache>,
    aggregator: DetailAggregator,
}

/// Authenticated client for the Phylum API.
#[derive(Clone)]
pub struct PhylumClient {
    inner: Arc<ClientInner>,
}

impl PhylumClient {
    /// Builds a client with the `reqwest` transport and acquires a token.
    ///
    /// # Errors
    ///
    /// [`PhylumError::Validation`] for unusable configuration and
    /// [`PhylumError::AuthFailure`] if no access token can be obtained.
    #[instrument(skip(config, credentials), fields(api = %config.api_url()))]
    pub async fn connect(config: ClientConfig, credentials: Credentials) -> Result<Self> {
        config.validate()?;
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new(config.request_timeout)?);
        let tokens = TokenCache::acquire(&config, credentials, Arc::clone(&transport)).await?;
        info!("Client authenticated");
        Self::with_parts(config, transport, Arc::new(tokens))
    }

    /// Assembles a client from pre-built parts.
    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenCache>,
    ) -> Result<Self> {
        config.validate()?;
        let aggregator = DetailAggregator::new(FanOut::Bounded(config.max_parallel))?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                api_url: config.api_url(),
                config,
                transport,
                tokens,
                aggregator,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------------
    // Request plumbing
    // ------------------------------------------------------------------------

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.api_url, path)
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let token = self.inner.tokens.access_token().await?;
        let response = self.inner.transport.send(request.with_bearer(token)).await?;
        classify_response(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.execute(ApiRequest::get(self.url(path))).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let request = ApiRequest::post(self.url(path))
            .with_body(RequestBody::Json(serde_json::to_value(body)?));
        let response = self.execute(request).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    // ------------------------------------------------------------------------
    // Service
    // ------------------------------------------------------------------------

    /// `true` when the service reports itself alive.
    pub async fn health(&self) -> Result<bool> {
        let health: Health = self.get_json("/health").await?;
        Ok(health.response == "alive")
    }

    /// `true` when the issuer's `userinfo` accepts the current token and the
    /// user's email is verified. Any non-200 answer is `false`.
    pub async fn auth_status(&self) -> Result<bool> {
        let token = self.inner.tokens.access_token().await?;
        let request = ApiRequest::get(self.inner.config.userinfo_url()).with_bearer(token);
        let response = self.inner.transport.send(request).await?;
        if response.status != 200 {
            debug!(status = response.status, "userinfo rejected token");
            return Ok(false);
        }
        let status: AuthStatus = serde_json::from_slice(&response.body)?;
        Ok(status.email_verified)
    }

    // ------------------------------------------------------------------------
    // Groups and project listings
    // ------------------------------------------------------------------------

    pub async fn list_groups(&self) -> Result<Vec<UserGroup>> {
        let response: ListUserGroupsResponse = self.get_json("/groups").await?;
        Ok(response.groups)
    }

    pub async fn list_personal_projects(&self) -> Result<Vec<ProjectSummary>> {
        self.get_json("/data/projects/overview").await
    }

    pub async fn list_group_projects(&self, group_name: &str) -> Result<Vec<ProjectSummary>> {
        let group_name = check_group_name(group_name)?;
        self.get_json(&format!("/groups/{}/projects", group_name))
            .await
    }

    /// Every group's projects followed by the personal ones.
    ///
    /// Stops at the first listing that fails. Projects are not de-duplicated.
    #[instrument(skip(self))]
    pub async fn list_all_projects(&self) -> Result<Vec<ProjectSummary>> {
        let mut all = Vec::new();

        for group in self.list_groups().await? {
            let projects = self.list_group_projects(&group.group_name).await?;
            debug!(group = %group.group_name, count = projects.len(), "Listed group projects");
            all.extend(projects);
        }

        let personal = self.list_personal_projects().await?;
        debug!(count = personal.len(), "Listed personal projects");
        all.extend(personal);

        info!(total = all.len(), "Listed all projects");
        Ok(all)
    }

    // ------------------------------------------------------------------------
    // Project detail
    // ------------------------------------------------------------------------

    pub async fn get_user_project(&self, project_id: &str) -> Result<ProjectDetail> {
        let id = parse_project_id(project_id)?;
        self.get_json(&DetailRoute::Personal(id).path()).await
    }

    pub async fn get_group_project(
        &self,
        group_name: &str,
        project_id: &str,
    ) -> Result<ProjectDetail> {
        let route = DetailRoute::Group {
            group_name: check_group_name(group_name)?.to_string(),
            project_id: parse_project_id(project_id)?,
        };
        self.get_json(&route.path()).await
    }

    /// Looks the project up among all listed projects, then fetches it from
    /// the group or personal endpoint as appropriate.
    ///
    /// # Errors
    ///
    /// [`PhylumError::Api`] with code 404 if no listed project has this id.
    pub async fn get_project(&self, project_id: &str) -> Result<ProjectDetail> {
        let id = parse_project_id(project_id)?;
        let summary = self
            .list_all_projects()
            .await?
            .into_iter()
            .find(|summary| summary.id == id)
            .ok_or_else(|| PhylumError::Api {
                code: 404,
                description: format!("project {} not found", id),
            })?;
        self.fetch_detail(&summary).await
    }

    /// Fetches the detail of every summary, bounded by `max_parallel`.
    pub async fn fetch_all_details(&self, summaries: Vec<ProjectSummary>) -> AggregateOutcome {
        self.inner
            .aggregator
            .fetch_all(Arc::new(self.clone()), summaries)
            .await
    }

    /// Lists every project the user can see and fetches all their details.
    ///
    /// Listing errors abort the call; detail errors are reported per project.
    pub async fn fetch_all_projects(&self) -> Result<AggregateOutcome> {
        let summaries = self.list_all_projects().await?;
        Ok(self.fetch_all_details(summaries).await)
    }

    /// Fetches the details of one group's projects, optionally only those
    /// whose ecosystem matches.
    ///
    /// Details are always requested from the group endpoint of `group_name`,
    /// whatever group the listing reports for each project.
    pub async fn fetch_group_projects(
        &self,
        group_name: &str,
        ecosystem: Option<&str>,
    ) -> Result<AggregateOutcome> {
        let summaries: Vec<ProjectSummary> = self
            .list_group_projects(group_name)
            .await?
            .into_iter()
            .filter(|summary| match ecosystem {
                Some(wanted) => summary.ecosystem.as_deref() == Some(wanted),
                None => true,
            })
            .map(|summary| ProjectSummary {
                group_name: Some(group_name.to_string()),
                ..summary
            })
            .collect();
        Ok(self.fetch_all_details(summaries).await)
    }

    /// Active (not ignored) issues of a personal project.
    pub async fn get_project_issues(&self, project_id: &str) -> Result<Vec<IssuesListItem>> {
        let project = self.get_user_project(project_id).await?;
        Ok(project
            .issues
            .into_iter()
            .filter(|issue| !issue.is_ignored())
            .collect())
    }

    pub async fn get_project_preferences(
        &self,
        project_id: &str,
    ) -> Result<ProjectPreferencesResponse> {
        let id = parse_project_id(project_id)?;
        self.get_json(&format!("/preferences/project/{}", id)).await
    }

    // ------------------------------------------------------------------------
    // Project management
    // ------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn create_project(
        &self,
        name: &str,
        group_name: Option<&str>,
    ) -> Result<CreatedProject> {
        if name.trim().is_empty() {
            return Err(PhylumError::Validation(
                "project name must not be empty".to_string(),
            ));
        }
        let group_name = group_name.map(check_group_name).transpose()?;
        let request = CreateProjectRequest {
            name: name.to_string(),
            group_name: group_name.map(str::to_string),
        };
        let created: CreatedProject = self.post_json("/data/projects", &request).await?;
        info!(id = %created.id, "Project created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn delete_project(&self, project_id: &str) -> Result<()> {
        let id = parse_project_id(project_id)?;
        self.execute(ApiRequest::delete(self.url(&format!("/data/projects/{}", id))))
            .await?;
        info!(%id, "Project deleted");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------------

    /// Submits packages for analysis and returns the job id.
    #[instrument(skip(self, packages, options), fields(packages = packages.len()))]
    pub async fn submit_packages(
        &self,
        package_type: PackageType,
        project_id: &str,
        packages: &[PackageDescriptor],
        options: &SubmitOptions,
    ) -> Result<Uuid> {
        let project = parse_project_id(project_id)?;
        let request = SubmitPackageRequest {
            group_name: options.group_name.clone(),
            is_user: options.is_user,
            label: options.label.clone(),
            packages: packages.to_vec(),
            project: project.to_string(),
            package_type,
        };
        let response: SubmitPackageResponse = self.post_json("/data/jobs", &request).await?;
        if response.job_id.is_nil() {
            return Err(PhylumError::UnexpectedResponse(
                "job submission returned no job id".to_string(),
            ));
        }
        info!(job = %response.job_id, "Packages submitted");
        Ok(response.job_id)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<JobStatus<PackageStatus>> {
        let id = parse_uuid("job id", job_id)?;
        self.get_json(&format!("/data/jobs/{}?verbose=false", id))
            .await
    }

    pub async fn get_job_verbose(&self, job_id: &str) -> Result<JobStatus<PackageStatusExtended>> {
        let id = parse_uuid("job id", job_id)?;
        self.get_json(&format!("/data/jobs/{}?verbose=true", id))
            .await
    }

    // ------------------------------------------------------------------------
    // Lockfiles
    // ------------------------------------------------------------------------

    /// Parses a lockfile with the remote parsing service.
    pub async fn parse_lockfile(&self, path: &Path) -> Result<Vec<PackageDescriptor>> {
        let parser = Arc::new(RemoteLockfileParser::new(self.clone()));
        LockfileAdapter::new(parser).parse_lockfile(path).await
    }

    pub(crate) async fn upload_lockfile(
        &self,
        file_name: String,
        content: Vec<u8>,
    ) -> Result<Vec<PackageDescriptor>> {
        let request = ApiRequest::post(self.inner.config.parse_url.clone()).with_body(
            RequestBody::File {
                field: "lockfile".to_string(),
                file_name,
                content,
            },
        );
        let response = self.execute(request).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }
}

#[async_trait]
impl DetailSource for PhylumClient {
    async fn fetch_detail(&self, summary: &ProjectSummary) -> Result<ProjectDetail> {
        let route = DetailRoute::for_summary(summary);
        if let DetailRoute::Group { group_name, .. } = &route {
            check_group_name(group_name)?;
        }
        self.get_json(&route.path()).await
    }
}
