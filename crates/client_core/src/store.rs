//! Client for the remote issue/workflow store.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Issue, IssueKey, ProjectId, StateId, Workflow},
    error::ApiError,
    protocol::{MarkAllReadResponse, Paginated, TransitionRequest, UnreadCountResponse},
};
use tracing::{debug, warn};
use url::Url;

use crate::{config::ClientSettings, error::StoreError};

const DEFAULT_MAX_ISSUE_PAGES: usize = 50;

/// Explicit session context handed to the store at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    base_url: Url,
    access_token: Option<String>,
}

impl Session {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let base_url = Url::parse(&format!("{trimmed}/"))?;
        Ok(Self {
            base_url,
            access_token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }
}

#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn fetch_workflow(&self, project: ProjectId) -> Result<Workflow, StoreError>;
    /// Canonical issue list for a project, all pages concatenated.
    async fn fetch_issues(&self, project: ProjectId) -> Result<Vec<Issue>, StoreError>;
    async fn transition_issue(
        &self,
        project: ProjectId,
        key: &IssueKey,
        to_state: StateId,
    ) -> Result<Issue, StoreError>;
    async fn unread_notification_count(&self) -> Result<u64, StoreError>;
    async fn mark_all_notifications_read(&self) -> Result<u64, StoreError>;
}

pub struct RestIssueStore {
    http: Client,
    session: Session,
    max_issue_pages: usize,
}

impl RestIssueStore {
    pub fn new(session: Session) -> Self {
        Self {
            http: Client::new(),
            session,
            max_issue_pages: DEFAULT_MAX_ISSUE_PAGES,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, StoreError> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            http,
            session: settings.session()?,
            max_issue_pages: settings.max_issue_pages.max(1),
        })
    }

    pub fn with_max_issue_pages(mut self, pages: usize) -> Self {
        self.max_issue_pages = pages.max(1);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.session.access_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, StoreError> {
        let response = self.authorize(self.http.get(url)).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        return Err(ApiError::from_body(status.as_u16(), &body).into());
    }
    serde_json::from_slice(&body).map_err(|err| StoreError::Decode(err.to_string()))
}

#[async_trait]
impl IssueStore for RestIssueStore {
    async fn fetch_workflow(&self, project: ProjectId) -> Result<Workflow, StoreError> {
        let url = self
            .session
            .endpoint(&format!("projects/{project}/workflow/"))?;
        self.get_json(url).await
    }

    async fn fetch_issues(&self, project: ProjectId) -> Result<Vec<Issue>, StoreError> {
        let mut url = self
            .session
            .endpoint(&format!("projects/{project}/issues/"))?;
        let mut issues = Vec::new();

        for page in 1..=self.max_issue_pages {
            let body: Paginated<Issue> = self.get_json(url.clone()).await?;
            debug!(
                project = project.0,
                page,
                received = body.results.len(),
                total = body.count,
                "issues: fetched page"
            );
            issues.extend(body.results);

            let Some(next) = body.next else {
                return Ok(issues);
            };
            // `next` is normally absolute; tolerate servers that send a relative link.
            url = url.join(&next)?;
        }

        warn!(
            project = project.0,
            pages = self.max_issue_pages,
            "issues: page limit reached, board is truncated"
        );
        Ok(issues)
    }

    async fn transition_issue(
        &self,
        project: ProjectId,
        key: &IssueKey,
        to_state: StateId,
    ) -> Result<Issue, StoreError> {
        let url = self
            .session
            .endpoint(&format!("projects/{project}/issues/{key}/transitions/"))?;
        let response = self
            .authorize(self.http.post(url))
            .json(&TransitionRequest {
                to_state_id: to_state,
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn unread_notification_count(&self) -> Result<u64, StoreError> {
        let url = self.session.endpoint("notifications/unread-count/")?;
        let body: UnreadCountResponse = self.get_json(url).await?;
        Ok(body.count)
    }

    async fn mark_all_notifications_read(&self) -> Result<u64, StoreError> {
        let url = self.session.endpoint("notifications/mark-all-read/")?;
        let response = self.authorize(self.http.post(url)).send().await?;
        let body: MarkAllReadResponse = decode(response).await?;
        Ok(body.marked_read)
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
