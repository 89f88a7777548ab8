//! Jenkins HTTP client implementing the [`BuildServer`] port.
//!
//! Job metadata comes from the JSON API, the managed configuration from
//! `config.xml`. Writes post rendered XML.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::xml::{read_job_xml, render_job_xml};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Build, BuildResult, JenkinsConfig, Job, JobKind, JobParameter, JobSpec, Repository};
use crate::domain::ports::BuildServer;

const MATRIX_CLASS: &str = "hudson.matrix.MatrixProject";
const JOB_TREE: &str = "name,url,description,property[parameterDefinitions[name,type,defaultParameterValue[value]]],activeConfigurations[name]";
const BUILD_TREE: &str = "number,url,building,result";

#[derive(Debug, Deserialize)]
struct JenkinsJob {
    #[serde(rename = "_class", default)]
    class: String,
    name: String,
    url: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    property: Vec<JenkinsProperty>,
    #[serde(rename = "activeConfigurations", default)]
    active_configurations: Vec<JenkinsConfiguration>,
}

#[derive(Debug, Deserialize)]
struct JenkinsProperty {
    #[serde(rename = "parameterDefinitions", default)]
    parameter_definitions: Vec<JenkinsParameter>,
}

#[derive(Debug, Deserialize)]
struct JenkinsParameter {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(rename = "defaultParameterValue", default)]
    default: Option<JenkinsValue>,
}

#[derive(Debug, Deserialize)]
struct JenkinsValue {
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct JenkinsConfiguration {
    name: String,
}

#[derive(Debug, Deserialize)]
struct JenkinsBuild {
    number: u64,
    url: String,
    #[serde(default)]
    building: bool,
    #[serde(default)]
    result: Option<BuildResult>,
}

#[derive(Debug, Deserialize)]
struct JenkinsQueue {
    #[serde(default)]
    items: Vec<Value>,
}

fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// HTTP client for the Jenkins REST API.
pub struct JenkinsClient {
    http: Client,
    base_url: String,
    user: Option<String>,
    token: Option<String>,
    git_url: String,
}

impl JenkinsClient {
    pub fn new(config: &JenkinsConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            token: config.token.clone(),
            git_url: config.git_url.trim_end_matches('/').to_string(),
        }
    }

    fn job_url(&self, name: &str) -> String {
        format!("{}/job/{name}", self.base_url)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.http.request(method, url).header("User-Agent", "stagehand");
        match &self.user {
            Some(user) => request.basic_auth(user, self.token.as_deref()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> DomainResult<reqwest::Response> {
        let resp = request
            .send()
            .await
            .map_err(|e| DomainError::Transient(format!("Jenkins {what} request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let reason = format!("Jenkins {what} returned {status}: {body}");
        Err(match status {
            StatusCode::NOT_FOUND => DomainError::ResourceNotFound(reason),
            s if s.is_server_error() => DomainError::Transient(reason),
            _ => DomainError::ExecutionFailed(reason),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, tree: &str, what: &str) -> DomainResult<T> {
        let request = self.request(Method::GET, url).query(&[("tree", tree)]);
        self.send(request, what)
            .await?
            .json::<T>()
            .await
            .map_err(|e| DomainError::SerializationError(format!("Jenkins {what}: {e}")))
    }

    async fn post_xml(&self, url: &str, xml: String, what: &str) -> DomainResult<()> {
        let request = self
            .request(Method::POST, url)
            .header("Content-Type", "application/xml")
            .body(xml);
        self.send(request, what).await?;
        Ok(())
    }

    fn clone_url(&self, repository: &Repository) -> String {
        format!("{}/{repository}.git", self.git_url)
    }
}

#[async_trait]
impl BuildServer for JenkinsClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_job(&self, name: &str) -> DomainResult<Job> {
        let url = self.job_url(name);
        let remote: JenkinsJob = self
            .get_json(&format!("{url}/api/json"), JOB_TREE, "get job")
            .await?;

        let resp = self
            .send(self.request(Method::GET, &format!("{url}/config.xml")), "get job config")
            .await?;
        let xml = resp
            .text()
            .await
            .map_err(|e| DomainError::Transient(format!("Jenkins get job config: {e}")))?;
        let config = read_job_xml(&xml);

        let parameters: Vec<JobParameter> = remote
            .property
            .into_iter()
            .flat_map(|property| property.parameter_definitions)
            .map(|parameter| JobParameter {
                default: parameter
                    .default
                    .and_then(|default| json_scalar(&default.value)),
                name: parameter.name,
                kind: parameter.kind,
            })
            .collect();
        let defaults: BTreeMap<String, String> = parameters
            .iter()
            .filter_map(|p| p.default.clone().map(|d| (p.name.clone(), d)))
            .collect();

        let kind = if remote.class == MATRIX_CLASS {
            JobKind::Matrix {
                node_axis: config.node_axis.as_ref().map(|(axis, _)| axis.clone()),
                active_configurations: remote.active_configurations.into_iter().map(|c| c.name).collect(),
            }
        } else {
            JobKind::Freestyle
        };

        debug!(job = %remote.name, parameters = parameters.len(), "Fetched job");
        Ok(Job {
            spec: config.to_spec(&remote.name, defaults),
            name: remote.name,
            url: remote.url,
            description: remote.description.unwrap_or_default(),
            parameters,
            kind,
            scm_branch: config.scm_branch,
        })
    }

    async fn create_job(&self, repository: &Repository, spec: &JobSpec, description: &str) -> DomainResult<Job> {
        let xml = render_job_xml(spec, description, &self.clone_url(repository));
        let url = format!("{}/createItem?name={}", self.base_url, spec.name);
        self.post_xml(&url, xml, "create job").await?;
        info!(job = %spec.name, "Created job");
        self.get_job(&spec.name).await
    }

    async fn update_job(&self, repository: &Repository, spec: &JobSpec, description: &str) -> DomainResult<Job> {
        let xml = render_job_xml(spec, description, &self.clone_url(repository));
        let url = format!("{}/config.xml", self.job_url(&spec.name));
        self.post_xml(&url, xml, "update job").await?;
        info!(job = %spec.name, "Updated job");
        self.get_job(&spec.name).await
    }

    async fn trigger_build(&self, job: &Job, parameters: &BTreeMap<String, String>) -> DomainResult<()> {
        let url = format!("{}/buildWithParameters", self.job_url(&job.name));
        let request = self.request(Method::POST, &url).form(parameters);
        self.send(request, "trigger build").await?;
        Ok(())
    }

    async fn get_build(&self, url: &str) -> DomainResult<Build> {
        let api = format!("{}/api/json", url.trim_end_matches('/'));
        let build: JenkinsBuild = self.get_json(&api, BUILD_TREE, "get build").await?;
        Ok(Build {
            number: build.number,
            url: build.url,
            running: build.building,
            result: build.result,
        })
    }

    async fn stop_build(&self, build: &Build) -> DomainResult<()> {
        let url = format!("{}/stop", build.url.trim_end_matches('/'));
        self.send(self.request(Method::POST, &url), "stop build").await?;
        Ok(())
    }

    async fn is_queue_empty(&self) -> DomainResult<bool> {
        let url = format!("{}/queue/api/json", self.base_url);
        let queue: JenkinsQueue = self.get_json(&url, "items[id]", "get queue").await?;
        Ok(queue.items.is_empty())
    }
}
