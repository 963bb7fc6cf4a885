//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per scheduler endpoint. When routes or
//! request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

pub struct TestClient {
    pub client: reqwest::Client,
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    pub async fn health(&self) -> Response {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .expect("Health request failed")
    }

    pub async fn metrics(&self) -> Response {
        self.client
            .get(format!("{}/metrics", self.base_url))
            .send()
            .await
            .expect("Metrics request failed")
    }

    pub async fn create_profile(&self, owner_id: &str, name: &str, roles: &[&str]) -> Response {
        self.client
            .post(format!("{}/v1/profiles", self.base_url))
            .json(&json!({
                "owner_id": owner_id,
                "name": name,
                "roles": roles,
                "locations": ["Berlin"],
            }))
            .send()
            .await
            .expect("Create profile request failed")
    }

    /// Creates a profile and returns its id
    pub async fn create_profile_id(&self, roles: &[&str]) -> String {
        let response = self.create_profile(OWNER_ID, "Test profile", roles).await;
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: Value = response.json().await.expect("Invalid profile body");
        body["id"].as_str().expect("Profile without id").to_string()
    }

    pub async fn get_profile(&self, profile_id: &str) -> Response {
        self.client
            .get(format!("{}/v1/profiles/{}", self.base_url, profile_id))
            .send()
            .await
            .expect("Get profile request failed")
    }

    pub async fn begin_scan(&self, profile_id: &str) -> Response {
        self.client
            .post(format!("{}/v1/profiles/{}/scan", self.base_url, profile_id))
            .send()
            .await
            .expect("Begin scan request failed")
    }

    /// Begins a scan and returns the batch id
    pub async fn begin_scan_batch_id(&self, profile_id: &str) -> String {
        let response = self.begin_scan(profile_id).await;
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
        let body: Value = response.json().await.expect("Invalid scan body");
        body["batch_id"].as_str().expect("Scan without batch id").to_string()
    }

    pub async fn start_expansion(&self, profile_id: &str, batch_id: &str, body: &Value) -> Response {
        self.client
            .post(format!(
                "{}/v1/profiles/{}/batches/{}/expansion",
                self.base_url, profile_id, batch_id
            ))
            .json(body)
            .send()
            .await
            .expect("Start expansion request failed")
    }

    pub async fn batch_stats(&self, profile_id: &str, batch_id: &str) -> Response {
        self.client
            .get(format!(
                "{}/v1/profiles/{}/batches/{}/stats",
                self.base_url, profile_id, batch_id
            ))
            .send()
            .await
            .expect("Batch stats request failed")
    }

    pub async fn register_credential(&self, owner_id: &str, key: &str, daily_limit: i64) -> Response {
        self.client
            .post(format!("{}/v1/owners/{}/credentials", self.base_url, owner_id))
            .json(&json!({
                "encrypted_key": key,
                "daily_limit": daily_limit,
            }))
            .send()
            .await
            .expect("Register credential request failed")
    }

    pub async fn budget(&self) -> Response {
        self.client
            .get(format!("{}/v1/budget", self.base_url))
            .send()
            .await
            .expect("Budget request failed")
    }

    pub async fn tick(&self) -> Response {
        self.client
            .post(format!("{}/v1/scan/tick", self.base_url))
            .send()
            .await
            .expect("Tick request failed")
    }
}
