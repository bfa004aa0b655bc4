//! Blocking JSON client for an inventory gateway
//!
//! Endpoints, relative to the configured base URL:
//!
//! | call                      | method & path                                                   |
//! |---------------------------|-----------------------------------------------------------------|
//! | execute_command           | `POST reservations/{id}/resources/{resource}/commands/{command}` |
//! | execute_connected_command | `POST reservations/{id}/resources/{resource}/connected/{command}` |
//! | create_resource           | `POST resources`                                                |
//! | delete_resource           | `DELETE resources/{resource}`                                   |
//! | set_attributes            | `PUT resources/{resource}/attributes`                           |
//! | autoload                  | `POST resources/{resource}/autoload`                            |
//! | resource_details          | `GET resources/{resource}`                                      |
//! | find_resources            | `GET resources?model=..`                                        |
//! | folder_content            | `GET folders?path=..`                                           |
//! | create_folder             | `POST folders`                                                  |
//! | add/remove reservation    | `POST reservations/{id}/resources[/remove]`                     |
//! | refresh_vm_details        | `POST reservations/{id}/refresh-vm-details`                     |
//! | create_reservation        | `POST reservations`                                             |
//! | end_reservation           | `POST reservations/{id}/end`                                    |
//! | current_reservations      | `GET reservations?owner=..`                                     |
//! | users                     | `GET users`                                                     |
//!
//! Failures come back as a non-2xx status with a `{"code": .., "message": ..}`
//! body and are mapped to [`InventoryError::Api`].

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{
    FolderEntry, InventoryApi, InventoryError, InventoryResult, ReservationSummary,
    ResourceDetails, ResourceSummary,
};

#[derive(Debug, Deserialize)]
struct ApiFault {
    code: Value,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CommandOutput {
    #[serde(default)]
    output: String,
}

#[derive(Debug, Deserialize)]
struct CreatedResource {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreatedReservation {
    id: String,
}

#[derive(Debug, Deserialize)]
struct User {
    name: String,
}

/// Inventory backend reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpInventory {
    client: Client,
    base: Url,
}

impl HttpInventory {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> InventoryResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| InventoryError::Config(format!("invalid URL '{base_url}': {e}")))?;
        if base.cannot_be_a_base() {
            return Err(InventoryError::Config(format!(
                "'{base_url}' cannot be used as a base URL"
            )));
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| InventoryError::Config(format!("invalid API token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, base })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.client.request(method, self.url(segments))
    }

    fn send(&self, request: RequestBuilder) -> InventoryResult<Response> {
        let response = request.send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        tracing::trace!(%status, body = %body, "inventory call rejected");
        Err(match serde_json::from_str::<ApiFault>(&body) {
            Ok(fault) => {
                let code = match fault.code {
                    Value::String(code) => code,
                    other => other.to_string(),
                };
                InventoryError::api(code, fault.message)
            }
            Err(_) => InventoryError::api(status.as_u16().to_string(), body),
        })
    }

    fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> InventoryResult<T> {
        let body = self.send(request)?.text()?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl InventoryApi for HttpInventory {
    fn execute_command(
        &self,
        reservation_id: &str,
        resource: &str,
        command: &str,
        params: &BTreeMap<String, String>,
    ) -> InventoryResult<String> {
        let request = self
            .request(
                Method::POST,
                &["reservations", reservation_id, "resources", resource, "commands", command],
            )
            .json(&json!({ "params": params }));
        Ok(self.send_json::<CommandOutput>(request)?.output)
    }

    fn execute_connected_command(
        &self,
        reservation_id: &str,
        resource: &str,
        command: &str,
        tag: &str,
    ) -> InventoryResult<String> {
        let request = self
            .request(
                Method::POST,
                &["reservations", reservation_id, "resources", resource, "connected", command],
            )
            .json(&json!({ "tag": tag }));
        Ok(self.send_json::<CommandOutput>(request)?.output)
    }

    fn create_resource(
        &self,
        model: &str,
        name: &str,
        address: &str,
        folder: &str,
    ) -> InventoryResult<String> {
        let request = self.request(Method::POST, &["resources"]).json(&json!({
            "model": model,
            "name": name,
            "address": address,
            "folder": folder,
        }));
        Ok(self.send_json::<CreatedResource>(request)?.name)
    }

    fn delete_resource(&self, resource: &str) -> InventoryResult<()> {
        self.send(self.request(Method::DELETE, &["resources", resource]))?;
        Ok(())
    }

    fn set_attributes(
        &self,
        resource: &str,
        attributes: &BTreeMap<String, String>,
    ) -> InventoryResult<()> {
        let request = self
            .request(Method::PUT, &["resources", resource, "attributes"])
            .json(&json!({ "attributes": attributes }));
        self.send(request)?;
        Ok(())
    }

    fn autoload(&self, resource: &str) -> InventoryResult<()> {
        self.send(self.request(Method::POST, &["resources", resource, "autoload"]))?;
        Ok(())
    }

    fn resource_details(&self, resource: &str) -> InventoryResult<ResourceDetails> {
        self.send_json(self.request(Method::GET, &["resources", resource]))
    }

    fn find_resources(&self, model: &str) -> InventoryResult<Vec<ResourceSummary>> {
        let request = self
            .request(Method::GET, &["resources"])
            .query(&[("model", model)]);
        self.send_json(request)
    }

    fn folder_content(&self, folder: &str) -> InventoryResult<Vec<FolderEntry>> {
        let request = self
            .request(Method::GET, &["folders"])
            .query(&[("path", folder)]);
        self.send_json(request)
    }

    fn create_folder(&self, path: &str) -> InventoryResult<()> {
        let request = self
            .request(Method::POST, &["folders"])
            .json(&json!({ "path": path }));
        self.send(request)?;
        Ok(())
    }

    fn add_to_reservation(
        &self,
        reservation_id: &str,
        resources: &[String],
    ) -> InventoryResult<()> {
        let request = self
            .request(Method::POST, &["reservations", reservation_id, "resources"])
            .json(&json!({ "resources": resources }));
        self.send(request)?;
        Ok(())
    }

    fn remove_from_reservation(
        &self,
        reservation_id: &str,
        resources: &[String],
    ) -> InventoryResult<()> {
        let request = self
            .request(
                Method::POST,
                &["reservations", reservation_id, "resources", "remove"],
            )
            .json(&json!({ "resources": resources }));
        self.send(request)?;
        Ok(())
    }

    fn refresh_vm_details(
        &self,
        reservation_id: &str,
        resources: Option<&[String]>,
    ) -> InventoryResult<()> {
        let request = self
            .request(
                Method::POST,
                &["reservations", reservation_id, "refresh-vm-details"],
            )
            .json(&json!({ "resources": resources }));
        self.send(request)?;
        Ok(())
    }

    fn create_reservation(
        &self,
        name: &str,
        owner: &str,
        duration_minutes: u32,
    ) -> InventoryResult<String> {
        let request = self.request(Method::POST, &["reservations"]).json(&json!({
            "name": name,
            "owner": owner,
            "duration_minutes": duration_minutes,
        }));
        Ok(self.send_json::<CreatedReservation>(request)?.id)
    }

    fn end_reservation(&self, reservation_id: &str) -> InventoryResult<()> {
        self.send(self.request(Method::POST, &["reservations", reservation_id, "end"]))?;
        Ok(())
    }

    fn current_reservations(&self, owner: &str) -> InventoryResult<Vec<ReservationSummary>> {
        let request = self
            .request(Method::GET, &["reservations"])
            .query(&[("owner", owner)]);
        self.send_json(request)
    }

    fn users(&self) -> InventoryResult<Vec<String>> {
        let users: Vec<User> = self.send_json(self.request(Method::GET, &["users"]))?;
        Ok(users.into_iter().map(|u| u.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_segments_are_encoded() {
        let inventory =
            HttpInventory::new("http://inventory:9000/api/", None, Duration::from_secs(5)).unwrap();
        let url = inventory.url(&["resources", "DC/Web Server", "autoload"]);
        assert_eq!(
            url.as_str(),
            "http://inventory:9000/api/resources/DC%2FWeb%20Server/autoload"
        );
    }

    #[test]
    fn test_rejects_non_base_url() {
        let err = HttpInventory::new("mailto:ops@example.com", None, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, InventoryError::Config(_)));
    }

    #[test]
    fn test_rejects_unparseable_url() {
        assert!(HttpInventory::new("not a url", Some("token"), Duration::from_secs(5)).is_err());
    }
}
