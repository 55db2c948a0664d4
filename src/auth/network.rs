// Network (tenant) selection types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BsnError, Result};
use crate::request::RequestSpec;

pub(crate) const NETWORKS_PATH: &str = "Self/Networks";
pub(crate) const SESSION_NETWORK_PATH: &str = "Self/Session/Network";

/// A network visible to the authenticated principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub id: u64,
    pub name: String,

    /// Remaining server-provided fields
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Serialize)]
struct BindNetworkRequest<'a> {
    name: &'a str,
}

/// `GET Self/Networks`, usable before any network is bound
pub(crate) fn list_spec() -> RequestSpec {
    RequestSpec::get(NETWORKS_PATH).without_network()
}

/// `PUT Self/Session/Network` binding the session to `name`
pub(crate) fn bind_spec(name: &str) -> Result<RequestSpec> {
    RequestSpec::put(SESSION_NETWORK_PATH)
        .without_network()
        .json(&BindNetworkRequest { name })
}

/// Exact match first, then a case-insensitive one
pub fn find_by_name<'a>(networks: &'a [Network], name: &str) -> Option<&'a Network> {
    networks
        .iter()
        .find(|n| n.name == name)
        .or_else(|| networks.iter().find(|n| n.name.eq_ignore_ascii_case(name)))
}

pub fn find_by_id(networks: &[Network], id: u64) -> Option<&Network> {
    networks.iter().find(|n| n.id == id)
}

pub(crate) fn not_found(label: String, networks: &[Network]) -> BsnError {
    let available: Vec<&str> = networks.iter().map(|n| n.name.as_str()).collect();
    BsnError::Api {
        status: 404,
        code: "network_not_found".to_string(),
        message: format!("network {} not found", label),
        details: Some(serde_json::json!({ "available": available })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn networks() -> Vec<Network> {
        serde_json::from_str(
            r#"[
                {"id": 10, "name": "Lobby Screens", "creationDate": "2023-01-01T00:00:00Z"},
                {"id": 11, "name": "lobby screens"},
                {"id": 12, "name": "Warehouse"}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_deserialize_keeps_extra_fields() {
        let list = networks();
        assert_eq!(list[0].attributes["creationDate"], "2023-01-01T00:00:00Z");
        assert!(list[1].attributes.is_empty());
    }

    #[test]
    fn test_find_by_name_prefers_exact() {
        let list = networks();
        assert_eq!(find_by_name(&list, "lobby screens").unwrap().id, 11);
        assert_eq!(find_by_name(&list, "Lobby Screens").unwrap().id, 10);
        assert_eq!(find_by_name(&list, "WAREHOUSE").unwrap().id, 12);
        assert!(find_by_name(&list, "DoesNotExist").is_none());
    }

    #[test]
    fn test_find_by_id() {
        let list = networks();
        assert_eq!(find_by_id(&list, 12).unwrap().name, "Warehouse");
        assert!(find_by_id(&list, 99).is_none());
    }

    #[test]
    fn test_bind_spec_body() {
        let spec = bind_spec("Warehouse").unwrap();
        assert_eq!(*spec.method(), reqwest::Method::PUT);
        assert_eq!(spec.path(), SESSION_NETWORK_PATH);
        assert!(!spec.requires_network());
        assert_eq!(spec.body.as_deref(), Some(br#"{"name":"Warehouse"}"#.as_slice()));
    }

    #[test]
    fn test_not_found_error() {
        let err = not_found("\"Nope\"".to_string(), &networks());
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("network_not_found"));
    }
}
