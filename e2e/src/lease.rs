use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Free-form metadata Boskos stores alongside a resource.
pub type UserData = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LeaseState {
    Free,
    Busy,
    Dirty,
    Cleaning,
    Other(String),
}

impl LeaseState {
    pub fn as_str(&self) -> &str {
        match self {
            LeaseState::Free => "free",
            LeaseState::Busy => "busy",
            LeaseState::Dirty => "dirty",
            LeaseState::Cleaning => "cleaning",
            LeaseState::Other(s) => s,
        }
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaseState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "free" => LeaseState::Free,
            "busy" => LeaseState::Busy,
            "dirty" => LeaseState::Dirty,
            "cleaning" => LeaseState::Cleaning,
            other => LeaseState::Other(other.to_string()),
        })
    }
}

impl Serialize for LeaseState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LeaseState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or_else(|never| match never {}))
    }
}

/// A resource handed out by the leasing service. The caller owns it until it
/// is released or the service reclaims it for lack of heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub state: LeaseState,
    #[serde(default)]
    pub owner: String,
    #[serde(rename = "lastupdate", default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(rename = "userdata", default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<UserData>,
}

impl Lease {
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>, state: LeaseState) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            state,
            owner: String::new(),
            last_update: None,
            user_data: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_busy(&self) -> bool {
        self.state == LeaseState::Busy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_boskos_resource() {
        let body = r#"{
            "type": "gce-project",
            "name": "proj-123",
            "state": "busy",
            "owner": "pull-pd-e2e",
            "lastupdate": "2018-10-02T17:11:25.123Z",
            "userdata": {"zone": "us-central1-c"}
        }"#;

        let lease: Lease = serde_json::from_str(body).unwrap();
        assert_eq!(lease.name(), "proj-123");
        assert_eq!(lease.resource_type, "gce-project");
        assert!(lease.is_busy());
        assert_eq!(lease.owner, "pull-pd-e2e");
        assert!(lease.last_update.is_some());
        assert_eq!(
            lease.user_data.unwrap().get("zone").map(String::as_str),
            Some("us-central1-c")
        );
    }

    #[test]
    fn test_decode_null_userdata_and_unknown_state() {
        let body = r#"{"type":"gce-project","name":"p","state":"toBeDeleted","userdata":null}"#;
        let lease: Lease = serde_json::from_str(body).unwrap();

        assert_eq!(lease.state, LeaseState::Other("toBeDeleted".to_string()));
        assert_eq!(lease.owner, "");
        assert!(lease.user_data.is_none());
    }

    #[test]
    fn test_state_wire_names() {
        for state in [LeaseState::Free, LeaseState::Busy, LeaseState::Dirty, LeaseState::Cleaning] {
            let parsed: LeaseState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert_eq!(LeaseState::Busy.to_string(), "busy");
    }
}
