//! URL templates for the authorization and camera APIs.

/// Default host for the camera (Nexus) API.
pub const NEXUS_HOST: &str = "https://nexusapi-us1.dropcam.com";

/// Primary token exchange endpoint.
pub const OAUTH_URL: &str = "https://oauth2.googleapis.com/token";

/// Derived token issuance endpoint.
pub const JWT_TOKEN_URL: &str = "https://nestauthproxyservice-pa.googleapis.com/v1/issue_jwt";

/// Path of the events (cue point) listing for a camera.
pub fn events_path(nest_id: &str) -> String {
    format!("/cuepoint/{}/2", nest_id)
}

/// Path of the current camera image.
pub fn latest_image_path(nest_id: &str) -> String {
    format!("/get_image?width=640&uuid={}", nest_id)
}

/// Fully-qualified camera API URLs for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    host: String,
    nest_id: String,
}

impl Endpoints {
    pub fn new(host: impl Into<String>, nest_id: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            host: host.trim_end_matches('/').to_string(),
            nest_id: nest_id.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Events URL, optionally bounded by unix-second timestamps.
    pub fn events_url(&self, start: Option<i64>, end: Option<i64>) -> String {
        let mut url = format!("{}{}", self.host, events_path(&self.nest_id));
        let query: Vec<String> = [("start_time", start), ("end_time", end)]
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| format!("{}={}", key, v)))
            .collect();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }

    pub fn latest_image_url(&self) -> String {
        format!("{}{}", self.host, latest_image_path(&self.nest_id))
    }

    /// URL of a single event snapshot identified by `snapshot_id`.
    pub fn snapshot_url(&self, snapshot_id: &str) -> String {
        format!(
            "{}/event_snapshot/{}/{}?crop_type=timeline&width=700",
            self.host,
            self.nest_id,
            urlencoding::encode(snapshot_id)
        )
    }
}
