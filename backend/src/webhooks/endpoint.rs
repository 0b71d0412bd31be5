use serde::{Deserialize, Deserializer, Serialize};

pub const WILDCARD_EVENT: &str = "*";

/// A tenant-registered receiver, read from the `"webhooks"` section of the
/// tenant settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub url: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default, deserialize_with = "event_list")]
    pub events: Vec<String>,
    #[serde(default)]
    pub active: bool,
}

impl WebhookEndpoint {
    pub fn new(url: &str, secret: &str, events: &[&str]) -> Self {
        Self {
            url: url.to_string(),
            secret: secret.to_string(),
            events: events.iter().map(|e| e.to_string()).collect(),
            active: true,
        }
    }

    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.active
            && self
                .events
                .iter()
                .any(|e| e == event_type || e == WILDCARD_EVENT)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookSettings {
    #[serde(default)]
    pub endpoints: Vec<WebhookEndpoint>,
}

/// `events` is either a list or the bare wildcard string.
fn event_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Events {
        List(Vec<String>),
        One(String),
    }

    Ok(match Option::<Events>::deserialize(deserializer)? {
        Some(Events::List(events)) => events,
        Some(Events::One(event)) => vec![event],
        None => Vec::new(),
    })
}

/// Extract the endpoint list from a tenant settings document. A missing
/// section yields no endpoints.
pub fn endpoints_from_settings(settings: &serde_json::Value) -> Result<Vec<WebhookEndpoint>, serde_json::Error> {
    match settings.get("webhooks") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(section) => {
            let parsed: WebhookSettings = serde_json::from_value(section.clone())?;
            Ok(parsed.endpoints)
        }
    }
}
