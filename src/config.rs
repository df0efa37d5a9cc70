use url::form_urlencoded;

/// Value used when the embedding context supplies no origin or guest id.
pub const ANY: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestConfig {
    /// Target origin for every message sent to the host.
    pub host_origin: String,
    pub guest_id: String,
    pub focus_tracking: bool,
    pub automatic_bindings: bool,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            host_origin: ANY.to_string(),
            guest_id: ANY.to_string(),
            focus_tracking: true,
            automatic_bindings: true,
        }
    }
}

impl GuestConfig {
    /// Reads `payload_host_origin` and `guestid` from a page query string.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut host_origin = None;
        let mut guest_id = None;

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "payload_host_origin" => &mut host_origin,
                "guestid" => &mut guest_id,
                _ => continue,
            };
            slot.get_or_insert_with(|| value.into_owned());
        }

        let defaults = Self::default();
        Self {
            host_origin: host_origin.unwrap_or(defaults.host_origin),
            guest_id: guest_id.unwrap_or(defaults.guest_id),
            ..defaults
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host_origin: std::env::var("PAYLOAD_HOST_ORIGIN").unwrap_or(defaults.host_origin),
            guest_id: std::env::var("PAYLOAD_GUEST_ID").unwrap_or(defaults.guest_id),
            focus_tracking: parse_flag(std::env::var("PAYLOAD_FOCUS_TRACKING").ok())
                .unwrap_or(defaults.focus_tracking),
            automatic_bindings: defaults.automatic_bindings,
        }
    }
}

fn parse_flag(raw: Option<String>) -> Option<bool> {
    match raw?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
