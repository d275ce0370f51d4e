//! Launch inputs: host-platform user, URL query parameters and device signals.

use log::{debug, warn};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use stylist_core::identity::HostPlatformUser;

pub const USER_ID_PARAM: &str = "user_id";
pub const TELEGRAM_ID_PARAM: &str = "telegram_id";
pub const USERNAME_PARAM: &str = "username";

/// Fragment key under which the chat platform passes its init data.
const HOST_INIT_DATA_FRAGMENT_KEY: &str = "tgWebAppData";

/// Device signals reported by the embedding shell. Missing values are
/// treated as unavailable by the fingerprint generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEnvironment {
    pub render_surface: Option<String>,
    pub screen: Option<String>,
    pub timezone: Option<String>,
    pub language: Option<String>,
    pub platform: Option<String>,
}

/// Everything the identity resolver may read about how the app was opened.
#[derive(Debug, Clone, Default)]
pub struct LaunchContext {
    pub host_user: Option<HostPlatformUser>,
    pub query: HashMap<String, String>,
    pub environment: DeviceEnvironment,
}

impl LaunchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host_user(mut self, user: HostPlatformUser) -> Self {
        self.host_user = Some(user);
        self
    }

    pub fn with_query_param(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_environment(mut self, environment: DeviceEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Build a context from the launch URL and the host's init data string.
    ///
    /// When `init_data` is absent, the URL fragment is checked for the
    /// platform's `tgWebAppData` entry.
    pub fn from_launch_url(url: &str, init_data: Option<&str>) -> Self {
        let mut context = Self::default();

        let parsed = match Url::parse(url) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!("[Launch] Ignoring unparseable launch URL: {}", err);
                None
            }
        };

        if let Some(parsed) = &parsed {
            for (key, value) in parsed.query_pairs() {
                context.query.insert(key.into_owned(), value.into_owned());
            }
        }

        let fragment_init_data = parsed
            .as_ref()
            .and_then(|p| p.fragment())
            .and_then(|fragment| decode_pairs(fragment).remove(HOST_INIT_DATA_FRAGMENT_KEY));

        let init_data = init_data
            .map(str::to_string)
            .or(fragment_init_data)
            .filter(|data| !data.trim().is_empty());

        if let Some(data) = init_data {
            context.host_user = parse_host_init_data(&data);
        }

        context
    }

    /// Trimmed, non-empty query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Parse the `user=<json>` entry of host init data.
pub fn parse_host_init_data(init_data: &str) -> Option<HostPlatformUser> {
    let pairs = decode_pairs(init_data);
    let raw_user = pairs.get("user")?;
    match serde_json::from_str::<HostPlatformUser>(raw_user) {
        Ok(user) if user.id > 0 => {
            debug!("[Launch] Host user present (id={})", user.id);
            Some(user)
        }
        Ok(user) => {
            warn!("[Launch] Ignoring host user with invalid id {}", user.id);
            None
        }
        Err(err) => {
            warn!("[Launch] Failed to parse host user: {}", err);
            None
        }
    }
}

fn decode_pairs(input: &str) -> HashMap<String, String> {
    input
        .trim_start_matches(['?', '#'])
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter_map(|(key, value)| {
            let value = urlencoding::decode(&value.replace('+', " "))
                .ok()?
                .into_owned();
            Some((key.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const INIT_DATA: &str = "query_id=AAH&user=%7B%22id%22%3A4242%2C%22first_name%22%3A%22Anna%22%2C%22username%22%3A%22anna%22%2C%22language_code%22%3A%22ru%22%7D&auth_date=1700000000&hash=abc";

    #[test]
    fn parses_query_parameters() {
        let context =
            LaunchContext::from_launch_url("https://app.example.com/?user_id=12345&username=%40anna", None);

        assert_eq!(context.query_param(USER_ID_PARAM), Some("12345"));
        assert_eq!(context.query_param(USERNAME_PARAM), Some("@anna"));
        assert!(context.host_user.is_none());
    }

    #[test]
    fn parses_host_user_from_init_data() {
        let context = LaunchContext::from_launch_url("https://app.example.com/", Some(INIT_DATA));

        let user = context.host_user.expect("host user");
        assert_eq!(user.id, 4242);
        assert_eq!(user.first_name.as_deref(), Some("Anna"));
        assert_eq!(user.username.as_deref(), Some("anna"));
        assert_eq!(user.language_code.as_deref(), Some("ru"));
    }

    #[test]
    fn reads_init_data_from_url_fragment() {
        let url = format!(
            "https://app.example.com/#tgWebAppData={}&tgWebAppVersion=7.0",
            urlencoding::encode(INIT_DATA)
        );
        let context = LaunchContext::from_launch_url(&url, None);

        assert_eq!(context.host_user.map(|u| u.id), Some(4242));
    }

    #[test]
    fn garbage_init_data_is_ignored() {
        let context = LaunchContext::from_launch_url("https://app.example.com/", Some("user=%7Bnope"));
        assert!(context.host_user.is_none());

        let context = LaunchContext::from_launch_url("not a url", Some("user=%7B%22id%22%3A0%7D"));
        assert!(context.host_user.is_none());
        assert!(context.query.is_empty());
    }

    #[test]
    fn blank_query_values_are_absent() {
        let context = LaunchContext::new().with_query_param(USER_ID_PARAM, "  ");
        assert_eq!(context.query_param(USER_ID_PARAM), None);
    }
}
