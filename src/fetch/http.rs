//! HTTP fetcher for JSON APIs
//!
//! Fills `{name}` placeholders in the template, issues a GET request and
//! decodes the body as JSON.

use std::collections::HashMap;

use reqwest::blocking::Client;
use serde_json::Value;
use tracing::debug;
use url::{form_urlencoded, Url};

use super::Fetcher;
use crate::error::FetchError;
use crate::key::Params;

/// Fetches JSON over HTTP using the request template as a URL pattern
///
/// Placeholders are resolved from the request parameters first (values are
/// percent-encoded) and then from ambient variables registered with
/// [`HttpFetcher::with_var`] (inserted verbatim, e.g. `{BASE_URL}`).
/// Parameters not consumed by a placeholder are sent as query parameters.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    /// HTTP client for making requests
    http_client: Client,
    /// Ambient placeholder values
    vars: HashMap<String, String>,
}

impl HttpFetcher {
    /// Creates a new HttpFetcher with a default client
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Creates a new HttpFetcher with a preconfigured client (timeouts, headers)
    pub fn with_client(http_client: Client) -> Self {
        Self {
            http_client,
            vars: HashMap::new(),
        }
    }

    /// Registers an ambient placeholder value
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, template: &str, params: &Params) -> Result<Value, FetchError> {
        let url = render_template(template, params, &self.vars)?;
        debug!("GET {}", url);

        let response = self.http_client.get(url).send()?.error_for_status()?;
        let value = response.json::<Value>()?;
        Ok(value)
    }
}

/// Builds the request URL for a template
pub fn render_template(
    template: &str,
    params: &Params,
    vars: &HashMap<String, String>,
) -> Result<Url, FetchError> {
    let mut rendered = String::with_capacity(template.len());
    let mut consumed: Vec<&str> = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let name = match after.find('}') {
            Some(close) if is_placeholder_name(&after[..close]) => &after[..close],
            _ => {
                rendered.push('{');
                rest = after;
                continue;
            }
        };

        if let Some(value) = params.get(name) {
            rendered.push_str(&encode_component(&value_text(value)));
            consumed.push(name);
        } else if let Some(value) = vars.get(name) {
            rendered.push_str(value);
        } else {
            return Err(FetchError::new(format!(
                "no value for placeholder {{{}}} in {}",
                name, template
            )));
        }
        rest = &after[name.len() + 1..];
    }
    rendered.push_str(rest);

    let mut url = Url::parse(&rendered)
        .map_err(|e| FetchError::with_source(format!("invalid URL: {}", rendered), e))?;

    let query: Vec<(&String, String)> = params
        .iter()
        .filter(|(key, _)| !consumed.contains(&key.as_str()))
        .map(|(key, value)| (key, value_text(value)))
        .collect();
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &query {
            pairs.append_pair(key, value);
        }
    }

    Ok(url)
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Text form of a parameter value: strings unquoted, everything else as JSON
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Percent-encodes a value for use anywhere in the URL
///
/// Spaces become `%20` rather than `+` so the result is valid in paths.
fn encode_component(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => panic!("test params must be an object"),
        }
    }

    #[test]
    fn test_render_fills_params_and_vars() {
        let vars = HashMap::from([("BASE_URL".to_string(), "https://api.example.com/v1".to_string())]);
        let url = render_template(
            "{BASE_URL}/users/{id}/repos",
            &params(json!({"id": "octo cat", "page": 2})),
            &vars,
        )
        .unwrap();

        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/users/octo%20cat/repos?page=2"
        );
    }

    #[test]
    fn test_params_win_over_vars() {
        let vars = HashMap::from([("host".to_string(), "wrong".to_string())]);
        let url = render_template(
            "https://{host}/x",
            &params(json!({"host": "right.example.com"})),
            &vars,
        )
        .unwrap();

        assert_eq!(url.as_str(), "https://right.example.com/x");
    }

    #[test]
    fn test_non_placeholder_braces_are_literal() {
        let url = render_template(
            "https://example.com/q?filter={ a }",
            &Params::new(),
            &HashMap::new(),
        )
        .unwrap();

        assert!(url.as_str().starts_with("https://example.com/q?filter="));
    }

    #[test]
    fn test_missing_placeholder_is_error() {
        let err = render_template("https://example.com/{id}", &Params::new(), &HashMap::new())
            .unwrap_err();

        assert!(err.to_string().contains("{id}"));
    }

    #[test]
    fn test_relative_template_is_error() {
        let err = render_template("/users", &Params::new(), &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("invalid URL"));
    }

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("simple-Name_1."), "simple-Name_1.");
        assert_eq!(encode_component("a/b c"), "a%2Fb%20c");
        assert_eq!(encode_component("1+1=2"), "1%2B1%3D2");
        assert_eq!(encode_component("é"), "%C3%A9");
    }

    #[test]
    fn test_fetch_decodes_json_body() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();

            let body = r#"{"items":[1,2,3]}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            request
        });

        let fetcher = HttpFetcher::new().with_var("BASE_URL", format!("http://127.0.0.1:{}", port));
        let value = fetcher
            .fetch("{BASE_URL}/items", &params(json!({"limit": 3})))
            .unwrap();

        assert_eq!(value, json!({"items": [1, 2, 3]}));
        let request = server.join().unwrap();
        assert!(request.starts_with("GET /items?limit=3 "));
    }

    #[test]
    fn test_fetch_from_closed_port_is_fetch_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let fetcher = HttpFetcher::new();
        let result = fetcher.fetch(&format!("http://127.0.0.1:{}/x", port), &Params::new());

        assert!(result.is_err());
    }
}
