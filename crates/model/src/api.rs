use crate::ApiId;
use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use time::UtcDateTime;

/// A named configuration root.
///
/// The name is unique across the store: looking an API up by name resolves to
/// exactly one record. After setup an API is never mutated, only extended
/// with more children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Api {
    pub id: ApiId,
    pub name: String,
    /// Attached to every request made for this API's files.
    pub credentials: Option<Credentials>,
    pub created_at: UtcDateTime,
}

/// Draft of an [`Api`]; the name is the natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewApi {
    pub name: String,
    pub credentials: Option<Credentials>,
}
impl NewApi {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            exn::bail!(ErrorKind::EmptyName);
        }
        Ok(Self { name, credentials: None })
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Credentials required to access an API's resources.
///
/// Any combination may be set. It is up to the transport to decide how each
/// one is presented (the HTTP transport sends them as request headers).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<Cookie>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic: Option<BasicAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenHeader>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// A token sent verbatim in a custom header, e.g. `X-Api-Key: abc123`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub header: String,
    pub token: String,
}

impl Credentials {
    /// Plain (name, value) headers derived from the cookie and token.
    ///
    /// Basic auth is not included; transports usually have dedicated support
    /// for it.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let Some(cookie) = &self.cookie {
            headers.push(("Cookie".to_string(), format!("{}={}", cookie.name, cookie.value)));
        }
        if let Some(token) = &self.token {
            headers.push((token.header.clone(), token.token.clone()));
        }
        headers
    }

    pub fn is_empty(&self) -> bool {
        self.cookie.is_none() && self.basic.is_none() && self.token.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_names_are_rejected() {
        assert!(NewApi::new("   ").is_err());
        assert_eq!(NewApi::new("my nice api").unwrap().name, "my nice api");
    }

    #[test]
    fn test_credential_headers() {
        let credentials = Credentials {
            cookie: Some(Cookie { name: "my-cookie".to_string(), value: "my-value".to_string() }),
            basic: Some(BasicAuth { username: "me".to_string(), password: None }),
            token: Some(TokenHeader { header: "Token".to_string(), token: "my-token".to_string() }),
        };
        assert_eq!(
            credentials.headers(),
            vec![
                ("Cookie".to_string(), "my-cookie=my-value".to_string()),
                ("Token".to_string(), "my-token".to_string()),
            ]
        );
        assert!(!credentials.is_empty());
        assert!(Credentials::default().is_empty());
    }

    #[test]
    fn test_credentials_json_shape() {
        let json = r#"{"auth_token_ignored": 1, "token": {"header": "X-Key", "token": "abc"}}"#;
        let credentials: Credentials = serde_json::from_str(json).unwrap();
        assert_eq!(credentials.headers(), vec![("X-Key".to_string(), "abc".to_string())]);
        assert_eq!(serde_json::to_string(&credentials).unwrap(), r#"{"token":{"header":"X-Key","token":"abc"}}"#);
    }
}
