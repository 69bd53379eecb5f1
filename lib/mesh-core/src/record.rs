//! Service records and capability scopes

use crate::{CoreError, Result};
use hyper::Uri;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Capability granted to a registered service
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// May initiate proxied calls through the mesh
    Request,
    /// May be the target of proxied calls
    Receive,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Request => "request",
            Scope::Receive => "receive",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "request" => Ok(Scope::Request),
            "receive" => Ok(Scope::Receive),
            other => Err(CoreError::Validation(format!("unknown scope: {}", other))),
        }
    }
}

/// A registered service identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,
    pub url: String,
    pub scopes: BTreeSet<Scope>,
}

impl ServiceRecord {
    /// Build a validated record from raw registration fields.
    ///
    /// Fails with `CoreError::Validation` on an empty id, a malformed base url,
    /// or a scope token outside `request`/`receive`.
    pub fn new<I, S>(id: impl Into<String>, url: impl Into<String>, scopes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = id.into();
        let url = url.into();

        validate_id(&id)?;
        validate_url(&url)?;

        let scopes = scopes
            .into_iter()
            .map(|s| s.as_ref().parse::<Scope>())
            .collect::<Result<BTreeSet<_>>>()?;

        Ok(Self { id, url, scopes })
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(CoreError::Validation("id must not be empty".to_string()));
    }
    // ids are used as a single path segment in /get/<id> and /request/<id>/...
    if id.contains('/') {
        return Err(CoreError::Validation(format!("id must not contain '/': {}", id)));
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(CoreError::Validation("url must not be empty".to_string()));
    }

    let uri: Uri = url
        .parse()
        .map_err(|e| CoreError::Validation(format!("malformed url {}: {}", url, e)))?;

    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        Some(other) => {
            return Err(CoreError::Validation(format!(
                "unsupported url scheme {}: {}",
                other, url
            )))
        }
        None => {
            return Err(CoreError::Validation(format!("url must be absolute: {}", url)));
        }
    }

    let authority = match uri.authority() {
        Some(authority) if !authority.host().is_empty() => authority,
        _ => return Err(CoreError::Validation(format!("url has no host: {}", url))),
    };

    // An explicit port must fit in a u16; `[...]` guards IPv6 literals without one
    let has_port = authority
        .as_str()
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.contains(']'));
    if has_port && authority.port_u16().is_none() {
        return Err(CoreError::Validation(format!("url has an invalid port: {}", url)));
    }

    if uri.query().is_some() || url.contains('#') {
        return Err(CoreError::Validation(format!(
            "url must not carry a query or fragment: {}",
            url
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_with_both_scopes() {
        let record =
            ServiceRecord::new("svc-a", "http://svc-a:8080", ["request", "receive"]).unwrap();
        assert_eq!(record.id, "svc-a");
        assert_eq!(record.url, "http://svc-a:8080");
        assert!(record.has_scope(Scope::Request));
        assert!(record.has_scope(Scope::Receive));
    }

    #[test]
    fn test_record_without_scopes() {
        let record = ServiceRecord::new("svc-a", "http://svc-a", Vec::<String>::new()).unwrap();
        assert!(record.scopes.is_empty());
        assert!(!record.has_scope(Scope::Request));
    }

    #[test]
    fn test_duplicate_scopes_collapse() {
        let record = ServiceRecord::new("svc-a", "http://svc-a", ["receive", "receive"]).unwrap();
        assert_eq!(record.scopes.len(), 1);
    }

    #[test]
    fn test_unknown_scope_rejected() {
        let err = ServiceRecord::new("svc-a", "http://svc-a", ["request", "admin"]).unwrap_err();
        assert_eq!(err, CoreError::Validation("unknown scope: admin".to_string()));
    }

    #[test]
    fn test_scope_tokens_are_case_sensitive() {
        assert!("Request".parse::<Scope>().is_err());
        assert_eq!("request".parse::<Scope>().unwrap(), Scope::Request);
        assert_eq!(Scope::Receive.to_string(), "receive");
    }

    #[test]
    fn test_empty_id_rejected() {
        assert!(ServiceRecord::new("", "http://svc-a", ["request"]).is_err());
        assert!(ServiceRecord::new("   ", "http://svc-a", ["request"]).is_err());
        assert!(ServiceRecord::new("a/b", "http://svc-a", ["request"]).is_err());
    }

    #[test]
    fn test_malformed_urls_rejected() {
        for url in [
            "",
            "svc-a",
            "/relative/path",
            "ftp://svc-a",
            "http://",
            "http://svc a",
            "http://svc-a/?x=1",
            "http://svc-a/#frag",
            "http://svc-a:99999",
            "http://svc-a:",
        ] {
            assert!(
                ServiceRecord::new("svc-a", url, ["request"]).is_err(),
                "expected {:?} to be rejected",
                url
            );
        }
    }

    #[test]
    fn test_url_with_port_and_prefix_accepted() {
        for url in [
            "http://svc-a",
            "http://svc-a:8080",
            "http://10.0.0.1:9000/api/v1",
            "https://svc-a.internal/prefix/",
            "http://[::1]:8080/api",
            "http://[::1]",
            "http://svc-a:65535",
        ] {
            assert!(ServiceRecord::new("svc-a", url, ["receive"]).is_ok(), "{}", url);
        }
    }

    #[test]
    fn test_record_json_shape() {
        let record =
            ServiceRecord::new("svc-b", "http://svc-b", ["receive", "request"]).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "svc-b",
                "url": "http://svc-b",
                "scopes": ["request", "receive"],
            })
        );
    }
}
