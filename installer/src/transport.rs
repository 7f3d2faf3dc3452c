//! HTTP transport abstraction with an explicit redirect policy.
//!
//! [`Transport`] returns the raw status and body stream so the fetcher can
//! apply its own status, size and completeness checks. The production
//! [`UreqTransport`] disables `ureq`'s redirect handling and follows
//! `Location` headers itself, rejecting any hop from `https` to `http` and
//! capping the number of hops.

use std::fmt;
use std::io::Read;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("shimfetch/", env!("CARGO_PKG_VERSION"));

/// A response whose body has not been read yet.
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Declared `Content-Length`, if the server sent one.
    pub content_length: Option<u64>,
    /// Unread body stream.
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Errors arising before a response body is available.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection, TLS or timeout failure.
    #[error("request to {url} failed: {reason}")]
    Request {
        /// Requested URL.
        url: String,
        /// Description of the failure.
        reason: String,
    },

    /// A redirect broke the redirect policy.
    #[error("redirect from {from} rejected: {violation}")]
    Redirect {
        /// URL that answered with the redirect.
        from: String,
        /// Which rule was broken.
        violation: RedirectViolation,
    },
}

/// Redirect policy violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedirectViolation {
    /// The redirect target downgrades `https` to another scheme.
    #[error("refusing to follow https redirect to {to}")]
    Downgrade {
        /// Redirect target.
        to: String,
    },
    /// More hops than the configured maximum.
    #[error("stopped after {max} redirects")]
    TooMany {
        /// Configured maximum.
        max: u32,
    },
    /// The response had no usable `Location` header.
    #[error("redirect without a valid Location header")]
    MissingLocation,
    /// The `Location` header did not resolve to a URL.
    #[error("invalid Location {location:?}: {reason}")]
    InvalidLocation {
        /// Raw header value.
        location: String,
        /// Parse failure.
        reason: String,
    },
}

/// Blocking HTTP GET.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Issue a GET and return the final (post-redirect) response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] for transport failures and redirect policy
    /// violations. Non-success statuses are returned as responses.
    fn get(&self, url: &Url) -> Result<HttpResponse, TransportError>;
}

/// Validate one redirect hop.
///
/// `hops` counts this redirect, starting at one.
///
/// # Errors
///
/// Returns [`RedirectViolation::TooMany`] when `hops` exceeds `max`, and
/// [`RedirectViolation::Downgrade`] when `from` is `https` and `to` is not.
pub fn check_redirect(from: &Url, to: &Url, hops: u32, max: u32) -> Result<(), RedirectViolation> {
    if hops > max {
        return Err(RedirectViolation::TooMany { max });
    }
    if from.scheme() == "https" && to.scheme() != "https" {
        return Err(RedirectViolation::Downgrade {
            to: to.to_string(),
        });
    }
    Ok(())
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// [`Transport`] backed by a `ureq` agent.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    max_redirects: u32,
}

impl UreqTransport {
    /// Build a transport with a wall-clock timeout per request.
    #[must_use]
    pub fn new(timeout: Duration, max_redirects: u32) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .max_redirects(0)
            .max_redirects_will_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            max_redirects,
        }
    }
}

impl Transport for UreqTransport {
    fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
        let mut current = url.clone();
        let mut hops = 0;
        loop {
            let response = self
                .agent
                .get(current.as_str())
                .header("User-Agent", USER_AGENT)
                .call()
                .map_err(|err| TransportError::Request {
                    url: current.to_string(),
                    reason: err.to_string(),
                })?;
            let status = response.status().as_u16();
            if !is_redirect(status) {
                let content_length = response.body().content_length();
                return Ok(HttpResponse {
                    status,
                    content_length,
                    body: Box::new(response.into_body().into_reader()),
                });
            }

            let redirect_error = |violation| TransportError::Redirect {
                from: current.to_string(),
                violation,
            };
            let location = response
                .headers()
                .get("location")
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| redirect_error(RedirectViolation::MissingLocation))?;
            let next = current.join(location).map_err(|err| {
                redirect_error(RedirectViolation::InvalidLocation {
                    location: location.to_owned(),
                    reason: err.to_string(),
                })
            })?;
            hops += 1;
            check_redirect(&current, &next, hops, self.max_redirects).map_err(redirect_error)?;
            log::debug!("following redirect {current} -> {next}");
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn url(value: &str) -> Url {
        Url::parse(value).expect("valid URL")
    }

    #[rstest]
    #[case::same_scheme("https://a.example/x", "https://b.example/y", 1)]
    #[case::at_limit("https://a.example/x", "https://a.example/y", 10)]
    #[case::http_upgrade("http://a.example/x", "https://a.example/y", 1)]
    fn allows_permitted_redirects(#[case] from: &str, #[case] to: &str, #[case] hops: u32) {
        assert_eq!(check_redirect(&url(from), &url(to), hops, 10), Ok(()));
    }

    #[test]
    fn rejects_https_to_http_downgrade() {
        let result = check_redirect(
            &url("https://a.example/x"),
            &url("http://a.example/x"),
            1,
            10,
        );
        assert_eq!(
            result,
            Err(RedirectViolation::Downgrade {
                to: "http://a.example/x".to_owned()
            })
        );
    }

    #[test]
    fn rejects_hops_beyond_the_cap() {
        let result = check_redirect(
            &url("https://a.example/x"),
            &url("https://a.example/y"),
            11,
            10,
        );
        assert_eq!(result, Err(RedirectViolation::TooMany { max: 10 }));
    }

    #[rstest]
    #[case(301, true)]
    #[case(302, true)]
    #[case(307, true)]
    #[case(308, true)]
    #[case(200, false)]
    #[case(304, false)]
    #[case(404, false)]
    fn classifies_redirect_statuses(#[case] status: u16, #[case] expected: bool) {
        assert_eq!(is_redirect(status), expected);
    }

    #[test]
    fn user_agent_names_the_crate() {
        assert!(USER_AGENT.starts_with("shimfetch/"));
    }
}
