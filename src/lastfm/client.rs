use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tracing::debug;

use super::error::FetchError;
use super::responses::{ApiError, RawTrack, RecentTracksResponse};
use super::{PageRequest, ScrobblePage, ScrobbleSource};

const LASTFM_API_BASE: &str = "https://ws.audioscrobbler.com/2.0/";

/// Per-call timeout. There is no timeout for a whole run.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The API's maximum page size.
pub const PAGE_SIZE: u32 = 200;

const USER_AGENT: &str = concat!("lytter-rs/", env!("CARGO_PKG_VERSION"));

/// API key and account name for the recent-tracks feed.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub user: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

/// HTTP client for `user.getRecentTracks`.
pub struct LastFmClient {
    http: reqwest::Client,
    api_base: String,
    credentials: Credentials,
    page_size: u32,
}

impl std::fmt::Debug for LastFmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LastFmClient")
            .field("api_base", &self.api_base)
            .field("user", &self.credentials.user)
            .finish_non_exhaustive()
    }
}

impl LastFmClient {
    pub fn new(credentials: Credentials) -> Result<Self, FetchError> {
        Self::with_base_url(credentials, LASTFM_API_BASE)
    }

    pub fn with_base_url(credentials: Credentials, api_base: &str) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(FetchError::from_reqwest)?;
        Ok(Self {
            http,
            api_base: api_base.to_string(),
            credentials,
            page_size: PAGE_SIZE,
        })
    }

    fn page_url(&self, request: &PageRequest) -> String {
        let mut url = format!(
            "{}?method=user.getrecenttracks&user={}&api_key={}&limit={}&page={}&format=json",
            self.api_base,
            urlencoding::encode(&self.credentials.user),
            urlencoding::encode(&self.credentials.api_key),
            self.page_size,
            request.page,
        );
        if let Some(from) = request.from {
            url.push_str(&format!("&from={from}"));
        }
        if let Some(to) = request.to {
            url.push_str(&format!("&to={to}"));
        }
        url
    }
}

#[async_trait]
impl ScrobbleSource for LastFmClient {
    async fn fetch_page(&self, request: PageRequest) -> Result<ScrobblePage, FetchError> {
        debug!(
            page = request.page,
            from = ?request.from,
            to = ?request.to,
            "Fetching recent tracks page"
        );

        let response = self
            .http
            .get(self.page_url(&request))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.map_err(FetchError::from_reqwest)?;

        let page = decode_page(status, retry_after, &body)?;
        debug!(
            page = page.page,
            total_pages = page.total_pages,
            records = page.records.len(),
            "Fetched recent tracks page"
        );
        Ok(page)
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Turn a raw HTTP answer into a page or a classified error.
///
/// Last.fm reports API errors as a JSON envelope, sometimes with a 200
/// status, so the body is checked before the status code.
pub(crate) fn decode_page(
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
) -> Result<ScrobblePage, FetchError> {
    if status == 429 {
        return Err(FetchError::RateLimited { retry_after });
    }

    if let Ok(api_error) = serde_json::from_str::<ApiError>(body) {
        return Err(classify_api_error(status, retry_after, api_error));
    }

    if !(200..300).contains(&status) {
        return Err(match status {
            401 | 403 => FetchError::Authentication(snippet(body)),
            _ => FetchError::Upstream {
                status,
                detail: snippet(body),
            },
        });
    }

    let parsed: RecentTracksResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Upstream {
            status,
            detail: format!("undecodable recent tracks response: {e}"),
        })?;

    let attr = parsed.recenttracks.attr;
    let records = parsed
        .recenttracks
        .track
        .into_vec()
        .into_iter()
        .filter_map(RawTrack::into_record)
        .collect();

    Ok(ScrobblePage {
        records,
        page: attr.page,
        total_pages: attr.total_pages,
        has_more: attr.page < attr.total_pages,
    })
}

/// Error codes from <https://www.last.fm/api/errorcodes>.
fn classify_api_error(status: u16, retry_after: Option<Duration>, e: ApiError) -> FetchError {
    match e.error {
        29 => FetchError::RateLimited { retry_after },
        // Operation failed, service offline, temporarily unavailable
        8 | 11 | 16 => FetchError::Transient(format!("Last.fm error {}: {}", e.error, e.message)),
        // Auth failed, invalid session, invalid key, token issues,
        // suspended key, login required
        4 | 9 | 10 | 14 | 17 | 26 => {
            FetchError::Authentication(format!("Last.fm error {}: {}", e.error, e.message))
        }
        code => FetchError::Upstream {
            status,
            detail: format!("Last.fm error {}: {}", code, e.message),
        },
    }
}

fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> LastFmClient {
        LastFmClient::with_base_url(
            Credentials {
                api_key: "k3y".into(),
                user: "some user".into(),
            },
            "http://localhost/2.0/",
        )
        .unwrap()
    }

    #[test]
    fn page_url_for_unbounded_history() {
        let url = client().page_url(&PageRequest::page(3));
        assert_eq!(
            url,
            "http://localhost/2.0/?method=user.getrecenttracks&user=some%20user&api_key=k3y&limit=200&page=3&format=json"
        );
    }

    #[test]
    fn page_url_with_range() {
        let url = client().page_url(&PageRequest::in_range(1, 100, 200));
        assert!(url.ends_with("&page=1&format=json&from=100&to=200"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let rendered = format!("{:?}", client().credentials);
        assert!(!rendered.contains("k3y"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn decode_success_sets_has_more() {
        let body = r##"{"recenttracks": {"track": [
            {"artist": {"#text": "A"}, "name": "x", "date": {"uts": "20"}},
            {"artist": {"#text": "B"}, "name": "y", "date": {"uts": "10"}}
        ], "@attr": {"page": "1", "totalPages": "2"}}}"##;
        let page = decode_page(200, None, body).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].timestamp, 20);
        assert!(page.has_more);

        let last = body.replace(r#""page": "1""#, r#""page": "2""#);
        assert!(!decode_page(200, None, &last).unwrap().has_more);
    }

    #[test]
    fn http_429_is_rate_limited_with_hint() {
        let err = decode_page(429, Some(Duration::from_secs(30)), "").unwrap_err();
        assert!(matches!(
            err,
            FetchError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(30)
        ));
    }

    #[test]
    fn api_error_29_is_rate_limited() {
        let err = decode_page(
            200,
            None,
            r#"{"error": 29, "message": "Rate Limit Exceeded"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { retry_after: None }));
    }

    #[test]
    fn invalid_api_key_is_authentication() {
        let err = decode_page(
            403,
            None,
            r#"{"error": 10, "message": "Invalid API key - You must be granted a valid key by last.fm"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Authentication(_)));
    }

    #[test]
    fn bare_401_is_authentication() {
        let err = decode_page(401, None, "Unauthorized").unwrap_err();
        assert!(matches!(err, FetchError::Authentication(_)));
    }

    #[test]
    fn service_offline_is_transient() {
        let err = decode_page(
            503,
            None,
            r#"{"error": 16, "message": "There was a temporary error processing your request"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)));
    }

    #[test]
    fn operation_failed_is_transient() {
        let err = decode_page(
            500,
            None,
            r#"{"error": 8, "message": "Operation failed - Most likely the backend service failed. Please try again."}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)));
    }

    #[test]
    fn login_required_is_authentication() {
        let err = decode_page(
            403,
            None,
            r#"{"error": 17, "message": "Login: User required to be logged in"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Authentication(_)));
    }

    #[test]
    fn other_status_is_upstream_with_detail() {
        let err = decode_page(502, None, "<html>Bad Gateway</html>").unwrap_err();
        match err {
            FetchError::Upstream { status, detail } => {
                assert_eq!(status, 502);
                assert!(detail.contains("Bad Gateway"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_user_is_upstream() {
        let err = decode_page(
            404,
            None,
            r#"{"error": 6, "message": "User not found"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Upstream { status: 404, .. }));
    }

    #[test]
    fn garbage_body_is_upstream() {
        let err = decode_page(200, None, "not json").unwrap_err();
        assert!(matches!(err, FetchError::Upstream { status: 200, .. }));
    }

    #[test]
    fn snippet_truncates_long_bodies() {
        let long = "x".repeat(500);
        let s = snippet(&long);
        assert_eq!(s.chars().count(), 201);
        assert!(s.ends_with('…'));
    }

    #[test]
    fn retry_after_header_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));

        let mut dated = HeaderMap::new();
        dated.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(&dated), None);
    }
}
