//! Provides a builder for HTTP responses.
//!
//! Each [Call](crate::routes::Call) carries a pre-initialized [Response] (**200 OK** without body)
//! which is filled by the route handler. Once the call is completed, the response is handed back
//! to the server which turns it into a **hyper** response.
//!
//! # Example
//! ```
//! # use tally::response::Response;
//! # use hyper::StatusCode;
//! let mut response = Response::new();
//! response.html("<h1>Hello</h1>");
//! response.cache_public(60).unwrap();
//!
//! assert_eq!(response.status(), StatusCode::OK);
//! assert_eq!(response.header("cache-control"), Some("public, max-age=60"));
//! assert_eq!(response.body_str(), "<h1>Hello</h1>");
//! ```
use anyhow::Context;
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use hyper::{Body, StatusCode};

const HTML: &str = "text/html; charset=utf-8";
const TEXT: &str = "text/plain; charset=utf-8";

/// Collects the status, headers and body of a response.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
}

impl Default for Response {
    fn default() -> Self {
        Response::new()
    }
}

impl Response {
    /// Creates an empty **200 OK** response.
    pub fn new() -> Self {
        Response {
            status: StatusCode::OK,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Creates a plain text response with the given status.
    pub fn plain(status: StatusCode, message: impl AsRef<str>) -> Self {
        let mut response = Response::new();
        response.set_status(status);
        response.text(message.as_ref());

        response
    }

    /// Sets the status code.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Sets the given header, replacing any previous value.
    pub fn set_header(&mut self, name: HeaderName, value: &str) -> anyhow::Result<()> {
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("Invalid value for header {}: '{}'", name, value))?;
        self.headers.retain(|(existing, _)| existing != name);
        self.headers.push((name, value));

        Ok(())
    }

    /// Uses the given HTML as body.
    pub fn html(&mut self, html: impl Into<Bytes>) {
        self.headers.retain(|(name, _)| name != CONTENT_TYPE);
        self.headers
            .push((CONTENT_TYPE, HeaderValue::from_static(HTML)));
        self.body = html.into();
    }

    /// Uses the given text as body.
    pub fn text(&mut self, text: &str) {
        self.headers.retain(|(name, _)| name != CONTENT_TYPE);
        self.headers
            .push((CONTENT_TYPE, HeaderValue::from_static(TEXT)));
        self.body = Bytes::copy_from_slice(text.as_bytes());
    }

    /// Turns this response into a **302 Found** redirect.
    pub fn redirect(&mut self, location: &str) -> anyhow::Result<()> {
        self.set_status(StatusCode::FOUND);
        self.set_header(LOCATION, location)
    }

    /// Permits any cache to keep this response for the given number of seconds.
    ///
    /// Does nothing if **max_age** is 0.
    pub fn cache_public(&mut self, max_age: u64) -> anyhow::Result<()> {
        if max_age > 0 {
            self.set_header(CACHE_CONTROL, &format!("public, max-age={}", max_age))?;
        }

        Ok(())
    }

    /// Returns the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the value of the given header, if present and readable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.as_str().eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.to_str().ok())
    }

    /// Returns the body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body as string. Invalid UTF-8 is replaced.
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Converts this response into a **hyper** response.
    pub fn complete(self) -> hyper::Response<Body> {
        let mut response = hyper::Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        for (name, value) in self.headers {
            let _ = response.headers_mut().insert(name, value);
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use hyper::header::LOCATION;
    use hyper::StatusCode;

    use crate::response::Response;
    use crate::testing::test_async;

    #[test]
    fn redirects_carry_a_location() {
        let mut response = Response::new();
        response.redirect("/").unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.header("Location"), Some("/"));
        assert_eq!(response.body().is_empty(), true);
    }

    #[test]
    fn zero_max_age_disables_caching() {
        let mut response = Response::new();
        response.cache_public(0).unwrap();
        assert_eq!(response.header("cache-control"), None);
    }

    #[test]
    fn invalid_header_values_are_rejected() {
        let mut response = Response::new();
        assert_eq!(response.set_header(LOCATION, "/\n").is_err(), true);
    }

    #[test]
    fn responses_are_converted() {
        test_async(async {
            let mut response = Response::plain(StatusCode::NOT_FOUND, "Not found");
            response.text("Nothing here");

            let response = response.complete();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(
                response.headers()["content-type"],
                "text/plain; charset=utf-8"
            );
            let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
            assert_eq!(&body[..], b"Nothing here");
        });
    }
}
