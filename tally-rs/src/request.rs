//! Provides a wrapper for incoming HTTP requests.
//!
//! A [Request] is created once the body of a **hyper** request has been fully received. It keeps
//! the method, the path and the body around. Once the [Dispatcher](crate::routes::Dispatcher)
//! has matched a route, the values of the placeholders in the route pattern (e.g. the **{id}** in
//! **/candidates/{id}**) are available as parameters, already percent-decoded.
//!
//! # Examples
//!
//! Building a request for test environments:
//! ```
//! # use tally::request::Request;
//! # use hyper::Method;
//! let request = Request::example(Method::POST, "/vote", "name=Alice&vote_count=3");
//! assert_eq!(request.path(), "/vote");
//! assert_eq!(request.body().len(), 23);
//! ```
//!
//! Reading a form:
//! ```
//! # use tally::request::Request;
//! # use hyper::Method;
//! #[derive(serde::Deserialize)]
//! struct Form {
//!     name: String,
//! }
//!
//! let request = Request::example(Method::POST, "/vote", "name=%E5%A4%AA%E9%83%8E");
//! assert_eq!(request.form::<Form>().unwrap().name, "太郎");
//! ```
use std::fmt::{Display, Formatter};

use anyhow::{anyhow, Context};
use bytes::Bytes;
use hyper::{Body, Method};
use serde::de::DeserializeOwned;

/// Represents a fully received HTTP request.
pub struct Request {
    method: Method,
    path: String,
    body: Bytes,
    parameters: Vec<String>,
}

impl Request {
    /// Creates a request by reading the full body of the given **hyper** request.
    pub async fn read(request: hyper::Request<Body>) -> anyhow::Result<Request> {
        let (parts, body) = request.into_parts();
        let body = hyper::body::to_bytes(body)
            .await
            .context("Failed to read the request body")?;

        Ok(Request {
            method: parts.method,
            path: parts.uri.path().to_owned(),
            body,
            parameters: Vec::new(),
        })
    }

    /// Creates a request for the given method and uri. This is intended to be used in tests.
    pub fn example(method: Method, uri: &str, body: &str) -> Request {
        let path = uri.split('?').next().unwrap_or_default().to_owned();
        Request {
            method,
            path,
            body: Bytes::copy_from_slice(body.as_bytes()),
            parameters: Vec::new(),
        }
    }

    /// Attaches the values of the placeholders of the matched route.
    pub(crate) fn with_parameters(mut self, parameters: Vec<String>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the path (without query string), as sent by the client.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the raw body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the number of route parameters.
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Returns the route parameter at the given index.
    pub fn parameter(&self, index: usize) -> anyhow::Result<&str> {
        self.parameters
            .get(index)
            .map(|parameter| parameter.as_str())
            .ok_or_else(|| {
                anyhow!(
                    "Missing parameter {}. Only {} were provided.",
                    index,
                    self.parameters.len()
                )
            })
    }

    /// Returns the route parameter at the given index as integer.
    pub fn int_parameter(&self, index: usize) -> anyhow::Result<i64> {
        let parameter = self.parameter(index)?;
        parameter
            .parse()
            .with_context(|| format!("Parameter {} ('{}') isn't an integer.", index, parameter))
    }

    /// Parses the body as **application/x-www-form-urlencoded** form.
    ///
    /// If a field is submitted several times, the last value wins.
    pub fn form<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let mut fields: Vec<(String, String)> = Vec::new();
        for (name, value) in serde_urlencoded::from_bytes::<Vec<(String, String)>>(&self.body)
            .context("Failed to parse the submitted form")?
        {
            fields.retain(|(existing, _)| existing != &name);
            fields.push((name, value));
        }

        let fields = serde_urlencoded::to_string(&fields)?;
        serde_urlencoded::from_str(&fields).context("Failed to parse the submitted form")
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}
