//! Provides the dispatcher which delegates an incoming request to the matching route handler.
//!
//! At its core, a [RouteDictionary] is a list of routes. Each route consists of an HTTP method
//! and a path pattern like **/candidates/{id}**. It doesn't point to a handler function, rather it
//! points to a [Queue] and keeps a numeric token along. If a request matches a route, the request
//! (with the values of all placeholders), a pre-initialized response and the token are wrapped in a
//! [Call]. This call is also equipped with the **Sender** of a oneshot channel through which the
//! final response will be sent. The call is then sent to the actor which is responsible for
//! handling the route. Once the actor completed handling the call, the response is sent back (most
//! probably with the help of [ResultExt]).
//!
//! Using a single queue for several routes (hence the token) lets an actor decide on its own how
//! to schedule the incoming calls, e.g. by forwarding them into a bounded pool of workers.
//!
//! Note that the dictionary itself is only a container to collect all known routes. The server
//! requests a [Dispatcher] from it, which then dispatches the incoming requests without any
//! locking.
//!
//! # Errors
//!
//! When handling a route, a function which returns a [RouteResult] should be used. This way, one
//! can simply call `my_handler(&mut call).await.complete(call)`. Use [server_error](server_error)
//! if a server-sided problem occurs (reported as **500**) and [client_error](client_error) if the
//! client sent invalid data (reported as **400**). Note that any **anyhow::Error** is turned into a
//! server error, as these are mostly caused by an unavailable store.
//!
//! # Example
//!
//! ```
//! # use hyper::{Method, StatusCode};
//! # use num_traits::FromPrimitive;
//! # use tally::routes::{queue, Call, RouteDictionary, RouteResult, ResultExt};
//! # use tally::request::Request;
//! fn ping(call: &mut Call) -> RouteResult {
//!     call.response.text("PONG");
//!     Ok(())
//! }
//!
//! fn echo(call: &mut Call) -> RouteResult {
//!     let text = call.request.parameter(0)?.to_owned();
//!     call.response.text(&text);
//!     Ok(())
//! }
//!
//! #[derive(num_derive::FromPrimitive)]
//! enum TestRoutes {
//!     Ping,
//!     Echo,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let (queue, mut endpoint) = queue();
//!     tokio::spawn(async move {
//!         while let Some(mut call) = endpoint.recv().await {
//!             match TestRoutes::from_usize(call.token) {
//!                 Some(TestRoutes::Ping) => ping(&mut call).complete(call),
//!                 Some(TestRoutes::Echo) => echo(&mut call).complete(call),
//!                 _ => call.handle_unknown_token(),
//!             }
//!         }
//!     });
//!
//!     let routes = RouteDictionary::new();
//!     routes.register(Method::GET, "/ping", queue.clone(), TestRoutes::Ping as usize);
//!     routes.register(Method::GET, "/echo/{text}", queue, TestRoutes::Echo as usize);
//!     let dispatcher = routes.dispatcher();
//!
//!     let response = dispatcher.invoke(Request::example(Method::GET, "/ping", "")).await;
//!     assert_eq!(response.body_str(), "PONG");
//!
//!     let response = dispatcher.invoke(Request::example(Method::GET, "/echo/a%20b", "")).await;
//!     assert_eq!(response.body_str(), "a b");
//!
//!     let response = dispatcher.invoke(Request::example(Method::POST, "/ping", "")).await;
//!     assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
//! }
//! ```
use std::sync::{Arc, Mutex};
use std::time::Instant;

use hyper::{Method, StatusCode};
use percent_encoding::percent_decode_str;

use crate::average::Average;
use crate::platform::Platform;
use crate::request::Request;
use crate::response::Response;

/// Represents an error when handling a route.
///
/// A **ClientError** signals that the data sent by the client was invalid. A **ServerError**
/// signals that a server-sided problem occurred, most commonly a store which is unavailable.
#[derive(Debug)]
pub enum RouteError {
    /// The request was invalid and is answered with **400 Bad Request**.
    ClientError(anyhow::Error),
    /// The request couldn't be handled and is answered with **500 Internal Server Error**.
    ServerError(anyhow::Error),
}

/// Provides a simple way of creating a **RouteError** which represents a **ServerError**.
///
/// # Example
///
/// ```
/// use tally::routes::{Call, RouteResult};
/// fn my_route(call: &mut Call) -> RouteResult {
///     Err(tally::server_error!("We forgot to implement this route."))
/// }
/// ```
#[macro_export]
macro_rules! server_error {
    ($err:expr $(,)?) => ({
        $crate::routes::RouteError::ServerError(anyhow::anyhow!($err))
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::routes::RouteError::ServerError(anyhow::anyhow!($fmt, $($arg)*))
    };
}

/// Provides a simple way of creating a **RouteError** which represents a **ClientError**.
///
/// # Example
///
/// ```
/// use tally::routes::{Call, RouteResult};
/// fn my_route(call: &mut Call) -> RouteResult {
///     if call.request.body().is_empty() {
///         Err(tally::client_error!("Please provide a body for {}", call.request))
///     } else {
///         call.response.text("OK");
///         Ok(())
///     }
/// }
/// ```
#[macro_export]
macro_rules! client_error {
    ($err:expr $(,)?) => ({
        $crate::routes::RouteError::ClientError(anyhow::anyhow!($err))
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::routes::RouteError::ClientError(anyhow::anyhow!($fmt, $($arg)*))
    };
}

impl From<anyhow::Error> for RouteError {
    fn from(error: anyhow::Error) -> Self {
        RouteError::ServerError(error)
    }
}

/// Represents the return type of route handlers.
///
/// The actual result is passed through via the response within the call.
pub type RouteResult = std::result::Result<(), RouteError>;

/// Provides an extension trait on [RouteResult] so that **complete** can be directly invoked on
/// it: `my_handler(&mut call).complete(call)`.
///
/// Note that the **ResultExt** trait has to be visible (used) so that the compiler permits to
/// invoke this method.
pub trait ResultExt {
    /// Completes the given call with the wrapped result.
    fn complete(self, call: Call);
}

impl ResultExt for RouteResult {
    fn complete(self, call: Call) {
        call.complete(self);
    }
}

/// Represents the invocation of a route.
pub struct Call {
    /// Contains the request as sent by the client.
    pub request: Request,

    /// Contains the response to be filled by the handler.
    pub response: Response,

    /// Contains the token of the route being called.
    ///
    /// This is required as commonly a bunch of routes share a single queue.
    pub token: usize,

    callback: tokio::sync::oneshot::Sender<Response>,
}

impl Call {
    /// Marks the route represented by this call as handled.
    ///
    /// In case of a successful completion, the response is sent back as is. Otherwise, it is
    /// replaced by an appropriate error response.
    pub fn complete(self, result: RouteResult) {
        let response = match result {
            Ok(_) => self.response,
            Err(RouteError::ClientError(error)) => {
                log::debug!("Rejected {}: {:#}", self.request, error);
                Response::plain(StatusCode::BAD_REQUEST, format!("CLIENT: {:#}", error))
            }
            Err(RouteError::ServerError(error)) => {
                log::error!("Failed to handle {}: {:#}", self.request, error);
                Response::plain(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("SERVER: {:#}", error),
                )
            }
        };

        if self.callback.send(response).is_err() {
            log::error!("Failed to submit a result to a oneshot callback channel!");
        }
    }

    /// Completes the call with an error, as the actor doesn't know the token.
    pub fn handle_unknown_token(self) {
        let token = self.token;
        self.complete(Err(server_error!("Unknown token received: {}!", token)));
    }
}

/// Represents a queue which can be stored in a [RouteDictionary] in order to receive
/// [Calls](Call) to be handled.
pub type Queue = tokio::sync::mpsc::Sender<Call>;

/// Represents the endpoint of a [Queue] which is moved into an actor in order to receive calls.
pub type Endpoint = tokio::sync::mpsc::Receiver<Call>;

/// Creates a new queue which connects an actor to the [RouteDictionary].
///
/// These queues are limited in size (1024). We'd rather start rejecting requests than running out
/// of memory in an overload condition.
pub fn queue() -> (Queue, Endpoint) {
    tokio::sync::mpsc::channel(1024)
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Literal(&'static str),
    Placeholder,
}

/// Wraps a route which has previously been registered.
///
/// This is made public so that the diagnostics can report the utilization metrics.
pub struct Route {
    /// Contains the HTTP method being handled.
    pub method: Method,
    /// Contains the path pattern being handled.
    pub pattern: &'static str,
    segments: Vec<Segment>,
    queue: Queue,
    token: usize,
    call_metrics: Average,
}

impl Route {
    fn new(method: Method, pattern: &'static str, queue: Queue, token: usize) -> Self {
        let segments = pattern
            .trim_start_matches('/')
            .split('/')
            .map(|segment| {
                if segment.starts_with('{') && segment.ends_with('}') {
                    Segment::Placeholder
                } else {
                    Segment::Literal(segment)
                }
            })
            .collect();

        Route {
            method,
            pattern,
            segments,
            queue,
            token,
            call_metrics: Average::new(),
        }
    }

    /// Matches the given path and returns the decoded values of all placeholders.
    ///
    /// Placeholders never match an empty segment.
    fn matches(&self, path: &str) -> Option<Vec<String>> {
        let mut parameters = Vec::new();
        let mut parts = path.trim_start_matches('/').split('/');
        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) if *literal == part => (),
                Segment::Placeholder if !part.is_empty() => {
                    parameters.push(percent_decode_str(part).decode_utf8_lossy().into_owned())
                }
                _ => return None,
            }
        }

        if parts.next().is_some() {
            None
        } else {
            Some(parameters)
        }
    }

    /// Returns the number of invocations of this route.
    pub fn call_count(&self) -> u64 {
        self.call_metrics.count()
    }

    /// Returns the average call duration in microseconds.
    pub fn avg_duration(&self) -> i32 {
        self.call_metrics.avg()
    }
}

/// Represents an internally mutable dictionary which maps routes to queues.
#[derive(Default)]
pub struct RouteDictionary {
    routes: Mutex<Vec<Arc<Route>>>,
}

/// Provides a readonly view of a [RouteDictionary] used to actually dispatch calls.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Vec<Arc<Route>>,
}

impl RouteDictionary {
    /// Creates a new and empty dictionary.
    pub fn new() -> Self {
        RouteDictionary {
            routes: Mutex::new(Vec::new()),
        }
    }

    /// Creates and installs the dictionary into the given **Platform**.
    ///
    /// Note that this is automatically performed by the [Builder](crate::builder::Builder) unless
    /// disabled.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let routes = Arc::new(RouteDictionary::new());
        platform.register::<RouteDictionary>(routes.clone());

        routes
    }

    /// Registers a route for the given method and path pattern to be dispatched into the given
    /// queue.
    ///
    /// A pattern consists of literal segments and placeholders like **{id}**.
    pub fn register(&self, method: Method, pattern: &'static str, queue: Queue, token: usize) {
        let mut routes = self.routes.lock().unwrap();
        if routes
            .iter()
            .any(|route| route.method == method && route.pattern == pattern)
        {
            log::error!(
                "Not going to register route {} {} as there is already a route present for it",
                method,
                pattern
            );
        } else {
            log::debug!("Registering route {} {}...", method, pattern);
            routes.push(Arc::new(Route::new(method, pattern, queue, token)));
        }
    }

    /// Reports the usage metrics of all known routes.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.routes.lock().unwrap().clone()
    }

    /// Creates a readonly copy of the known routes and returns them as dispatcher.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            routes: self.routes(),
        }
    }
}

impl Dispatcher {
    /// Dispatches the given request to the queue of the matching route and returns the response.
    ///
    /// If no route matches the path, **404 Not Found** is returned. If only the method doesn't
    /// match, **405 Method Not Allowed** is returned.
    pub async fn invoke(&self, request: Request) -> Response {
        let mut path_matched = false;
        for route in &self.routes {
            if let Some(parameters) = route.matches(request.path()) {
                if &route.method == request.method() {
                    return Dispatcher::invoke_route(route, request.with_parameters(parameters))
                        .await;
                }
                path_matched = true;
            }
        }

        if path_matched {
            Response::plain(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
        } else {
            Response::plain(StatusCode::NOT_FOUND, "Not found")
        }
    }

    async fn invoke_route(route: &Arc<Route>, request: Request) -> Response {
        log::debug!("Dispatching {} to {}...", request, route.pattern);

        let (callback, promise) = tokio::sync::oneshot::channel();
        let call = Call {
            request,
            response: Response::new(),
            token: route.token,
            callback,
        };

        let watch = Instant::now();
        if route.queue.send(call).await.is_err() {
            log::error!("Failed to submit a call for {} into its queue!", route.pattern);
            return Response::plain(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable");
        }

        match promise.await {
            Ok(response) => {
                route.call_metrics.add(watch.elapsed().as_micros() as i32);
                response
            }
            _ => {
                log::error!("Route {} did not yield any result!", route.pattern);
                Response::plain(StatusCode::INTERNAL_SERVER_ERROR, "No result")
            }
        }
    }
}
