//! Contains the HTTP server of Tally.
//!
//! Opens a server-socket on the specified port (**server.port** in the config or 8080 as fallback)
//! and binds it to the selected IP (**server.host** in the config or 0.0.0.0 as fallback). Each
//! incoming request is handed to the [Dispatcher](crate::routes::Dispatcher) of the
//! [RouteDictionary] and the resulting response is sent back via **hyper**.
//!
//! Note that the server will periodically try to bind the socket to the selected port, therefore a
//! "new" instance can be started and the "old" one can bleed out and the port will be "handed
//! through" with minimal downtime. Also, this will listen to change events of the config and will
//! relocate to another port or host if changed.
//!
//! # Example
//!
//! ```no_run
//! use tally::builder::Builder;
//! use tally::config::Config;
//! use tally::server::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Setup and create a platform...
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Specify a minimal config so that we run on a different port than a
//!     // production instance.
//!     platform.require::<Config>().load_from_string("
//!         server:
//!             port: 1503
//!     ", None).unwrap();
//!
//!     // Run the platform...
//!     platform.require::<Server>().event_loop().await;
//! }
//! ```
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, StatusCode};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::platform::Platform;
use crate::request::Request;
use crate::response::Response;
use crate::routes::{Dispatcher, RouteDictionary};
use crate::spawn;

/// Specifies how often a running server checks if the platform is still running.
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Specifies the delay between two attempts to bind the server socket.
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Represents the HTTP server.
pub struct Server {
    running: AtomicBool,
    current_address: Mutex<Option<String>>,
    platform: Arc<Platform>,
}

impl Server {
    /// Creates and installs a **Server** into the given **Platform**.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder) unless disabled.
    ///
    /// Also note, that this will not technically start the server. This has to be done manually
    /// via [event_loop](Server::event_loop) as it is most probably done in the main thread.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let server = Arc::new(Server {
            running: AtomicBool::new(false),
            current_address: Mutex::new(None),
            platform: platform.clone(),
        });

        platform.register::<Server>(server.clone());

        server
    }

    /// Determines if the server socket should keep listening for incoming connections.
    ///
    /// In contrast to **Platform::is_running** this is not used to control the shutdown of the
    /// server. Rather we toggle this flag to false if a config and therefore address change was
    /// detected. This way the current socket is closed and a new one for the appropriate address
    /// will be setup by the **event_loop**.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns the address the server socket is currently bound to.
    pub fn current_address(&self) -> Option<String> {
        self.current_address.lock().unwrap().clone()
    }

    /// Determines the server address based on the current configuration.
    ///
    /// If no, an invalid or a partial config is present, fallback values are used. By default we
    /// use port 8080 and bind to "0.0.0.0".
    fn address(&self) -> String {
        self.platform
            .find::<Config>()
            .map(|config| {
                let handle = config.current();
                format!(
                    "{}:{}",
                    handle.str_or("server.host", "0.0.0.0"),
                    handle
                        .query("server.port")
                        .as_i64()
                        .filter(|port| port > &0 && port <= &(u16::MAX as i64))
                        .unwrap_or(8080)
                )
            })
            .unwrap_or_else(|| "0.0.0.0:8080".to_owned())
    }

    /// Starts the event loop in a separate task.
    ///
    /// This is most probably used by test scenarios where the tests itself run in the main thread.
    pub fn fork(server: &Arc<Server>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate task and waits until the server socket is bound.
    ///
    /// Just like **fork** this is intended to be used in test environments.
    pub async fn fork_and_await(server: &Arc<Server>) {
        Server::fork(server);

        while server.current_address().is_none() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Tries to open a server socket on the specified address to serve incoming requests.
    ///
    /// The task of this loop is to bind the server socket to the specified address. Once this was
    /// successful, **hyper** serves all incoming connections until either the platform is no
    /// longer running or the config has changed and we should try to bind the server to the new
    /// address.
    pub async fn event_loop(&self) {
        let mut address = String::new();
        let mut last_bind_error_reported = Instant::now();

        while self.platform.is_running() {
            // If the sever is started for the first time or if it has been restarted due to a
            // config change, we need to reload the address...
            if !self.is_running() {
                address = self.address();
                self.running.store(true, Ordering::Release);
            }

            match TcpListener::bind(&address).await {
                Ok(listener) => {
                    log::info!("Opened server socket on {}...", &address);
                    *self.current_address.lock().unwrap() = Some(address.clone());
                    if let Err(error) = self.serve(listener).await {
                        log::error!("The server on {} failed: {:#}", &address, error);
                        tokio::time::sleep(BIND_RETRY_INTERVAL).await;
                    }
                    log::info!("Closing server socket on {}.", &address);
                }
                Err(error) => {
                    // If we were unable to bind to the server, we log this every once in a while
                    // (every 5s). Otherwise we would jam the log as re retry every 500ms.
                    if last_bind_error_reported.elapsed().as_secs() > 5 {
                        log::error!(
                            "Cannot open server address {}: {}. Retrying every 500ms...",
                            &address,
                            error
                        );
                        last_bind_error_reported = Instant::now();
                    }
                    tokio::time::sleep(BIND_RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Serves all connections accepted by the given listener until a shutdown is requested.
    ///
    /// Each connection fetches its own dispatcher so that routes which have been registered
    /// after the server was started are picked up.
    async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let platform = self.platform.clone();
        let make_service = make_service_fn(move |connection: &AddrStream| {
            log::debug!("Opened connection from {}...", connection.remote_addr());
            let dispatcher = platform
                .find::<RouteDictionary>()
                .map(|routes| routes.dispatcher())
                .unwrap_or_else(|| RouteDictionary::new().dispatcher());

            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    handle_request(dispatcher.clone(), request)
                }))
            }
        });

        hyper::Server::from_tcp(listener.into_std()?)?
            .tcp_nodelay(true)
            .serve(make_service)
            .with_graceful_shutdown(self.await_shutdown())
            .await?;

        Ok(())
    }

    /// Completes once the platform is shut down or once the server address has changed.
    async fn await_shutdown(&self) {
        let mut config_changed_flag = self.platform.find::<Config>().map(|config| config.notifier());

        while self.platform.is_running() && self.is_running() {
            match config_changed_flag.as_mut() {
                Some(flag) => {
                    tokio::select! {
                        // We use a timeout here so that the while condition (esp.
                        // platform.is_running()) is checked every once in a while...
                        _ = tokio::time::sleep(SHUTDOWN_CHECK_INTERVAL) => (),
                        _ = flag.recv() => self.check_address_change(),
                    }
                }
                None => tokio::time::sleep(SHUTDOWN_CHECK_INTERVAL).await,
            }
        }
    }

    /// Forces the event loop to re-create the server socket if the configured address changed.
    fn check_address_change(&self) {
        let new_address = self.address();
        if let Some(current_address) = &*self.current_address.lock().unwrap() {
            if current_address != &new_address {
                log::info!("Server address has changed. Restarting server socket...");
                self.running.store(false, Ordering::Release);
            }
        }
    }
}

/// Parses the incoming request and dispatches it to the matching route.
async fn handle_request(
    dispatcher: Dispatcher,
    request: hyper::Request<Body>,
) -> Result<hyper::Response<Body>, Infallible> {
    let response = match Request::read(request).await {
        Ok(request) => dispatcher.invoke(request).await,
        Err(error) => Response::plain(StatusCode::BAD_REQUEST, format!("CLIENT: {:#}", error)),
    };

    Ok(response.complete())
}

#[cfg(test)]
mod tests {
    use hyper::{Method, StatusCode};

    use crate::builder::Builder;
    use crate::config::Config;
    use crate::routes::{queue, RouteDictionary};
    use crate::server::Server;
    use crate::testing::test_async;

    #[test]
    fn address_falls_back_to_defaults() {
        test_async(async {
            let platform = Builder::new().enable_config().enable_server().build().await;
            let config = platform.require::<Config>();
            let server = platform.require::<Server>();

            config
                .load_from_string("server:\n    host: 127.0.0.1\n    port: 99999\n", None)
                .unwrap();
            assert_eq!(server.address(), "127.0.0.1:8080");

            config
                .load_from_string("server:\n    port: 1234\n", None)
                .unwrap();
            assert_eq!(server.address(), "0.0.0.0:1234");
        });
    }

    #[test]
    fn integration_test() {
        // We want exclusive access to the 1503 port on which we fire up a test-server...
        log::info!("Acquiring shared resources...");
        let _guard = crate::testing::SHARED_TEST_RESOURCES.lock().unwrap();
        log::info!("Successfully acquired shared resources.");

        test_async(async {
            let platform = Builder::new()
                .enable_config()
                .enable_routes()
                .enable_server()
                .build()
                .await;

            // Specify a minimal config so that we run on a different port than a
            // production instance.
            platform
                .require::<Config>()
                .load_from_string(
                    "
                server:
                    host: 127.0.0.1
                    port: 1503
            ",
                    None,
                )
                .unwrap();

            let (queue, mut endpoint) = queue();
            tokio::spawn(async move {
                while let Some(mut call) = endpoint.recv().await {
                    call.response.text("PONG");
                    call.complete(Ok(()));
                }
            });
            platform
                .require::<RouteDictionary>()
                .register(Method::GET, "/ping", queue, 0);

            // Normally we'd directly run the event loop here:
            // platform.require::<Server>().event_loop().await;

            // However, as we want to send some requests, we fork the server in a separate task...
            Server::fork_and_await(&platform.require::<Server>()).await;

            let client = hyper::Client::new();
            let response = client
                .get("http://127.0.0.1:1503/ping".parse().unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
            assert_eq!(&body[..], b"PONG");

            let response = client
                .get("http://127.0.0.1:1503/missing".parse().unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);

            platform.terminate();
        });
    }
}
