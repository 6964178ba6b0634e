//! Provides a builder which can be used to setup and initialize the framework.
//!
//! This can be used to create and setup the central parts of Tally. As some of them are optional
//! (or simply in the way when testing), a builder permits to selectively enable or disable them.
//!
//! Note that the stores (ledger, counter cache and rankings) and the pages are not covered here, as
//! their setup can fail and depends on the config. These are installed afterwards, see the
//! example in the [crate](crate) docs.
//!
//! # Example
//! Setting up the framework with all features enabled:
//! ```no_run
//! # use tally::builder::Builder;
//! # use tally::server::Server;
//! #[tokio::main]
//! async fn main() {
//!     // Enable all features and build the platform...
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Install the stores and pages here...
//!
//!     // Start the main event loop of the server...
//!     platform.require::<Server>().event_loop().await;
//! }
//! ```
use std::sync::Arc;

use crate::platform::Platform;
use crate::{init_logging, TALLY_REVISION, TALLY_VERSION};

/// Initializes the framework by creating and initializing all core components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
    setup_routes: bool,
    diagnostics: bool,
    setup_server: bool,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Builder {
            setup_logging: false,
            enable_signals: false,
            setup_config: false,
            setup_routes: false,
            diagnostics: false,
            setup_server: false,
        }
    }

    /// Enables all features.
    ///
    /// Note that using this method (and then maybe disabling selected components) is quite
    /// convenient, but be aware that new components which might be added later will then also be
    /// enabled by default.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;
        self.setup_routes = true;
        self.diagnostics = true;
        self.setup_server = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout. As a benchmark target
    /// mostly runs within a container, this is all that is needed.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a signal listener which terminates the framework once **CTRL-C** or **SIGHUP**
    /// is received.
    ///
    /// For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables installing the signal listener after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Installs [config::Config](crate::config::Config) and loads the **settings.yml**.
    ///
    /// For more details see: [config](crate::config)
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables setting up a **Config** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Creates and installs a [RouteDictionary](crate::routes::RouteDictionary).
    ///
    /// For more details see: [routes](crate::routes)
    pub fn enable_routes(mut self) -> Self {
        self.setup_routes = true;
        self
    }

    /// Disables setting up a **RouteDictionary** after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_routes(mut self) -> Self {
        self.setup_routes = false;
        self
    }

    /// Installs the diagnostic routes. Requires the routes to be enabled.
    ///
    /// For more details see: [diagnostics](crate::diagnostics)
    pub fn enable_diagnostics(mut self) -> Self {
        self.diagnostics = true;
        self
    }

    /// Disables installing the diagnostic routes after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_diagnostics(mut self) -> Self {
        self.diagnostics = false;
        self
    }

    /// Creates and installs a [Server](crate::server::Server) instance.
    ///
    /// Note that still, the main event loop has to be invoked manually via:
    /// `platform.require::<Server>().event_loop().await`.
    pub fn enable_server(mut self) -> Self {
        self.setup_server = true;
        self
    }

    /// Disables setting up a **Server** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_server(mut self) -> Self {
        self.setup_server = false;
        self
    }

    /// Builds the [Platform](crate::platform::Platform) registry with all the enabled components
    /// being registered.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. TALLY (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            TALLY_VERSION,
            TALLY_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.enable_signals {
            crate::signals::install(platform.clone());
        }

        if self.setup_config {
            crate::config::install(platform.clone()).await;
        }

        if self.setup_server {
            let _ = crate::server::Server::install(&platform);
        }

        if self.setup_routes {
            let _ = crate::routes::RouteDictionary::install(&platform);

            if self.diagnostics {
                crate::diagnostics::install(platform.clone());
            }
        }

        platform
    }
}
