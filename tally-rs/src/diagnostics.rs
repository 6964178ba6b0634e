//! Provides a diagnostic route.
//!
//! * **GET /_sys/routes**: Lists all known routes, their number of calls and their average
//!   duration as plain text.
//!
//! [install](install) is invoked by the [Builder](crate::builder::Builder) unless disabled.
use std::sync::Arc;

use hyper::Method;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::fmt::format_short_duration;
use crate::platform::Platform;
use crate::routes::{queue, Call, Queue, RouteDictionary, RouteResult};

const SEPARATOR: &str =
    "-------------------------------------------------------------------------------\n";

/// Enumerates the routes supported by this facility.
#[derive(FromPrimitive)]
enum Diagnostics {
    Routes,
}

/// Installs the diagnostic routes into the given platform.
pub fn install(platform: Arc<Platform>) {
    if let Some(routes) = platform.find::<RouteDictionary>() {
        let queue = actor(routes.clone());
        routes.register(
            Method::GET,
            "/_sys/routes",
            queue,
            Diagnostics::Routes as usize,
        );
    }
}

fn actor(routes: Arc<RouteDictionary>) -> Queue {
    use crate::routes::ResultExt;

    let (queue, mut endpoint) = queue();

    crate::spawn!(async move {
        while let Some(mut call) = endpoint.recv().await {
            match Diagnostics::from_usize(call.token) {
                Some(Diagnostics::Routes) => routes_route(&mut call, &routes).complete(call),
                _ => call.handle_unknown_token(),
            }
        }
    });

    queue
}

fn routes_route(call: &mut Call, routes: &Arc<RouteDictionary>) -> RouteResult {
    let mut result = String::new();

    result += format!(
        "{:<40} {:>10} {:>15}\n",
        "Route", "Calls", "Avg. Duration"
    )
    .as_str();
    result += SEPARATOR;

    for route in routes.routes() {
        result += format!(
            "{:<40} {:>10} {:>15}\n",
            format!("{} {}", route.method, route.pattern),
            route.call_count(),
            format_short_duration(route.avg_duration())
        )
        .as_str();
    }
    result += SEPARATOR;

    call.response.text(&result);

    Ok(())
}

#[cfg(test)]
mod tests {
    use hyper::Method;

    use crate::builder::Builder;
    use crate::request::Request;
    use crate::routes::RouteDictionary;
    use crate::testing::test_async;

    #[test]
    fn routes_are_listed() {
        test_async(async {
            let platform = Builder::new()
                .enable_routes()
                .enable_diagnostics()
                .build()
                .await;
            let dispatcher = platform.require::<RouteDictionary>().dispatcher();

            let _ = dispatcher
                .invoke(Request::example(Method::GET, "/_sys/routes", ""))
                .await;
            let response = dispatcher
                .invoke(Request::example(Method::GET, "/_sys/routes", ""))
                .await;

            let text = response.body_str();
            assert_eq!(text.contains("Avg. Duration"), true);
            // The first call has been recorded once it completed...
            assert_eq!(
                text.lines()
                    .any(|line| line.starts_with("GET /_sys/routes") && line.contains(" 1 ")),
                true
            );
        });
    }
}
