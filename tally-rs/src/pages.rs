//! Provides the pages of the voting site.
//!
//! * **GET /**: The home page showing the ranking of candidates, the votes per party and the votes
//!   per sex.
//! * **GET /candidates/{id}**: The details of a candidate. Unknown (or invalid) ids are redirected
//!   to the home page.
//! * **GET /political_parties/{name}**: The details of a party.
//! * **GET /vote**: The vote form.
//! * **POST /vote**: Records a vote and renders the vote form along with the outcome.
//! * **GET /initialize**: Resets all votes. This is used between two benchmark runs.
//!
//! All routes are handled by a single actor which forwards each call into a bounded pool of
//! workers (**server.workers**, 16 by default), so that a slow store doesn't let the number of
//! in-flight requests grow unboundedly.
//!
//! # Caching
//! The detail pages and the vote form may be cached by any proxy for **http.cache_max_age**
//! seconds (86400 by default, 0 disables the header). The home page is only marked as cacheable
//! once the site is "warm", that is, once a detail page has been served since the last reset.
//! Rendered vote forms only depend on the message, therefore they are kept per message until the
//! next reset.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use bytes::Bytes;
use fnv::FnvHashMap;
use hyper::Method;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use tokio::sync::Semaphore;

use crate::ballot::BallotBox;
use crate::config::Config;
use crate::platform::Platform;
use crate::routes::{queue, Call, Endpoint, ResultExt, RouteDictionary, RouteResult};
use crate::validator::{Submission, VoteMessage};
use crate::views;

/// Enumerates the routes handled by the pages actor.
#[derive(FromPrimitive)]
enum Page {
    Home,
    Candidate,
    Party,
    VoteForm,
    Vote,
    Initialize,
}

/// Renders the pages and keeps the state required to do so.
pub struct Pages {
    ballot_box: Arc<BallotBox>,
    max_age: u64,
    warm: AtomicBool,
    vote_forms: Mutex<FnvHashMap<VoteMessage, Bytes>>,
}

impl Pages {
    /// Creates the pages for the given ballot box.
    ///
    /// Responses will be cacheable for **max_age** seconds.
    pub fn new(ballot_box: Arc<BallotBox>, max_age: u64) -> Self {
        Pages {
            ballot_box,
            max_age,
            warm: AtomicBool::new(false),
            vote_forms: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Determines if a detail page has been served since the last reset.
    pub fn is_warm(&self) -> bool {
        self.warm.load(Ordering::Acquire)
    }

    async fn handle(&self, mut call: Call) {
        match Page::from_usize(call.token) {
            Some(Page::Home) => self.home(&mut call).await.complete(call),
            Some(Page::Candidate) => self.candidate(&mut call).await.complete(call),
            Some(Page::Party) => self.party(&mut call).await.complete(call),
            Some(Page::VoteForm) => self.vote_form(&mut call).complete(call),
            Some(Page::Vote) => self.vote(&mut call).await.complete(call),
            Some(Page::Initialize) => self.initialize(&mut call).await.complete(call),
            _ => call.handle_unknown_token(),
        }
    }

    async fn home(&self, call: &mut Call) -> RouteResult {
        let rankings = self.ballot_box.rankings();
        let ranking = rankings.home_ranking().await?;
        let parties = rankings.party_totals().await?;
        let sexes = rankings.sex_totals().await?;

        call.response.html(views::home(&ranking, &parties, &sexes));
        if self.is_warm() {
            call.response.cache_public(self.max_age)?;
        }

        Ok(())
    }

    async fn candidate(&self, call: &mut Call) -> RouteResult {
        let detail = match call.request.int_parameter(0) {
            Ok(id) => self.ballot_box.rankings().candidate_detail(id).await?,
            Err(_) => None,
        };

        match detail {
            Some(detail) => {
                call.response.html(views::candidate(&detail));
                self.serve_detail(call)
            }
            None => {
                call.response.redirect("/")?;
                Ok(())
            }
        }
    }

    async fn party(&self, call: &mut Call) -> RouteResult {
        let name = call.request.parameter(0)?.to_owned();
        let detail = self.ballot_box.rankings().party_detail(&name).await?;

        call.response.html(views::party(&detail));
        self.serve_detail(call)
    }

    fn serve_detail(&self, call: &mut Call) -> RouteResult {
        self.warm.store(true, Ordering::Release);
        call.response.cache_public(self.max_age)?;

        Ok(())
    }

    fn vote_form(&self, call: &mut Call) -> RouteResult {
        call.response.html(self.render_vote_form(VoteMessage::Empty));
        call.response.cache_public(self.max_age)?;

        Ok(())
    }

    async fn vote(&self, call: &mut Call) -> RouteResult {
        let submission = call
            .request
            .form::<Submission>()
            .map_err(crate::routes::RouteError::ClientError)?;

        let message = self.ballot_box.submit(&submission).await?;
        call.response.html(self.render_vote_form(message));

        Ok(())
    }

    async fn initialize(&self, call: &mut Call) -> RouteResult {
        self.ballot_box.reset().await?;
        self.vote_forms.lock().unwrap().clear();
        self.warm.store(false, Ordering::Release);

        call.response.text("");
        Ok(())
    }

    fn render_vote_form(&self, message: VoteMessage) -> Bytes {
        if let Some(html) = self.vote_forms.lock().unwrap().get(&message) {
            return html.clone();
        }

        let html = Bytes::from(views::vote_form(
            self.ballot_box.rankings().candidates(),
            message.text(),
        ));
        let _ = self
            .vote_forms
            .lock()
            .unwrap()
            .insert(message, html.clone());

        html
    }
}

/// Receives the calls of all pages and hands each to a worker.
async fn actor(pages: Arc<Pages>, mut endpoint: Endpoint, workers: Arc<Semaphore>) {
    while let Some(call) = endpoint.recv().await {
        let permit = match workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let pages = pages.clone();
        crate::spawn!(async move {
            pages.handle(call).await;
            drop(permit);
        });
    }
}

/// Creates the pages and registers their routes.
///
/// Requires a [BallotBox] and a [RouteDictionary] to be installed.
pub fn install(platform: &Arc<Platform>) -> anyhow::Result<Arc<Pages>> {
    let (max_age, workers) = match platform.find::<Config>() {
        Some(config) => {
            let handle = config.current();
            (
                handle.int_or("http.cache_max_age", 86400),
                handle.int_or("server.workers", 16),
            )
        }
        None => (86400, 16),
    };

    let pages = Arc::new(Pages::new(
        platform
            .find::<BallotBox>()
            .context("A ballot box is required to serve the pages")?,
        max_age.max(0) as u64,
    ));
    let routes = platform
        .find::<RouteDictionary>()
        .context("A route dictionary is required to serve the pages")?;

    let (queue, endpoint) = queue();
    routes.register(Method::GET, "/", queue.clone(), Page::Home as usize);
    routes.register(
        Method::GET,
        "/candidates/{id}",
        queue.clone(),
        Page::Candidate as usize,
    );
    routes.register(
        Method::GET,
        "/political_parties/{name}",
        queue.clone(),
        Page::Party as usize,
    );
    routes.register(Method::GET, "/vote", queue.clone(), Page::VoteForm as usize);
    routes.register(Method::POST, "/vote", queue.clone(), Page::Vote as usize);
    routes.register(Method::GET, "/initialize", queue, Page::Initialize as usize);

    let workers = workers.max(1) as usize;
    log::info!("Serving pages using {} workers.", workers);
    crate::spawn!(actor(
        pages.clone(),
        endpoint,
        Arc::new(Semaphore::new(workers))
    ));

    platform.register::<Pages>(pages.clone());

    Ok(pages)
}
