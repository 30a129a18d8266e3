//! Contains the HTTP server which answers the requests of other peers.
//!
//! Binds to the configured address (**server.host** and **server.port** in the config, falling
//! back to 0.0.0.0 and 2410) and serves two endpoints:
//!
//! * **POST /_peercache** expects a JSON body like `{"group": "scores", "key": "Alice"}`, fetches
//!   the value from the named [Group](crate::group::Group) and responds with the raw bytes of the
//!   value. Malformed requests and empty keys yield a **400**, unknown groups a **404** and
//!   failed loads a **500** carrying the error message.
//! * **GET /_peercache?group=scores&key=Alice** performs the same lookup for clients which
//!   rather use a plain url, e.g. a browser or **curl**. Both parameters may be percent-encoded.
//! * **GET /_peercache/stats** renders the statistics of all groups as plain text.
//!
//! If the socket cannot be bound (e.g. as an old instance is still shutting down), the server
//! keeps retrying every 500ms. Also, it observes the config and relocates to another address if
//! required, without restarting the node.
//!
//! # Example
//!
//! ```no_run
//! use peercache::builder::Builder;
//! use peercache::config::Config;
//! use peercache::server::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     platform.require::<Config>().load_from_string("
//!         server:
//!             port: 8001
//!     ", None).unwrap();
//!
//!     platform.require::<Server>().event_loop().await;
//! }
//! ```
use std::convert::Infallible;
use std::fmt::Write;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::error::CacheError;
use crate::fmt::format_size;
use crate::platform::Platform;
use crate::registry::GroupRegistry;
use crate::spawn;

/// Contains the path on which peers request values from each other.
pub const PEER_PATH: &str = "/_peercache";

/// Contains the path which renders the statistics of all groups.
pub const STATS_PATH: &str = "/_peercache/stats";

/// Specifies the interval in which the server checks if the platform is still running.
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Specifies the interval in which a failed bind is retried.
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Represents the HTTP server of a node.
pub struct Server {
    running: AtomicBool,
    current_address: Mutex<Option<String>>,
    platform: Arc<Platform>,
}

impl Server {
    /// Creates and installs a **Server** into the given **Platform**.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder) unless disabled. This
    /// will not start the server, which has to be done via [event_loop](Server::event_loop).
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let server = Arc::new(Server {
            running: AtomicBool::new(false),
            current_address: Mutex::new(None),
            platform: platform.clone(),
        });

        platform.register::<Server>(server.clone());

        server
    }

    /// Determines if the server should keep its current socket.
    ///
    /// This is toggled to false if the configured address changed, so that the event loop
    /// re-binds the server.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns the address the server is currently bound to.
    pub fn current_address(&self) -> Option<String> {
        self.current_address.lock().unwrap().clone()
    }

    /// Determines the server address based on the current configuration.
    fn address(&self) -> String {
        self.platform
            .find::<Config>()
            .map(|config| {
                let handle = config.current();
                format!(
                    "{}:{}",
                    handle.query("server.host").as_str().unwrap_or("0.0.0.0"),
                    handle
                        .query("server.port")
                        .as_i64()
                        .filter(|port| *port > 0 && *port <= i64::from(u16::MAX))
                        .unwrap_or(2410)
                )
            })
            .unwrap_or_else(|| "0.0.0.0:2410".to_owned())
    }

    /// Starts the event loop in a separate task.
    ///
    /// This is most probably used by tests which run in the main task.
    pub fn fork(server: &Arc<Server>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate task and waits until the socket has been bound.
    pub async fn fork_and_await(server: &Arc<Server>) {
        Server::fork(server);

        while server.current_address().is_none() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Binds the server to the configured address and serves requests until the platform is
    /// terminated.
    ///
    /// If the configured address changes, the current socket is closed gracefully and a new one
    /// is opened.
    pub async fn event_loop(&self) {
        let mut address = String::new();
        let mut last_bind_error_reported: Option<Instant> = None;

        while self.platform.is_running() {
            if !self.is_running() {
                address = self.address();
                self.running.store(true, Ordering::Release);
            }

            match bind(&address) {
                Ok(listener) => {
                    log::info!("Opened server socket on {}...", &address);
                    *self.current_address.lock().unwrap() = Some(address.clone());
                    if let Err(error) = self.serve(listener).await {
                        log::error!("Server on {} failed: {:#}", &address, error);
                    }
                    *self.current_address.lock().unwrap() = None;
                    log::info!("Closed server socket on {}.", &address);
                }
                Err(error) => {
                    // We retry every 500ms but only report the problem every once in a while...
                    if last_bind_error_reported
                        .map(|reported| reported.elapsed().as_secs() >= 5)
                        .unwrap_or(true)
                    {
                        log::error!(
                            "Cannot open server address {}: {:#}. Retrying every 500ms...",
                            &address,
                            error
                        );
                        last_bind_error_reported = Some(Instant::now());
                    }
                    tokio::time::sleep(BIND_RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let platform = self.platform.clone();
        let make_service = make_service_fn(move |_| {
            let platform = platform.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    handle_request(platform.clone(), request)
                }))
            }
        });

        hyper::Server::from_tcp(listener)?
            .serve(make_service)
            .with_graceful_shutdown(self.await_shutdown())
            .await?;

        Ok(())
    }

    /// Completes once the platform is terminated or the configured address changed.
    async fn await_shutdown(&self) {
        let mut config_changed = self
            .platform
            .find::<Config>()
            .map(|config| config.notifier());

        while self.platform.is_running() && self.is_running() {
            let change = async {
                match config_changed.as_mut() {
                    Some(notifier) => notifier.recv().await,
                    None => futures::future::pending().await,
                }
            };

            let closed = tokio::select! {
                _ = tokio::time::sleep(SHUTDOWN_CHECK_INTERVAL) => false,
                result = change => match result {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        self.check_address();
                        false
                    }
                    Err(RecvError::Closed) => true,
                }
            };

            if closed {
                config_changed = None;
            }
        }
    }

    fn check_address(&self) {
        let new_address = self.address();
        if let Some(current_address) = &*self.current_address.lock().unwrap() {
            if current_address != &new_address {
                log::info!("Server address has changed. Restarting server socket...");
                self.running.store(false, Ordering::Release);
            }
        }
    }
}

fn bind(address: &str) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(address)?;
    listener.set_nonblocking(true)?;

    Ok(listener)
}

async fn handle_request(
    platform: Arc<Platform>,
    request: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let response = match (request.method(), request.uri().path()) {
        (&Method::POST, PEER_PATH) => handle_fetch(platform, request).await,
        (&Method::GET, PEER_PATH) => handle_lookup(platform, request.uri().query()).await,
        (&Method::GET, STATS_PATH) => handle_stats(&platform),
        _ => text_response(StatusCode::NOT_FOUND, "Unknown endpoint".to_owned()),
    };

    Ok(response)
}

async fn handle_fetch(platform: Arc<Platform>, request: Request<Body>) -> Response<Body> {
    let body = match hyper::body::to_bytes(request.into_body()).await {
        Ok(body) => body,
        Err(error) => {
            return text_response(
                StatusCode::BAD_REQUEST,
                format!("Cannot read request: {}", error),
            )
        }
    };

    match parse_fetch_request(&body) {
        Ok((group_name, key)) => fetch_value(&platform, &group_name, &key).await,
        Err(error) => text_response(StatusCode::BAD_REQUEST, format!("{:#}", error)),
    }
}

async fn handle_lookup(platform: Arc<Platform>, query: Option<&str>) -> Response<Body> {
    match parse_lookup_request(query) {
        Ok((group_name, key)) => fetch_value(&platform, &group_name, &key).await,
        Err(error) => text_response(StatusCode::BAD_REQUEST, format!("{:#}", error)),
    }
}

async fn fetch_value(platform: &Arc<Platform>, group_name: &str, key: &str) -> Response<Body> {
    let group = match platform
        .find::<GroupRegistry>()
        .and_then(|registry| registry.lookup(group_name))
    {
        Some(group) => group,
        None => {
            return text_response(
                StatusCode::NOT_FOUND,
                format!("Unknown group: {}", group_name),
            )
        }
    };

    log::debug!("Peer requested {} of {}", key, group_name);
    match group.get(key).await {
        Ok(value) => {
            let mut response = Response::new(Body::from(value.as_bytes()));
            let _ = response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            response
        }
        Err(error @ CacheError::EmptyKey) => {
            text_response(StatusCode::BAD_REQUEST, error.to_string())
        }
        Err(error) => text_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    }
}

fn parse_fetch_request(body: &[u8]) -> anyhow::Result<(String, String)> {
    let request: serde_json::Value = serde_json::from_slice(body)
        .map_err(|error| anyhow::anyhow!("Malformed request: {}", error))?;

    let group = request["group"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Malformed request: missing 'group'"))?;
    let key = request["key"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Malformed request: missing 'key'"))?;

    Ok((group.to_owned(), key.to_owned()))
}

fn parse_lookup_request(query: Option<&str>) -> anyhow::Result<(String, String)> {
    let mut group = None;
    let mut key = None;
    for pair in query.unwrap_or_default().split('&') {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        match name {
            "group" => group = Some(decode_query_component(value)?),
            "key" => key = Some(decode_query_component(value)?),
            _ => (),
        }
    }

    Ok((
        group.ok_or_else(|| anyhow::anyhow!("Malformed request: missing 'group'"))?,
        key.ok_or_else(|| anyhow::anyhow!("Malformed request: missing 'key'"))?,
    ))
}

/// Resolves "+" and "%XX" escapes as used in the query string of an url.
fn decode_query_component(value: &str) -> anyhow::Result<String> {
    let bytes = value.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'+' => {
                result.push(b' ');
                index += 1;
            }
            b'%' => {
                let escaped = value
                    .get(index + 1..index + 3)
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .ok_or_else(|| {
                        anyhow::anyhow!("Malformed request: invalid escape in '{}'", value)
                    })?;
                result.push(escaped);
                index += 3;
            }
            byte => {
                result.push(byte);
                index += 1;
            }
        }
    }

    String::from_utf8(result)
        .map_err(|_| anyhow::anyhow!("Malformed request: '{}' is not valid UTF-8", value))
}

fn handle_stats(platform: &Arc<Platform>) -> Response<Body> {
    let mut result = String::new();
    let _ = writeln!(
        result,
        "{:<20} {:>10} {:>12} {:>12}",
        "Group", "Entries", "Memory", "Max Memory"
    );
    let _ = writeln!(result, "{}", "-".repeat(57));

    let groups = platform
        .find::<GroupRegistry>()
        .map(|registry| registry.groups())
        .unwrap_or_default();
    for group in &groups {
        let _ = writeln!(
            result,
            "{:<20} {:>10} {:>12} {:>12}",
            group.name(),
            group.cache_len(),
            format_size(group.cache_memory()),
            if group.max_memory() > 0 {
                format_size(group.max_memory())
            } else {
                "unbounded".to_owned()
            }
        );
        for (counter, value) in group.stats().counters() {
            let _ = writeln!(result, "    {:<30} {:>12}", counter, value);
        }
    }

    text_response(StatusCode::OK, result)
}

fn text_response(status: StatusCode, message: String) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    let _ = response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );

    response
}
