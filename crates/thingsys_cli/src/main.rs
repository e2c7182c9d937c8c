//! `thingsys` service entry point.
//!
//! # Responsibility
//! - Wire config, logging, storage, the self-hosting loader and the HTTP
//!   listener together.
//! - Map the loader's final state onto the process exit code.
//!
//! # Exit codes
//! - `0`: stopped without a pending update.
//! - `1`: configuration, boot or runtime failure.
//! - `75`: the system definition changed; the supervisor should restart.

use log::{error, info, warn};
use std::error::Error;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use thingsys_core::db::open_db;
use thingsys_core::host::{DirectorySources, LoaderState, SelfHostingLoader, SourceWatcher};
use thingsys_core::http::types::{HttpMethod, HttpRequest, HttpResponse};
use thingsys_core::{
    core_version, init_logging, ContentStore, FirstPartyHandlers, Router, ServiceConfig,
    SqliteThingRepository, RESTART_EXIT_CODE,
};

const EXIT_FAILURE: i32 = 1;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("thingsys: {err}");
            return EXIT_FAILURE;
        }
    };

    let log_dir = match absolute(&config.log_dir) {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("thingsys: cannot resolve log directory: {err}");
            return EXIT_FAILURE;
        }
    };
    if let Err(err) = init_logging(config.log_level, &log_dir) {
        eprintln!("thingsys: {err}");
        return EXIT_FAILURE;
    }
    info!(
        "event=service_start module=cli status=ok version={} profile={} addr={}",
        core_version(),
        config.profile.as_str(),
        config.listen_addr()
    );

    match serve(&config) {
        Ok(LoaderState::Restarting) => {
            info!("event=service_stop module=cli status=restart");
            log::logger().flush();
            RESTART_EXIT_CODE
        }
        Ok(state) => {
            info!(
                "event=service_stop module=cli status=ok state={}",
                state.as_str()
            );
            log::logger().flush();
            0
        }
        Err(err) => {
            error!("event=service_stop module=cli status=error error={}", err);
            log::logger().flush();
            eprintln!("thingsys: {err}");
            EXIT_FAILURE
        }
    }
}

fn serve(config: &ServiceConfig) -> Result<LoaderState, Box<dyn Error>> {
    let conn = open_db(&config.storage_dir)?;
    let store = Arc::new(ContentStore::open(SqliteThingRepository::new(conn))?);

    // Edits made while booting are queued and reconciled by `run`.
    let (signals, queue) = mpsc::channel();
    let _watcher = SourceWatcher::start(&config.template_dir, signals)?;

    let sources = DirectorySources::new(&config.template_dir);
    let mut loader = SelfHostingLoader::new(Arc::clone(&store), sources);
    if loader.boot()? == LoaderState::Restarting {
        return Ok(LoaderState::Restarting);
    }

    let mut router = Router::new();
    let report = loader.execute_server_fragment(&FirstPartyHandlers::new(), &mut router)?;
    info!(
        "event=routes_ready module=cli status=ok routes={}",
        report.routes_registered
    );
    let router = Arc::new(router);

    let server =
        tiny_http::Server::http(config.listen_addr()).map_err(|err| err as Box<dyn Error>)?;
    let server = Arc::new(server);
    let listener = Arc::clone(&server);
    thread::spawn(move || {
        for request in listener.incoming_requests() {
            let router = Arc::clone(&router);
            thread::spawn(move || respond(request, &router));
        }
    });
    info!(
        "event=http_listen module=cli status=ok addr={}",
        config.listen_addr()
    );

    let state = loader.run(&queue)?;
    server.unblock();
    Ok(state)
}

fn respond(mut request: tiny_http::Request, router: &Router) {
    let response = match convert_request(&mut request) {
        Ok(converted) => router.dispatch(&converted),
        Err(response) => response,
    };

    let mut reply =
        tiny_http::Response::from_data(response.body).with_status_code(response.status);
    if let Ok(header) =
        tiny_http::Header::from_bytes(&b"Content-Type"[..], response.content_type.as_bytes())
    {
        reply = reply.with_header(header);
    }
    if let Err(err) = request.respond(reply) {
        warn!("event=http_respond module=cli status=error error={}", err);
    }
}

fn convert_request(request: &mut tiny_http::Request) -> Result<HttpRequest, HttpResponse> {
    let method = HttpMethod::parse(request.method().as_str())
        .ok_or_else(|| HttpResponse::error(405, "method not allowed"))?;
    let mut body = Vec::new();
    request
        .as_reader()
        .read_to_end(&mut body)
        .map_err(|err| HttpResponse::error(400, &format!("failed to read request body: {err}")))?;
    Ok(HttpRequest::new(method, request.url()).with_body(body))
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
