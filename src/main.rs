//! easystream-viewer - Main entry point
//!
//! Command-line viewer for Easy Stream: list and inspect broadcasts, unlock
//! private ones, and watch them over WebRTC.

mod args;

use args::{Args, Command, ProofArgs};
use clap::Parser;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use easystream_viewer::api::types::{Stream, StreamView, StreamViewList};
use easystream_viewer::api::{ApiClient, ListQuery, OperatorSession};
use easystream_viewer::auth::{AccessToken, AccessTokenStore, AuthorizationResolver, StreamId};
use easystream_viewer::config::Config;
use easystream_viewer::playback::signaling::endpoint_for;
use easystream_viewer::playback::{NegotiationSession, PlaybackStatus, TransportFactory};
use easystream_viewer::streams::VisibilityGate;

type BoxError = Box<dyn std::error::Error>;

struct Context {
    config: Config,
    api: ApiClient,
    gate: Arc<VisibilityGate>,
    resolver: AuthorizationResolver,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Parse command line arguments
    let args = Args::parse();

    // Config is read before logging starts so its level can seed the filter
    let loaded = args.load_config();
    let config_level = loaded
        .as_ref()
        .map(|cfg| cfg.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // Initialize logging with noise filtering for third-party WebRTC crates
    let log_level = if args.verbose { "debug".to_string() } else { config_level };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("EASYSTREAM_LOG").unwrap_or(log_level))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .init();

    info!("easystream-viewer v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match loaded {
        Ok(cfg) => {
            debug!("Loaded configuration from {:?}", args.config);
            cfg
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    };

    if let Some(ref url) = args.api_url {
        info!("Overriding API base URL to {}", url);
        config.api.base_url = url.clone();
    }
    if let Some(mode) = args.mode {
        config.playback.mode = mode;
    }

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    let mut api = ApiClient::new(&config.api)?;
    if let Some(ref bearer) = args.operator_token {
        info!("Operator session enabled");
        api = api.with_operator(OperatorSession::new(bearer.clone()));
    }

    let store = AccessTokenStore::new();
    let gate = Arc::new(VisibilityGate::new(api.clone(), store.clone()));
    let resolver = AuthorizationResolver::new(api.clone(), store).with_gate(gate.clone());
    let ctx = Context {
        config,
        api,
        gate,
        resolver,
    };

    match args.command {
        Command::List {
            status,
            visibility,
            page,
            page_size,
            all,
            follow,
            proof,
        } => {
            authorize(&ctx, &proof).await?;
            if all {
                let query = ListQuery {
                    status,
                    visibility,
                    page,
                    page_size,
                };
                let list = ctx.gate.operator_list(&query).await?;
                println!("{} streams", list.total);
                for stream in &list.streams {
                    print_record(stream);
                }
            } else {
                let mut listing = ctx.gate.subscribe();
                let list = ctx.gate.list(args::list_query(status, visibility, page, page_size)).await?;
                print_listing(&list);
                if follow {
                    listing.borrow_and_update();
                    let _poll = ctx.gate.poll(Duration::from_millis(ctx.config.api.list_refresh_ms));
                    loop {
                        tokio::select! {
                            _ = signal::ctrl_c() => break,
                            changed = listing.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                                if let Some(list) = listing.borrow_and_update().clone() {
                                    print_listing(&list);
                                }
                            }
                        }
                    }
                }
            }
        }
        Command::Show { stream, follow, proof } => {
            authorize(&ctx, &proof).await?;
            match stream {
                StreamId::Id(id) => print_view(&ctx.gate.detail(id).await?),
                StreamId::Key(ref key) if ctx.api.has_operator() => {
                    print_record(&ctx.gate.operator_detail(key).await?)
                }
                StreamId::Key(ref key) => print_view(&ctx.gate.detail_by_key(key).await?),
            }
            if follow {
                let StreamId::Id(id) = stream else {
                    return Err("--follow needs a numeric stream id".into());
                };
                let every = Duration::from_millis(ctx.config.api.detail_refresh_ms);
                let (_poll, mut detail) = ctx.gate.follow_detail(id, every);
                loop {
                    tokio::select! {
                        _ = signal::ctrl_c() => break,
                        changed = detail.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            if let Some(view) = detail.borrow_and_update().clone() {
                                print_view(&view);
                            }
                        }
                    }
                }
            }
        }
        Command::Verify { proof } => {
            if proof.is_empty() {
                return Err("verify needs --password/--stream-key, --share-code, --share-link or --landing-url".into());
            }
            match authorize(&ctx, &proof).await? {
                Some(token) => {
                    println!("stream:  {}", token.stream_id());
                    println!("token:   {}", token.token());
                    if let Some(expires_at) = token.expires_at() {
                        println!("expires: {}", expires_at.to_rfc3339());
                    }
                }
                None => println!("link carried no credential"),
            }
        }
        Command::Watch {
            stream,
            proof,
            duration,
            retries,
        } => {
            let granted = authorize(&ctx, &proof).await?;
            let token = playback_token(granted, &stream, ctx.resolver.store());
            watch(&ctx, stream, token, duration.map(Duration::from_secs), retries).await?;
        }
    }

    Ok(())
}

/// Apply the credential given on the command line, if any
async fn authorize(ctx: &Context, proof: &ProofArgs) -> Result<Option<AccessToken>, BoxError> {
    if let Some(ref url) = proof.landing_url {
        return Ok(ctx.resolver.resolve_landing(url).await?);
    }
    match proof.proof() {
        Some(proof) => {
            let token = ctx.resolver.verify(proof).await?;
            info!("Access granted to stream {} ({})", token.stream_id(), token.redacted());
            Ok(Some(token))
        }
        None => Ok(None),
    }
}

/// Token to negotiate `stream` with. A grant for another stream is never sent.
fn playback_token(
    granted: Option<AccessToken>,
    stream: &StreamId,
    store: &AccessTokenStore,
) -> Option<AccessToken> {
    match granted {
        Some(token) if token.stream_id() == stream => Some(token),
        Some(token) => {
            warn!("Credential unlocked stream {}, not {}", token.stream_id(), stream);
            store.get(stream)
        }
        None => store.get(stream),
    }
}

#[cfg(feature = "webrtc-transport")]
fn transport_factory(config: &Config) -> Result<Arc<easystream_viewer::playback::rtc::RtcTransportFactory>, BoxError> {
    Ok(Arc::new(easystream_viewer::playback::rtc::RtcTransportFactory::new(
        config.playback.ice_servers.clone(),
    )))
}

#[cfg(not(feature = "webrtc-transport"))]
fn transport_factory(_config: &Config) -> Result<Arc<dyn TransportFactory>, BoxError> {
    Err("built without the webrtc-transport feature".into())
}

async fn watch(
    ctx: &Context,
    stream: StreamId,
    token: Option<AccessToken>,
    duration: Option<Duration>,
    mut retries: u32,
) -> Result<(), BoxError> {
    let factory = transport_factory(&ctx.config)?;
    let signaling = endpoint_for(
        ctx.config.playback.mode,
        &ctx.api,
        &ctx.config.edge,
        &stream,
        token,
    )?;
    let session = NegotiationSession::new(
        stream,
        factory.clone() as Arc<dyn TransportFactory>,
        Arc::from(signaling),
        &ctx.config.playback,
    );
    let mut status_rx = session.subscribe();

    if !ctx.config.playback.autoplay {
        println!("Press Enter to start playback");
        let mut line = String::new();
        let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
        tokio::io::AsyncBufReadExt::read_line(&mut stdin, &mut line).await?;
    }

    session.start().await;
    println!("status: {}", session.status());

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let outcome = loop {
        if session.status() == PlaybackStatus::Error {
            let cause = session.last_error().map(|e| e.to_string()).unwrap_or_default();
            if retries == 0 {
                break Err(cause);
            }
            retries -= 1;
            warn!("Playback error: {}; retrying ({} left)", cause, retries);
            session.retry().await;
            println!("status: {}", session.status());
            continue;
        }

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                break Ok(());
            }
            _ = &mut deadline => {
                info!("Watch duration elapsed");
                break Ok(());
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let status = *status_rx.borrow_and_update();
                println!("status: {}", status);
            }
        }
    };

    session.stop();
    report_packets(&factory);
    outcome.map_err(|cause| format!("playback failed: {}", cause).into())
}

#[cfg(feature = "webrtc-transport")]
fn report_packets(factory: &easystream_viewer::playback::rtc::RtcTransportFactory) {
    println!("rtp packets received: {}", factory.packets_received());
}

#[cfg(not(feature = "webrtc-transport"))]
fn report_packets(_factory: &Arc<dyn TransportFactory>) {}

fn print_listing(list: &StreamViewList) {
    println!("{} streams", list.total);
    for view in &list.streams {
        print_view(view);
    }
}

fn print_view(view: &StreamView) {
    println!(
        "{:>6}  {:<8} {:<8} {:>5} viewers  {}",
        view.id,
        view.status.as_str(),
        view.visibility.as_str(),
        view.current_viewers,
        view.name
    );
}

fn print_record(stream: &Stream) {
    print_view(&stream.view);
    println!("        key: {}", stream.stream_key);
    if let Some(ref code) = stream.share_code {
        let state = if stream.share_code_exhausted() { "exhausted" } else { "active" };
        println!(
            "        share code: {} ({}, {}/{} uses)",
            code,
            state,
            stream.share_code_used_count.unwrap_or(0),
            stream.share_code_max_uses.unwrap_or(0)
        );
    }
}
