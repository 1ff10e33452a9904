mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use janvlog_core::pipeline::{HttpSttClient, Mailer, MailerSettings, ReportPipeline};
use janvlog_core::{ServerSupervisor, SignalingClient};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::{Args, Command};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(error = ?e, "fatal error");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<i32> {
    let loaded = janvlog_core::settings::load(&args.config)
        .with_context(|| format!("loading settings from {}", args.config.display()))?;
    let settings = loaded.settings;

    let log_root = PathBuf::from(settings.storage.log_root.clone());
    let audio_root = log_root.join("audio");

    let stt = Arc::new(HttpSttClient::new(settings.stt.endpoint.clone()));
    let mailer = Arc::new(
        Mailer::new(&MailerSettings {
            host: settings.mail.host.clone(),
            port: settings.mail.port,
            from: settings.mail.from.clone(),
            username: settings.mail.username.clone(),
            password: loaded.smtp_password,
        })
        .context("building smtp mailer")?,
    );
    let pipeline = Arc::new(ReportPipeline::new(stt, mailer, settings.mail.clone(), log_root.clone()));

    if let Some(Command::Regenerate { raw_log_path }) = args.command {
        pipeline
            .run_once(raw_log_path)
            .await
            .context("regenerating report from raw log")?;
        return Ok(0);
    }

    let signaling = SignalingClient::connect(&settings.janus.websocket_url())
        .await
        .context("connecting to the janus gateway")?;

    let server = ServerSupervisor::spawn(
        Arc::clone(&signaling),
        settings.janus.admin_key.clone(),
        audio_root,
        log_root,
        Arc::clone(&pipeline),
    )
    .await
    .context("starting server supervisor")?;

    let shutdown = CancellationToken::new();
    let keepalive_failed = CancellationToken::new();
    let keepalive_task = spawn_keep_alive(Arc::clone(&signaling), shutdown.clone(), keepalive_failed.clone());

    wait_for_shutdown_signal(&shutdown).await;
    keepalive_task.abort();

    info!("shutting down: closing server supervisor, signaling session, and draining report pipeline");
    if let Err(e) = server.close().await {
        error!(error = %e, "error closing server supervisor");
    }
    if let Err(e) = signaling.close().await {
        error!(error = %e, "error closing signaling session");
    }
    pipeline.close().await;

    if keepalive_failed.is_cancelled() {
        Ok(1)
    } else {
        Ok(0)
    }
}

/// One task combining the spec's "5-second keep-alive ticker" with the
/// process-level signal waiter's cancellation: a keep-alive failure is
/// fatal (the session is presumed dead), so it cancels `shutdown` itself
/// exactly as an interrupt/term signal would, just with a different exit
/// code recorded via `keepalive_failed`.
fn spawn_keep_alive(
    signaling: Arc<SignalingClient>,
    shutdown: CancellationToken,
    keepalive_failed: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(Duration::from_secs(5)) => {
                    if let Err(e) = signaling.keep_alive().await {
                        error!(error = %e, "keep-alive failed, session is presumed dead");
                        keepalive_failed.cancel();
                        shutdown.cancel();
                        return;
                    }
                }
            }
        }
    })
}

/// Waits for SIGINT, SIGQUIT, or SIGTERM, or for `shutdown` to already have
/// been cancelled by a fatal keep-alive failure.
async fn wait_for_shutdown_signal(shutdown: &CancellationToken) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            shutdown.cancelled().await;
            return;
        }
    };
    let mut sigquit = match signal(SignalKind::quit()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGQUIT handler");
            shutdown.cancelled().await;
            return;
        }
    };

    tokio::select! {
        () = shutdown.cancelled() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
            shutdown.cancel();
        }
        _ = sigterm.recv() => {
            info!("received term, shutting down");
            shutdown.cancel();
        }
        _ = sigquit.recv() => {
            info!("received quit, shutting down");
            shutdown.cancel();
        }
    }
}
