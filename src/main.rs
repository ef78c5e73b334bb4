use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use ldapd::backend_memory::MemoryBackend;
use ldapd::config::Config;
use ldapd::controls_impl::PagedSearchManager;
use ldapd::handlers::HandlerContext;
use ldapd::{listener, tls};

#[tokio::main]
async fn main() {
    env_logger::init();
    let config = Arc::new(Config::parse());

    let acceptor = match tls::build_acceptor(&config) {
        Ok(a) => a,
        Err(e) => {
            error!("failed to build TLS acceptor: {e}");
            std::process::exit(1);
        }
    };

    let ctx = Arc::new(HandlerContext {
        backend: MemoryBackend::new(),
        config: config.clone(),
        paged: Arc::new(PagedSearchManager::new(
            Duration::from_secs(config.paged_state_timeout_secs),
            config.paged_state_max_states,
        )),
        naming_contexts: config.naming_contexts.clone(),
    });

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    {
        let paged = ctx.paged.clone();
        let shutdown = shutdown.clone();
        let interval = paged.reap_interval();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => paged.reap_expired_now(),
                }
            }
        }));
    }

    {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        let config = config.clone();
        let acceptor = acceptor.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = listener::serve_plain(&config.plain_address, ctx, acceptor, shutdown).await {
                error!("plain listener stopped: {e}");
            }
        }));
    }

    if let Some(ldaps_address) = &config.ldaps_address {
        match &acceptor {
            Some(acceptor) => {
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                let ldaps_address = ldaps_address.clone();
                let acceptor = acceptor.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = listener::serve_ldaps(&ldaps_address, ctx, acceptor, shutdown).await {
                        error!("LDAPS listener stopped: {e}");
                    }
                }));
            }
            None => {
                error!("LDAPD_LDAPS_ADDRESS set but no TLS certificate/key configured; LDAPS disabled");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install signal handler: {e}");
    }
    info!("shutting down");
    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }
}
