use crate::server::ProxyService;
use anyhow::Context;
use http::Uri;
use hyper::server::accept;
use hyper::service::make_service_fn;
use praefect_base::{Config, StorageName, VirtualStorageName};
use praefect_queue::ReplicationQueue;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UnixListener};
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tokio_util::sync::CancellationToken;

/// Runs the proxy (§4.G), the replication workers (§4.H), the
/// periodic reconciler (§4.I), the health monitor (§4.B), and the
/// stale-lock sweeper (§4.D) until a shutdown signal arrives.
pub async fn serve(config: Config, pool: sqlx::PgPool) -> anyhow::Result<()> {
    let topology = crate::wiring::build(&config, pool).await?;
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            tracing::info!("shutdown signal received");
            cancel.cancel();
        }
    });

    tokio::spawn({
        let monitor = topology.monitor.clone();
        let probe = topology.probe.clone();
        let cancel = cancel.clone();
        async move { monitor.run(probe, cancel.cancelled_owned()).await }
    });

    tokio::spawn({
        let sweeper = topology.sweeper;
        let cancel = cancel.clone();
        async move { sweeper.run(cancel.cancelled_owned(), crate::clock::now_ms).await }
    });

    for worker in topology.workers {
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel.cancelled_owned(), crate::clock::now_ms).await });
    }
    for reconciler in topology.reconcilers {
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(cancel.cancelled_owned(), crate::clock::now_ms).await });
    }

    let service = ProxyService::new(topology.coordinator, config.auth_token.clone());
    let mut listeners = Vec::new();

    if let Some(addr) = &config.listen.tcp {
        listeners.push(tokio::spawn(serve_tcp(addr.clone(), service.clone(), cancel.clone())));
    }
    if let Some(tls) = &config.listen.tls {
        listeners.push(tokio::spawn(serve_tls(tls.clone(), service.clone(), cancel.clone())));
    }
    if let Some(path) = &config.listen.unix {
        listeners.push(tokio::spawn(serve_unix(path.clone(), service.clone(), cancel.clone())));
    }

    for listener in listeners {
        listener.await??;
    }
    Ok(())
}

async fn serve_tcp(addr: String, service: ProxyService, cancel: CancellationToken) -> anyhow::Result<()> {
    let addr = addr.parse().with_context(|| format!("parsing tcp listen address '{addr}'"))?;
    let make_svc = make_service_fn(move |_conn| {
        let service = service.clone();
        async move { Ok::<_, Infallible>(service) }
    });
    tracing::info!(%addr, "listening (tcp)");
    hyper::Server::bind(&addr).serve(make_svc).with_graceful_shutdown(cancel.cancelled_owned()).await?;
    Ok(())
}

async fn serve_unix(path: String, service: ProxyService, cancel: CancellationToken) -> anyhow::Result<()> {
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).with_context(|| format!("binding unix socket '{path}'"))?;
    let incoming = accept::from_stream(UnixListenerStream::new(listener));
    let make_svc = make_service_fn(move |_conn| {
        let service = service.clone();
        async move { Ok::<_, Infallible>(service) }
    });
    tracing::info!(%path, "listening (unix)");
    hyper::Server::builder(incoming).serve(make_svc).with_graceful_shutdown(cancel.cancelled_owned()).await?;
    Ok(())
}

async fn serve_tls(tls: praefect_base::TlsListen, service: ProxyService, cancel: CancellationToken) -> anyhow::Result<()> {
    let certs = load_certs(&tls.cert_path)?;
    let key = load_key(&tls.key_path)?;
    let server_config = rustls::ServerConfig::builder().with_no_client_auth().with_single_cert(certs, key)?;
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));

    let addr: std::net::SocketAddr =
        tls.address.parse().with_context(|| format!("parsing tls listen address '{}'", tls.address))?;
    let listener = TcpListener::bind(addr).await?;
    let incoming = accept::from_stream(async_stream_tls(TcpListenerStream::new(listener), acceptor));
    let make_svc = make_service_fn(move |_conn| {
        let service = service.clone();
        async move { Ok::<_, Infallible>(service) }
    });
    tracing::info!(%addr, "listening (tls)");
    hyper::Server::builder(incoming).serve(make_svc).with_graceful_shutdown(cancel.cancelled_owned()).await?;
    Ok(())
}

fn async_stream_tls(
    incoming: TcpListenerStream,
    acceptor: tokio_rustls::TlsAcceptor,
) -> impl futures::Stream<Item = std::io::Result<tokio_rustls::server::TlsStream<tokio::net::TcpStream>>> {
    use futures::StreamExt;
    incoming.then(move |conn| {
        let acceptor = acceptor.clone();
        async move {
            let tcp = conn?;
            acceptor.accept(tcp).await
        }
    })
}

fn load_certs(path: &str) -> anyhow::Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening cert file '{path}'"))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>().context("parsing certificate PEM")
}

fn load_key(path: &str) -> anyhow::Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening key file '{path}'"))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .context("parsing private key PEM")?
        .context("no private key found in key file")
}

/// A one-shot scan-and-enqueue pass (§4.I), useful for operators who
/// run reconciliation out-of-band from `serve`'s background loop.
pub async fn reconcile(config: Config, pool: sqlx::PgPool) -> anyhow::Result<()> {
    let topology = crate::wiring::build(&config, pool).await?;
    let mut total = 0;
    for reconciler in &topology.reconcilers {
        let enqueued = reconciler.reconcile_once(crate::clock::now_ms()).await?;
        total += enqueued.len();
    }
    tracing::info!(jobs_enqueued = total, "reconciliation pass complete");
    Ok(())
}

/// Prints the repositories that are behind `reference` within
/// `virtual_storage`, per `GetOutdatedRepositories` (SPEC_FULL.md
/// supplemental feature 2).
pub async fn status(pool: sqlx::PgPool, virtual_storage: String, reference: String) -> anyhow::Result<()> {
    let queue = praefect_queue::PgQueue::new(pool);
    let outdated = queue
        .get_outdated_repositories(&VirtualStorageName(virtual_storage), &StorageName(reference))
        .await?;

    if outdated.is_empty() {
        println!("no outdated repositories");
        return Ok(());
    }
    for (repo, targets) in outdated {
        let mut targets: Vec<_> = targets.into_iter().map(|s| s.0).collect();
        targets.sort();
        println!("{}: behind on [{}]", repo.relative_path.0, targets.join(", "));
    }
    Ok(())
}

/// Dials every configured node and reports whether it's reachable,
/// mirroring `subcmd_pingnodes.go`'s operator-facing connectivity
/// check.
pub async fn dial_nodes(config: Config) -> anyhow::Result<()> {
    for vs in &config.virtual_storages {
        for node in &vs.nodes {
            let uri: Uri = node.address.parse().with_context(|| format!("parsing address '{}'", node.address))?;
            let result = tokio::time::timeout(Duration::from_secs(5), tonic::transport::Channel::builder(uri).connect()).await;
            match result {
                Ok(Ok(_)) => println!("{}/{}: reachable", vs.name, node.storage),
                Ok(Err(err)) => println!("{}/{}: unreachable ({err})", vs.name, node.storage),
                Err(_) => println!("{}/{}: timed out", vs.name, node.storage),
            }
        }
    }
    Ok(())
}
