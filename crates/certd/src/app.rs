//! Application wiring
//!
//! Every component receives its collaborators explicitly; there is no
//! process-wide state.

use std::sync::Arc;

use anyhow::{Context, Result};
use hyper::body::Incoming;
use hyper::Request;
use rustls::server::ResolvesServerCert;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use snicert_config::Config;

use crate::acme::{serve_http01, AcmeProvider, ChallengeManager};
use crate::default_cert::DefaultCertificate;
use crate::issuance::{IssuanceCoordinator, IssuanceProvider};
use crate::metrics::Metrics;
use crate::resolver::SniResolver;
use crate::scheduler::RenewalScheduler;
use crate::server::{serve_tls, tls_server_config, AdminApi};
use crate::store::{FileRecordStore, RecordStore};

/// A fully wired certificate service
pub struct App<P: IssuanceProvider> {
    config: Config,
    store: Arc<dyn RecordStore>,
    default_certificate: Arc<DefaultCertificate>,
    resolver: Arc<SniResolver>,
    coordinator: IssuanceCoordinator<P>,
    scheduler: Arc<RenewalScheduler<P>>,
    admin: Arc<AdminApi<P>>,
    challenges: ChallengeManager,
    metrics: Arc<Metrics>,
}

impl App<AcmeProvider> {
    /// Build the production service: file-backed store and ACME issuance
    ///
    /// Fails if the record store cannot be opened.
    pub fn build(config: Config) -> Result<Self> {
        let store = FileRecordStore::open(&config.storage.path).with_context(|| {
            format!(
                "Failed to open certificate store at {}",
                config.storage.path.display()
            )
        })?;
        let challenges = ChallengeManager::new();
        let provider = AcmeProvider::new(&config.acme, challenges.clone());

        info!(directory = %provider.directory_url(), "Using ACME directory");
        Self::with_parts(config, Arc::new(store), provider, challenges)
    }
}

impl<P: IssuanceProvider> App<P> {
    /// Wire the service around an explicit store and provider
    pub fn with_parts(
        config: Config,
        store: Arc<dyn RecordStore>,
        provider: P,
        challenges: ChallengeManager,
    ) -> Result<Self> {
        let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
        metrics.set_certificates(store.len().context("Failed to count stored certificates")?);

        let default_certificate = Arc::new(
            DefaultCertificate::generate(&config.default_certificate)
                .context("Failed to generate default certificate")?,
        );

        let resolver = Arc::new(
            SniResolver::new(Arc::clone(&store), Arc::clone(&default_certificate))
                .with_metrics(Arc::clone(&metrics)),
        );

        let coordinator = IssuanceCoordinator::new(provider, Arc::clone(&store))
            .with_timeout(config.renewal.issuance_timeout())
            .with_metrics(Arc::clone(&metrics));

        let scheduler = Arc::new(
            RenewalScheduler::new(coordinator.clone(), &config.renewal)
                .with_metrics(Arc::clone(&metrics)),
        );

        let admin = Arc::new(
            AdminApi::new(coordinator.clone(), config.server.max_request_body_bytes)
                .with_metrics(Arc::clone(&metrics)),
        );

        Ok(Self {
            config,
            store,
            default_certificate,
            resolver,
            coordinator,
            scheduler,
            admin,
            challenges,
            metrics,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn default_certificate(&self) -> &Arc<DefaultCertificate> {
        &self.default_certificate
    }

    pub fn resolver(&self) -> &Arc<SniResolver> {
        &self.resolver
    }

    pub fn coordinator(&self) -> &IssuanceCoordinator<P> {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &Arc<RenewalScheduler<P>> {
        &self.scheduler
    }

    pub fn admin(&self) -> &Arc<AdminApi<P>> {
        &self.admin
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Bind the configured listeners and serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let https_addr = self.config.server.listen_addr()?;
        let https = TcpListener::bind(https_addr)
            .await
            .with_context(|| format!("Failed to bind HTTPS listener on {https_addr}"))?;

        let challenge_addr = self.config.acme.challenge_addr()?;
        let challenge = TcpListener::bind(challenge_addr)
            .await
            .with_context(|| format!("Failed to bind challenge listener on {challenge_addr}"))?;

        self.run_with_listeners(https, Some(challenge), shutdown).await
    }

    /// Serve on already-bound listeners
    ///
    /// Without a challenge listener, HTTP-01 validation must be answered
    /// elsewhere.
    pub async fn run_with_listeners(
        self,
        https: TcpListener,
        challenge: Option<TcpListener>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let grace = self.config.server.shutdown_grace();

        let resolver: Arc<dyn ResolvesServerCert> = self.resolver.clone();
        let tls = tls_server_config(resolver, self.config.server.min_tls_version)
            .context("Failed to build TLS configuration")?;
        let acceptor = TlsAcceptor::from(Arc::new(tls));

        let admin = Arc::clone(&self.admin);
        let handler = move |req: Request<Incoming>| {
            let admin = Arc::clone(&admin);
            async move { admin.handle(req).await }
        };
        let https_task = tokio::spawn(serve_tls(
            https,
            acceptor,
            handler,
            shutdown.child_token(),
            grace,
        ));

        let challenge_task = challenge.map(|listener| {
            tokio::spawn(serve_http01(
                listener,
                self.challenges.clone(),
                shutdown.child_token(),
            ))
        });

        let scheduler = Arc::clone(&self.scheduler);
        let scheduler_shutdown = shutdown.child_token();
        let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

        info!(
            certificates = self.store.len().unwrap_or(0),
            "snicert started"
        );

        shutdown.cancelled().await;
        info!("Shutdown requested, draining");

        self.coordinator.shutdown();
        if !self.coordinator.wait_idle(grace).await {
            warn!("Exiting with issuance attempts still running");
        }

        if let Err(e) = scheduler_task.await {
            warn!(error = %e, "Renewal scheduler task failed");
        }
        if let Err(e) = https_task.await {
            warn!(error = %e, "HTTPS listener task failed");
        }
        if let Some(task) = challenge_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Challenge listener task failed");
            }
        }

        info!("snicert stopped");
        Ok(())
    }
}

impl<P: IssuanceProvider> std::fmt::Debug for App<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("listen", &self.config.server.listen)
            .field("store", &self.store)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
