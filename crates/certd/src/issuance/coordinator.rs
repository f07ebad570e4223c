//! Per-domain issuance serialization
//!
//! Each domain has at most one issuance attempt in flight. The attempt runs
//! on its own task and publishes its outcome through a watch channel; every
//! caller that asked for the same domain meanwhile waits on that channel and
//! receives the identical result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use snicert_common::DomainName;

use super::provider::{AccountKey, IssuanceProvider};
use crate::error::{IssuanceError, IssuanceFailure, StoreError};
use crate::material::CertificateMaterial;
use crate::metrics::Metrics;
use crate::store::{CertificateRecord, RecordStore};

/// Default bound on one attempt
pub const DEFAULT_ISSUANCE_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest accepted bound on one attempt
pub const MAX_ISSUANCE_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

/// Terminal result of one attempt, shared by all of its waiters
pub type IssuanceOutcome = Result<Arc<CertificateRecord>, IssuanceError>;

type OutcomeSlot = Option<IssuanceOutcome>;

/// In-flight attempt for one domain
struct IssuanceTicket {
    id: u64,
    started_at: Instant,
    email: String,
    result: watch::Receiver<OutcomeSlot>,
}

/// Snapshot of an in-flight attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub email: String,
    pub elapsed: Duration,
}

type TicketTable = Arc<Mutex<HashMap<DomainName, IssuanceTicket>>>;

/// Removes the ticket when the attempt's task ends, including by panic
struct TicketGuard {
    tickets: TicketTable,
    domain: DomainName,
    id: u64,
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        let mut tickets = self.tickets.lock();
        if tickets.get(&self.domain).is_some_and(|t| t.id == self.id) {
            tickets.remove(&self.domain);
        }
    }
}

/// Drives issuance and renewal through an [`IssuanceProvider`]
pub struct IssuanceCoordinator<P: IssuanceProvider> {
    provider: Arc<P>,
    store: Arc<dyn RecordStore>,
    tickets: TicketTable,
    next_id: Arc<AtomicU64>,
    timeout: Duration,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    metrics: Option<Arc<Metrics>>,
}

impl<P: IssuanceProvider> Clone for IssuanceCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            tickets: Arc::clone(&self.tickets),
            next_id: Arc::clone(&self.next_id),
            timeout: self.timeout,
            shutdown: self.shutdown.clone(),
            tasks: self.tasks.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<P: IssuanceProvider> IssuanceCoordinator<P> {
    pub fn new(provider: P, store: Arc<dyn RecordStore>) -> Self {
        Self {
            provider: Arc::new(provider),
            store,
            tickets: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            timeout: DEFAULT_ISSUANCE_TIMEOUT,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            metrics: None,
        }
    }

    /// Overall bound on one attempt, store write included
    ///
    /// Capped at [`MAX_ISSUANCE_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.min(MAX_ISSUANCE_TIMEOUT);
        self
    }

    /// Token whose cancellation aborts provider work
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Issue or renew the certificate for `domain`
    ///
    /// If an attempt for `domain` is already running, waits for it and
    /// returns its outcome; `email` is then ignored. Dropping the returned
    /// future does not cancel the attempt.
    pub async fn issue(&self, domain: DomainName, email: &str) -> IssuanceOutcome {
        let mut result = self.join_or_start(&domain, email);

        let outcome = match result.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(IssuanceError::new(domain, IssuanceFailure::Abandoned)))
    }

    /// The attempt currently running for `domain`, if any
    pub fn in_flight(&self, domain: &DomainName) -> Option<InFlight> {
        self.tickets.lock().get(domain).map(|ticket| InFlight {
            email: ticket.email.clone(),
            elapsed: ticket.started_at.elapsed(),
        })
    }

    pub fn in_flight_count(&self) -> usize {
        self.tickets.lock().len()
    }

    /// Cancel provider work of every running attempt
    ///
    /// Writes already started are allowed to finish. New calls to
    /// [`issue`](Self::issue) fail with `Cancelled`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for running attempts to end, up to `grace`
    ///
    /// Returns `false` if attempts were still running when the grace period
    /// expired.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        self.tasks.close();
        let drained = tokio::time::timeout(grace, self.tasks.wait()).await.is_ok();
        self.tasks.reopen();
        if !drained {
            warn!(
                in_flight = self.in_flight_count(),
                "Issuance attempts still running after grace period"
            );
        }
        drained
    }

    fn join_or_start(&self, domain: &DomainName, email: &str) -> watch::Receiver<OutcomeSlot> {
        let mut tickets = self.tickets.lock();

        if let Some(ticket) = tickets.get(domain) {
            debug!(
                domain = %domain,
                ticket = ticket.id,
                "Joining in-flight issuance"
            );
            return ticket.result.clone();
        }

        if self.shutdown.is_cancelled() {
            let (_, rx) = watch::channel(Some(Err(IssuanceError::new(
                domain.clone(),
                IssuanceFailure::Cancelled,
            ))));
            return rx;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        tickets.insert(
            domain.clone(),
            IssuanceTicket {
                id,
                started_at: Instant::now(),
                email: email.to_string(),
                result: rx.clone(),
            },
        );
        drop(tickets);

        let guard = TicketGuard {
            tickets: Arc::clone(&self.tickets),
            domain: domain.clone(),
            id,
        };
        let this = self.clone();
        let domain = domain.clone();
        let email = email.to_string();

        self.tasks.spawn(async move {
            let outcome = this.attempt(&domain, &email).await;
            // Release before publishing so a waiter that retries starts fresh.
            drop(guard);
            let _ = tx.send(Some(outcome));
        });

        rx
    }

    async fn attempt(&self, domain: &DomainName, email: &str) -> IssuanceOutcome {
        let started = Instant::now();
        info!(domain = %domain, email = %email, "Starting certificate issuance");

        match self.run_attempt(domain, email, started + self.timeout).await {
            Ok(record) => {
                info!(
                    domain = %domain,
                    not_after = %record.not_after(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Certificate issued"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_issuance("success");
                    if let Ok(count) = self.store.len() {
                        metrics.set_certificates(count);
                    }
                }
                Ok(record)
            }
            Err(cause) => {
                warn!(
                    domain = %domain,
                    error = %cause,
                    kind = cause.kind(),
                    "Certificate issuance failed, keeping existing certificate"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_issuance(cause.kind());
                }
                Err(IssuanceError::new(domain.clone(), cause))
            }
        }
    }

    async fn run_attempt(
        &self,
        domain: &DomainName,
        email: &str,
        deadline: Instant,
    ) -> Result<Arc<CertificateRecord>, IssuanceFailure> {
        let provider_work = async {
            let key = AccountKey::generate()?;
            let account = self.provider.register(email, key).await?;
            let issued = self.provider.obtain_certificate(&account, domain).await?;
            Ok::<_, IssuanceFailure>(issued)
        };

        let issued = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(IssuanceFailure::Cancelled),
            result = tokio::time::timeout_at(deadline, provider_work) => match result {
                Ok(issued) => issued?,
                Err(_) => return Err(IssuanceFailure::Timeout(self.timeout)),
            },
        };

        let material =
            CertificateMaterial::new(issued.certificate_chain_pem, issued.private_key_pem);
        let record = CertificateRecord::new(domain.clone(), email, material)?;

        // Last point at which the attempt may be abandoned; the write below
        // always runs to completion.
        if Instant::now() >= deadline {
            return Err(IssuanceFailure::Timeout(self.timeout));
        }
        if self.shutdown.is_cancelled() {
            return Err(IssuanceFailure::Cancelled);
        }

        let store = Arc::clone(&self.store);
        let written = tokio::task::spawn_blocking(move || store.put(record))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store write task failed: {e}")))??;
        Ok(written)
    }
}

impl<P: IssuanceProvider> std::fmt::Debug for IssuanceCoordinator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuanceCoordinator")
            .field("timeout", &self.timeout)
            .field("in_flight", &self.in_flight_count())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::provider::{IssuedCertificate, ProviderError};
    use crate::store::testing::material_for;
    use crate::store::MemoryRecordStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Provider that blocks until released and counts orders
    #[derive(Default)]
    struct GatedProvider {
        orders: AtomicUsize,
        gate: Notify,
        fail: bool,
    }

    #[async_trait]
    impl IssuanceProvider for Arc<GatedProvider> {
        type Account = String;

        async fn register(&self, email: &str, _key: AccountKey) -> Result<String, ProviderError> {
            Ok(email.to_string())
        }

        async fn obtain_certificate(
            &self,
            _account: &String,
            domain: &DomainName,
        ) -> Result<IssuedCertificate, ProviderError> {
            self.orders.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            if self.fail {
                return Err(ProviderError::Validation("challenge failed".into()));
            }
            let material = material_for(domain.as_str(), 90);
            Ok(IssuedCertificate {
                certificate_chain_pem: material.certificate_pem,
                private_key_pem: material.private_key_pem,
            })
        }
    }

    fn domain(name: &str) -> DomainName {
        DomainName::parse(name).unwrap()
    }

    async fn wait_for_orders(provider: &GatedProvider, n: usize) {
        while provider.orders.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_attempt() {
        let provider = Arc::new(GatedProvider::default());
        let store = Arc::new(MemoryRecordStore::new());
        let coordinator = IssuanceCoordinator::new(Arc::clone(&provider), store.clone());

        let first = tokio::spawn({
            let c = coordinator.clone();
            async move { c.issue(domain("example.test"), "e1@b.test").await }
        });
        wait_for_orders(&provider, 1).await;

        // First poll registers the second caller on the running ticket.
        let second = coordinator.issue(domain("example.test"), "e2@b.test");
        tokio::pin!(second);
        assert!(futures::poll!(second.as_mut()).is_pending());

        let in_flight = coordinator.in_flight(&domain("example.test")).unwrap();
        assert_eq!(in_flight.email, "e1@b.test");

        provider.gate.notify_one();
        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.email(), "e1@b.test");
        assert_eq!(provider.orders.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_different_domains_run_in_parallel() {
        let provider = Arc::new(GatedProvider::default());
        let coordinator =
            IssuanceCoordinator::new(Arc::clone(&provider), Arc::new(MemoryRecordStore::new()));

        let a = tokio::spawn({
            let c = coordinator.clone();
            async move { c.issue(domain("a.test"), "a@b.test").await }
        });
        let b = tokio::spawn({
            let c = coordinator.clone();
            async move { c.issue(domain("b.test"), "a@b.test").await }
        });

        wait_for_orders(&provider, 2).await;
        assert_eq!(coordinator.in_flight_count(), 2);

        provider.gate.notify_waiters();
        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_failure_leaves_store_untouched() {
        let provider = Arc::new(GatedProvider {
            fail: true,
            ..Default::default()
        });
        let store = Arc::new(MemoryRecordStore::new());
        let existing = store
            .put(
                CertificateRecord::new(domain("example.test"), "old@b.test", material_for("example.test", 5))
                    .unwrap(),
            )
            .unwrap();
        let coordinator = IssuanceCoordinator::new(Arc::clone(&provider), store.clone());

        let task = tokio::spawn({
            let c = coordinator.clone();
            async move { c.issue(domain("example.test"), "new@b.test").await }
        });
        wait_for_orders(&provider, 1).await;
        provider.gate.notify_one();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.cause, IssuanceFailure::ValidationFailed("challenge failed".into()));

        let current = store.get(&domain("example.test")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&current, &existing));
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_ticket() {
        let provider = Arc::new(GatedProvider::default());
        let coordinator =
            IssuanceCoordinator::new(Arc::clone(&provider), Arc::new(MemoryRecordStore::new()))
                .with_timeout(Duration::from_secs(30));

        let err = coordinator
            .issue(domain("slow.test"), "a@b.test")
            .await
            .unwrap_err();
        assert_eq!(err.cause, IssuanceFailure::Timeout(Duration::from_secs(30)));
        assert!(coordinator.in_flight(&domain("slow.test")).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_provider_work() {
        let provider = Arc::new(GatedProvider::default());
        let coordinator =
            IssuanceCoordinator::new(Arc::clone(&provider), Arc::new(MemoryRecordStore::new()));

        let task = tokio::spawn({
            let c = coordinator.clone();
            async move { c.issue(domain("example.test"), "a@b.test").await }
        });
        wait_for_orders(&provider, 1).await;

        coordinator.shutdown();
        assert!(coordinator.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(task.await.unwrap().unwrap_err().cause, IssuanceFailure::Cancelled);

        let late = coordinator.issue(domain("late.test"), "a@b.test").await;
        assert_eq!(late.unwrap_err().cause, IssuanceFailure::Cancelled);
        assert_eq!(provider.orders.load(Ordering::SeqCst), 1);
    }

    /// Store whose writes always fail
    #[derive(Debug, Default)]
    struct ReadOnlyStore {
        inner: MemoryRecordStore,
    }

    impl RecordStore for ReadOnlyStore {
        fn get(&self, domain: &DomainName) -> Result<Option<Arc<CertificateRecord>>, StoreError> {
            self.inner.get(domain)
        }

        fn put(&self, _record: CertificateRecord) -> Result<Arc<CertificateRecord>, StoreError> {
            Err(StoreError::Unavailable("read-only file system".to_string()))
        }

        fn list_all(&self) -> Result<Vec<Arc<CertificateRecord>>, StoreError> {
            self.inner.list_all()
        }
    }

    #[tokio::test]
    async fn test_store_failure_keeps_previous_record() {
        let provider = Arc::new(GatedProvider::default());
        let store = Arc::new(ReadOnlyStore::default());
        let existing = store
            .inner
            .put(
                CertificateRecord::new(domain("example.test"), "old@b.test", material_for("example.test", 5))
                    .unwrap(),
            )
            .unwrap();
        let coordinator = IssuanceCoordinator::new(Arc::clone(&provider), store.clone());

        let task = tokio::spawn({
            let c = coordinator.clone();
            async move { c.issue(domain("example.test"), "new@b.test").await }
        });
        wait_for_orders(&provider, 1).await;
        provider.gate.notify_one();

        let err = task.await.unwrap().unwrap_err();
        assert!(
            matches!(err.cause, IssuanceFailure::Store(StoreError::Unavailable(_))),
            "{err:?}"
        );
        assert_eq!(coordinator.in_flight_count(), 0);

        let current = store.get(&domain("example.test")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&current, &existing));
        assert_eq!(current.email(), "old@b.test");
    }

    #[tokio::test]
    async fn test_oversized_timeout_is_capped() {
        let provider = Arc::new(GatedProvider::default());
        let coordinator =
            IssuanceCoordinator::new(Arc::clone(&provider), Arc::new(MemoryRecordStore::new()))
                .with_timeout(Duration::MAX);
        assert_eq!(coordinator.timeout(), MAX_ISSUANCE_TIMEOUT);

        let task = tokio::spawn({
            let c = coordinator.clone();
            async move { c.issue(domain("example.test"), "a@b.test").await }
        });
        wait_for_orders(&provider, 1).await;
        provider.gate.notify_one();

        let record = task.await.unwrap().unwrap();
        assert_eq!(record.domain().as_str(), "example.test");
    }
}
