//! Prometheus metrics for the certificate lifecycle

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Metric handles registered in a private registry
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    issuance: IntCounterVec,
    sni_fallback: IntCounterVec,
    renewal_checks: IntCounter,
    certificates: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let issuance = IntCounterVec::new(
            Opts::new("snicert_issuance_total", "Issuance attempts by outcome"),
            &["outcome"],
        )?;
        let sni_fallback = IntCounterVec::new(
            Opts::new(
                "snicert_sni_fallback_total",
                "Handshakes answered with the default certificate",
            ),
            &["reason"],
        )?;
        let renewal_checks =
            IntCounter::new("snicert_renewal_checks_total", "Renewal scans completed")?;
        let certificates = IntGauge::new("snicert_certificates", "Certificates in the record store")?;

        registry.register(Box::new(issuance.clone()))?;
        registry.register(Box::new(sni_fallback.clone()))?;
        registry.register(Box::new(renewal_checks.clone()))?;
        registry.register(Box::new(certificates.clone()))?;

        Ok(Self {
            registry,
            issuance,
            sni_fallback,
            renewal_checks,
            certificates,
        })
    }

    /// `outcome` is "success" or an [`IssuanceFailure`](crate::error::IssuanceFailure) kind
    pub fn record_issuance(&self, outcome: &str) {
        self.issuance.with_label_values(&[outcome]).inc();
    }

    pub fn record_sni_fallback(&self, reason: &str) {
        self.sni_fallback.with_label_values(&[reason]).inc();
    }

    pub fn record_renewal_check(&self) {
        self.renewal_checks.inc();
    }

    pub fn set_certificates(&self, count: usize) {
        self.certificates
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics.record_issuance("success");
        metrics.record_issuance("timeout");
        metrics.record_sni_fallback("not_found");
        metrics.record_renewal_check();
        metrics.set_certificates(3);

        let text = metrics.render();
        assert!(text.contains("snicert_issuance_total{outcome=\"success\"} 1"));
        assert!(text.contains("snicert_issuance_total{outcome=\"timeout\"} 1"));
        assert!(text.contains("snicert_sni_fallback_total{reason=\"not_found\"} 1"));
        assert!(text.contains("snicert_renewal_checks_total 1"));
        assert!(text.contains("snicert_certificates 3"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_renewal_check();
        assert!(b.render().contains("snicert_renewal_checks_total 0"));
    }
}
