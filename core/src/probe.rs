//! Seams for every network-facing check.
//!
//! Implementations report failures as [`ProbeError`]; callers fold them into
//! record fields. [`within`] caps how long any single call may hold a slot.

use crate::error::ProbeError;
use crate::model::SystemFacts;
use async_trait::async_trait;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

#[async_trait]
pub trait NameResolver: Send + Sync {
    /// First IPv4 address for `name`.
    async fn resolve(&self, name: &str) -> Result<IpAddr, ProbeError>;
}

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// One connectivity test against a name (not an address).
    async fn check(&self, name: &str) -> Result<(), ProbeError>;
}

#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn check(&self, host: &str, port: u16) -> Result<(), ProbeError>;
}

#[async_trait]
pub trait ManagementProbe: Send + Sync {
    /// Lightweight session handshake.
    async fn identify(&self, host: &str) -> Result<(), ProbeError>;
    /// Structured system-information query.
    async fn inventory(&self, host: &str) -> Result<(), ProbeError>;
    /// Install date and last boot time.
    async fn system_facts(&self, host: &str) -> Result<SystemFacts, ProbeError>;
}

#[async_trait]
pub trait ShareProbe: Send + Sync {
    async fn check(&self, host: &str) -> Result<(), ProbeError>;
}

/// Await `fut` for at most `limit`; expiry becomes [`ProbeError::TimedOut`].
pub async fn within<T, F>(probe: &'static str, limit: Duration, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(ProbeError::timed_out(probe, limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn within_cuts_off_a_hung_call() {
        let started = Instant::now();
        let res: Result<(), _> = within("hang", Duration::from_millis(50), std::future::pending()).await;
        assert_eq!(res, Err(ProbeError::timed_out("hang", Duration::from_millis(50))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn within_passes_through_results() {
        let ok = within("fast", Duration::from_secs(1), async { Ok::<_, ProbeError>(7) }).await;
        assert_eq!(ok, Ok(7));
        let err = within("fast", Duration::from_secs(1), async {
            Err::<(), _>(ProbeError::Reachability("web1".into()))
        })
        .await;
        assert_eq!(err, Err(ProbeError::Reachability("web1".into())));
    }
}
