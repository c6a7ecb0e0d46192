use async_trait::async_trait;
use fleetprobe_core::probe::ShareProbe;
use fleetprobe_core::ProbeError;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADMIN_SHARE: &str = "admin$";

/// Checks that `\\host\share` exists. Only Windows can open UNC paths.
#[derive(Debug, Clone)]
pub struct UncShare {
    pub share: String,
    pub timeout: Duration,
}

impl UncShare {
    pub fn new(share: &str, timeout: Duration) -> Self {
        UncShare { share: share.to_string(), timeout }
    }

    pub fn path(&self, host: &str) -> PathBuf {
        PathBuf::from(format!(r"\\{}\{}", host, self.share))
    }

    #[cfg(windows)]
    async fn probe_path(&self, host: &str) -> Result<(), ProbeError> {
        let path = self.path(host);
        match tokio::time::timeout(self.timeout, tokio::fs::try_exists(&path)).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(ProbeError::ShareUnavailable(path.display().to_string())),
            Ok(Err(e)) => Err(ProbeError::ShareUnavailable(format!("{}: {}", path.display(), e))),
            Err(_) => Err(ProbeError::timed_out("admin share", self.timeout)),
        }
    }

    #[cfg(not(windows))]
    async fn probe_path(&self, host: &str) -> Result<(), ProbeError> {
        Err(ProbeError::ShareUnavailable(format!(
            "{} (UNC paths need a Windows scanner)",
            self.path(host).display()
        )))
    }
}

#[async_trait]
impl ShareProbe for UncShare {
    async fn check(&self, host: &str) -> Result<(), ProbeError> {
        self.probe_path(host).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unc_path_shape() {
        let s = UncShare::new(DEFAULT_ADMIN_SHARE, Duration::from_secs(1));
        assert_eq!(s.path("db1").to_string_lossy(), r"\\db1\admin$");
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn unsupported_platform_reports_unavailable() {
        let s = UncShare::new(DEFAULT_ADMIN_SHARE, Duration::from_secs(1));
        assert!(matches!(s.check("db1").await, Err(ProbeError::ShareUnavailable(_))));
    }
}
