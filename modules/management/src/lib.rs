//! Remote-management probes: WS-Management handshake and CIM queries, plus the
//! administrative share check.

pub mod share;
pub mod wsman;

use anyhow::Result;
use async_trait::async_trait;
use fleetprobe_core::probe::ManagementProbe;
use fleetprobe_core::settings::MANAGEMENT_PORT;
use fleetprobe_core::{ProbeError, SystemFacts};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{trace, warn};
use url::Url;

pub use share::UncShare;

const INVENTORY_CLASS: &str = "Win32_ComputerSystem";
const OS_CLASS: &str = "Win32_OperatingSystem";

/// Connection settings for the WS-Management listener.
///
/// Credentials are sent as HTTP Basic only. A default WinRM listener refuses Basic
/// (and refuses any unencrypted auth over plain HTTP), so deep inventory and system
/// facts need `https` plus a listener with Basic enabled; otherwise `WMI` stays false
/// and the dates read `retrieval-failed`. The unauthenticated Identify handshake is
/// unaffected.
#[derive(Debug, Clone)]
pub struct ManagementOptions {
    pub port: u16,
    pub https: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl Default for ManagementOptions {
    fn default() -> Self {
        ManagementOptions {
            port: MANAGEMENT_PORT,
            https: false,
            username: None,
            password: None,
            timeout: fleetprobe_core::settings::DEFAULT_MANAGEMENT_TIMEOUT,
        }
    }
}

impl ManagementOptions {
    /// Credentials are set but would travel as Basic over plain HTTP, which a
    /// default listener refuses.
    pub fn basic_over_http(&self) -> bool {
        self.username.is_some() && !self.https
    }
}

/// WS-Management client shared by every enrichment worker.
#[derive(Debug, Clone)]
pub struct WsManClient {
    client: Client,
    opts: ManagementOptions,
}

impl WsManClient {
    pub fn new(opts: ManagementOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(opts.timeout)
            .connect_timeout(opts.timeout)
            .user_agent(format!("fleetprobe/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        if opts.basic_over_http() {
            warn!(port = opts.port, "management credentials use HTTP Basic over plain HTTP; default WinRM listeners refuse this");
        }
        Ok(WsManClient { client, opts })
    }

    pub fn endpoint(&self, host: &str) -> Result<Url> {
        let scheme = if self.opts.https { "https" } else { "http" };
        Ok(Url::parse(&format!("{}://{}:{}/wsman", scheme, host, self.opts.port))?)
    }

    async fn post(&self, url: Url, body: String, authenticated: bool) -> Result<(StatusCode, String), reqwest::Error> {
        let mut req = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, wsman::CONTENT_TYPE)
            .body(body);
        if authenticated {
            if let Some(user) = &self.opts.username {
                req = req.basic_auth(user, self.opts.password.as_deref());
            }
        }
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        Ok((status, text))
    }

    /// `Get` a cimv2 class and return the response body on HTTP success.
    async fn get_class(&self, host: &str, class: &str) -> Result<String, String> {
        let url = self.endpoint(host).map_err(|e| e.to_string())?;
        let message_id = uuid::Uuid::new_v4().to_string();
        let envelope = wsman::get_envelope(url.as_str(), class, &message_id, self.opts.timeout);
        let (status, body) = self.post(url, envelope, true).await.map_err(|e| e.to_string())?;
        trace!(host, class, %status, "wsman get");
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }
        if !body.contains(class) {
            return Err(format!("response lacks {}", class));
        }
        Ok(body)
    }
}

/// Read install date and last boot time from a `Win32_OperatingSystem` body.
pub fn parse_system_facts(body: &str) -> Result<SystemFacts, ProbeError> {
    let field = |name: &str| {
        let raw = wsman::element_text(body, name)
            .ok_or_else(|| ProbeError::ExtendedFacts(format!("{} missing", name)))?;
        wsman::parse_cim_datetime(&raw).map_err(|e| ProbeError::ExtendedFacts(e.to_string()))
    };
    let install = field("InstallDate")?;
    let last_boot = field("LastBootUpTime")?;
    Ok(SystemFacts { install_date: install.date(), last_boot })
}

#[async_trait]
impl ManagementProbe for WsManClient {
    async fn identify(&self, host: &str) -> Result<(), ProbeError> {
        let url = self.endpoint(host).map_err(|e| ProbeError::ManagementUnavailable(e.to_string()))?;
        let (status, body) = self
            .post(url, wsman::identify_envelope(), false)
            .await
            .map_err(|e| ProbeError::ManagementUnavailable(e.to_string()))?;
        if status.is_success() && wsman::is_identify_response(&body) {
            Ok(())
        } else {
            Err(ProbeError::ManagementUnavailable(format!("identify answered HTTP {}", status)))
        }
    }

    async fn inventory(&self, host: &str) -> Result<(), ProbeError> {
        self.get_class(host, INVENTORY_CLASS).await.map(|_| ()).map_err(ProbeError::DeepQuery)
    }

    async fn system_facts(&self, host: &str) -> Result<SystemFacts, ProbeError> {
        let body = self.get_class(host, OS_CLASS).await.map_err(ProbeError::ExtendedFacts)?;
        parse_system_facts(&body)
    }
}
