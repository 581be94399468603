//! LAN peer discovery: sweep the local /24 for radio hosts.
//!
//! Every host address in the subnet (minus our own) gets a status probe,
//! bounded by a semaphore. "All" mode reports every hit; "first" mode
//! cancels the rest of the sweep as soon as one host answers.

use std::net::{Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

use super::wire::parse_probe;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONCURRENCY: usize = 50;

/// A discovered radio host.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub ip: Ipv4Addr,
    /// Raw `<title>` field of the host's status document.
    pub title: String,
    /// Raw `<location>` field, "0" when absent.
    pub location: String,
}

/// Local IPv4 of the interface that routes outward.
///
/// Connecting a UDP socket sends nothing but forces the OS to pick the
/// outbound interface, whose address we then read back.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()? {
        std::net::SocketAddr::V4(addr) => Some(*addr.ip()),
        _ => None,
    }
}

/// All host addresses of `ip`'s /24, excluding `ip` itself.
pub fn subnet_hosts(ip: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, _] = ip.octets();
    (1..=254u8)
        .map(|d| Ipv4Addr::new(a, b, c, d))
        .filter(|candidate| *candidate != ip)
        .collect()
}

pub struct PeerScanner {
    client: reqwest::Client,
    port: u16,
    timeout: Duration,
    concurrency: usize,
}

impl PeerScanner {
    pub fn new(port: u16) -> Self {
        Self::with_options(port, DEFAULT_TIMEOUT, DEFAULT_CONCURRENCY)
    }

    pub fn with_options(port: u16, timeout: Duration, concurrency: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            port,
            timeout,
            concurrency,
        }
    }

    async fn probe(
        client: reqwest::Client,
        ip: Ipv4Addr,
        port: u16,
        timeout: Duration,
    ) -> Option<PeerInfo> {
        let url = format!("http://{ip}:{port}/");
        let response = client.get(&url).timeout(timeout).send().await.ok()?;
        if response.status() != reqwest::StatusCode::OK {
            return None;
        }
        let body = response.text().await.ok()?;
        let (title, location) = parse_probe(&body)?;
        tracing::debug!(target: "radio::scanner", %ip, %title, "radio host found");
        Some(PeerInfo {
            ip,
            title,
            location,
        })
    }

    fn spawn_sweep(&self, targets: Vec<Ipv4Addr>) -> (JoinSet<()>, mpsc::Receiver<PeerInfo>) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, rx) = mpsc::channel(16);
        let mut tasks = JoinSet::new();

        for ip in targets {
            if ip == Ipv4Addr::UNSPECIFIED {
                continue;
            }
            let client = self.client.clone();
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let port = self.port;
            let timeout = self.timeout;
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                if let Some(info) = Self::probe(client, ip, port, timeout).await {
                    let _ = tx.send(info).await;
                }
            });
        }
        (tasks, rx)
    }

    /// Probe every target, invoking `callback` per hit; returns the full
    /// list once the sweep completes.
    ///
    /// The result channel closes once every probe task has finished, so
    /// draining it doubles as waiting for the sweep.
    pub async fn scan_all<F>(&self, targets: Vec<Ipv4Addr>, callback: F) -> Vec<PeerInfo>
    where
        F: Fn(&PeerInfo),
    {
        let (tasks, mut rx) = self.spawn_sweep(targets);
        let mut found = Vec::new();
        while let Some(info) = rx.recv().await {
            callback(&info);
            found.push(info);
        }
        drop(tasks);
        tracing::debug!(target: "radio::scanner", hits = found.len(), "sweep complete");
        found
    }

    /// Probe until the first hit, cancelling every outstanding probe.
    pub async fn scan_first(&self, targets: Vec<Ipv4Addr>) -> Option<PeerInfo> {
        let (mut tasks, mut rx) = self.spawn_sweep(targets);
        let info = rx.recv().await;
        tasks.abort_all();
        info
    }

    /// Sweep our own /24, the common entry point.
    pub async fn scan_local_all<F>(&self, callback: F) -> Vec<PeerInfo>
    where
        F: Fn(&PeerInfo),
    {
        let Some(ip) = local_ipv4() else {
            tracing::warn!(target: "radio::scanner", "no local IPv4, skipping sweep");
            return Vec::new();
        };
        self.scan_all(subnet_hosts(ip), callback).await
    }
}
