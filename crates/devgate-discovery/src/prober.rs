//! Network probes used by the scanner.
//!
//! [`Prober`] is the seam between the scan loop and the network. The scanner
//! only ever sees reachability, open ports and banners, so tests can drive a
//! full scan with a scripted prober.

use std::future::Future;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use devgate_core::constants::MAX_BANNER_BYTES;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::arp;
use crate::error::{DiscoveryError, Result};
use crate::model::PortInfo;
use crate::scanner::DiscoveryConfig;

/// Ports answered with an HTTP request when grabbing a banner.
const HTTP_PORTS: &[u16] = &[80, 8000, 8080, 8088];

const HTTP_PROBE: &[u8] = b"HEAD / HTTP/1.0\r\n\r\n";

/// Ports asked for ONVIF device information.
const ONVIF_PORTS: &[u16] = &[80, 554, 8000, 8080];

const ONVIF_SERVICE_PATH: &str = "/onvif/device_service";

const MAX_ONVIF_RESPONSE_BYTES: usize = 8192;

const GET_DEVICE_INFORMATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\">\
<s:Body><tds:GetDeviceInformation xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\"/></s:Body>\
</s:Envelope>";

pub trait Prober: Send + Sync + 'static {
    /// Fails when the local host cannot reach the targets at all.
    fn preflight(&self, targets: &[IpAddr]) -> impl Future<Output = Result<()>> + Send;

    /// Round-trip time, or `None` when the host did not answer.
    fn reachable(&self, ip: IpAddr) -> impl Future<Output = Option<Duration>> + Send;

    /// `None` when the port is closed or filtered.
    fn probe_port(&self, ip: IpAddr, port: u16) -> impl Future<Output = Option<PortInfo>> + Send;

    fn mac_address(&self, ip: IpAddr) -> impl Future<Output = Option<String>> + Send {
        arp::lookup_mac(ip)
    }
}

pub fn service_name(port: u16) -> &'static str {
    match port {
        80 => "http",
        443 => "https",
        502 => "modbus",
        554 => "rtsp",
        4370 => "zkteco",
        8000 => "hikvision-sdk",
        8080 => "http-alt",
        8088 => "http-push",
        37777 => "dahua",
        _ => "tcp",
    }
}

/// Plain TCP connect probes.
///
/// A host is up when any candidate port completes a connect or refuses it
/// outright; only silence counts as unreachable.
#[derive(Debug, Clone)]
pub struct TcpProber {
    ping_timeout: Duration,
    port_timeout: Duration,
    ping_ports: Vec<u16>,
}

impl TcpProber {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            ping_timeout: config.ping_timeout(),
            port_timeout: config.port_timeout(),
            ping_ports: config.ports.clone(),
        }
    }

    async fn knock(addr: SocketAddr) -> bool {
        match TcpStream::connect(addr).await {
            Ok(_) => true,
            Err(e) => e.kind() == ErrorKind::ConnectionRefused,
        }
    }

    async fn grab_banner(&self, stream: &mut TcpStream, port: u16) -> Option<String> {
        if !HTTP_PORTS.contains(&port) {
            return None;
        }
        timeout(self.port_timeout, stream.write_all(HTTP_PROBE)).await.ok()?.ok()?;

        let mut buf = vec![0u8; MAX_BANNER_BYTES];
        let n = timeout(self.port_timeout, stream.read(&mut buf))
            .await
            .ok()?
            .ok()?;
        let banner = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        (!banner.is_empty()).then_some(banner)
    }

    /// Ask the ONVIF device service for its device information.
    ///
    /// A SOAP fault still proves the service exists, so any response that
    /// speaks the ONVIF namespaces counts.
    async fn onvif_device_information(&self, addr: SocketAddr) -> Option<String> {
        let mut stream = timeout(self.port_timeout, TcpStream::connect(addr))
            .await
            .ok()?
            .ok()?;
        let request = format!(
            "POST {ONVIF_SERVICE_PATH} HTTP/1.1\r\n\
             Host: {addr}\r\n\
             Content-Type: application/soap+xml; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n{GET_DEVICE_INFORMATION}",
            GET_DEVICE_INFORMATION.len()
        );
        timeout(self.port_timeout, stream.write_all(request.as_bytes()))
            .await
            .ok()?
            .ok()?;

        let mut response = Vec::with_capacity(1024);
        let mut limited = (&mut stream).take(MAX_ONVIF_RESPONSE_BYTES as u64);
        // A slow or silent service leaves whatever arrived in time.
        let _ = timeout(self.port_timeout, limited.read_to_end(&mut response)).await;

        let response = String::from_utf8_lossy(&response);
        let answered = response.starts_with("HTTP/1.") && response.contains("www.onvif.org");
        trace!(addr = %addr, answered, "ONVIF device service probe");
        answered.then(|| device_information(&response))
    }
}

/// `Manufacturer Model` from a GetDeviceInformation response.
fn device_information(response: &str) -> String {
    ["Manufacturer", "Model"]
        .iter()
        .filter_map(|tag| xml_text(response, tag))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the first `<tag>` or `<prefix:tag>` element.
fn xml_text<'a>(doc: &'a str, tag: &str) -> Option<&'a str> {
    let start = [format!(":{tag}>"), format!("<{tag}>")]
        .iter()
        .filter_map(|open| doc.find(open.as_str()).map(|at| at + open.len()))
        .min()?;
    let rest = &doc[start..];
    let text = rest[..rest.find('<')?].trim();
    (!text.is_empty()).then_some(text)
}

impl Prober for TcpProber {
    async fn preflight(&self, targets: &[IpAddr]) -> Result<()> {
        let Some(first) = targets.first() else {
            return Ok(());
        };
        let local = if first.is_ipv4() {
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
        } else {
            SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
        };
        // A UDP connect sends nothing; it only asks the kernel for a route.
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| DiscoveryError::Preflight(format!("no usable interface: {e}")))?;
        socket
            .connect((*first, 9))
            .await
            .map_err(|e| DiscoveryError::Preflight(format!("no route to {first}: {e}")))?;
        debug!(local = ?socket.local_addr().ok(), target = %first, "Preflight passed");
        Ok(())
    }

    async fn reachable(&self, ip: IpAddr) -> Option<Duration> {
        let started = Instant::now();
        let mut knocks: FuturesUnordered<_> = self
            .ping_ports
            .iter()
            .map(|port| Self::knock(SocketAddr::new(ip, *port)))
            .collect();

        let answered = timeout(self.ping_timeout, async {
            while let Some(up) = knocks.next().await {
                if up {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        trace!(ip = %ip, answered, "Reachability probe");
        answered.then(|| started.elapsed())
    }

    async fn probe_port(&self, ip: IpAddr, port: u16) -> Option<PortInfo> {
        let mut stream = timeout(self.port_timeout, TcpStream::connect((ip, port)))
            .await
            .ok()?
            .ok()?;
        let banner = self.grab_banner(&mut stream, port).await;
        drop(stream);
        let mut info = PortInfo::new(service_name(port), banner);
        if ONVIF_PORTS.contains(&port)
            && let Some(device) = self.onvif_device_information(SocketAddr::new(ip, port)).await
        {
            info = info.with_onvif(device);
        }
        trace!(ip = %ip, port, banner = ?info.banner, onvif = ?info.onvif, "Port open");
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn prober(ports: Vec<u16>) -> TcpProber {
        TcpProber::new(&DiscoveryConfig {
            ports,
            ping_timeout_ms: 300,
            port_timeout_ms: 300,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_http_banner_grab() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = [0u8; 64];
            let _ = sock.read(&mut req).await.unwrap();
            sock.write_all(b"HTTP/1.0 200 OK\r\nServer: App-webs/\r\n\r\n")
                .await
                .unwrap();
        });

        // Listener port is ephemeral, so probe it as an HTTP port directly.
        let p = prober(vec![addr.port()]);
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let banner = p.grab_banner(&mut stream, 80).await.unwrap();
        assert!(banner.contains("App-webs"));
    }

    #[tokio::test]
    async fn test_open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let p = prober(vec![open]);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        let info = p.probe_port(ip, open).await.unwrap();
        assert_eq!(info.service, service_name(open));
        assert_eq!(info.banner, None);

        drop(listener);
        assert!(p.probe_port(ip, open).await.is_none());
    }

    #[tokio::test]
    async fn test_refused_connect_counts_as_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let latency = prober(vec![port]).reachable("127.0.0.1".parse().unwrap()).await;
        assert!(latency.is_some());
    }

    #[tokio::test]
    async fn test_preflight_loopback() {
        let p = prober(vec![80]);
        assert!(p.preflight(&[]).await.is_ok());
        assert!(p.preflight(&["127.0.0.1".parse().unwrap()]).await.is_ok());
    }

    /// One-shot HTTP responder that records the request it got.
    async fn soap_responder(response: &'static str) -> (SocketAddr, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = Vec::new();
            let mut buf = [0u8; 1024];
            while !String::from_utf8_lossy(&req).contains("</s:Envelope>") {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                req.extend_from_slice(&buf[..n]);
            }
            sock.write_all(response.as_bytes()).await.unwrap();
            sock.shutdown().await.unwrap();
            String::from_utf8_lossy(&req).to_string()
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_onvif_device_information() {
        let (addr, request) = soap_responder(
            "HTTP/1.1 200 OK\r\nContent-Type: application/soap+xml\r\n\r\n\
             <s:Envelope xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\"><s:Body>\
             <tds:GetDeviceInformationResponse>\
             <tds:Manufacturer>HIKVISION</tds:Manufacturer>\
             <tds:Model>DS-2CD2042WD-I</tds:Model>\
             <tds:FirmwareVersion>V5.4.5</tds:FirmwareVersion>\
             </tds:GetDeviceInformationResponse></s:Body></s:Envelope>",
        )
        .await;

        let device = prober(vec![]).onvif_device_information(addr).await.unwrap();
        assert_eq!(device, "HIKVISION DS-2CD2042WD-I");
        let request = request.await.unwrap();
        assert!(request.starts_with("POST /onvif/device_service HTTP/1.1"));
        assert!(request.contains("GetDeviceInformation"));
    }

    #[tokio::test]
    async fn test_onvif_fault_still_counts() {
        let (addr, _) = soap_responder(
            "HTTP/1.1 400 Bad Request\r\n\r\n\
             <env:Envelope xmlns:ter=\"http://www.onvif.org/ver10/error\">\
             <env:Body><env:Fault><env:Subcode><env:Value>ter:NotAuthorized</env:Value>\
             </env:Subcode></env:Fault></env:Body></env:Envelope>",
        )
        .await;
        assert_eq!(prober(vec![]).onvif_device_information(addr).await, Some(String::new()));
    }

    #[tokio::test]
    async fn test_plain_web_server_is_not_onvif() {
        let (addr, _) = soap_responder("HTTP/1.1 404 Not Found\r\nServer: nginx\r\n\r\nnot found").await;
        assert_eq!(prober(vec![]).onvif_device_information(addr).await, None);
    }

    #[test]
    fn test_xml_text() {
        let doc = "<a><tt:Model> IPC-HFW2431S </tt:Model><Manufacturer>Dahua</Manufacturer></a>";
        assert_eq!(xml_text(doc, "Model"), Some("IPC-HFW2431S"));
        assert_eq!(xml_text(doc, "Manufacturer"), Some("Dahua"));
        assert_eq!(xml_text(doc, "FirmwareVersion"), None);
    }

    #[test]
    fn test_service_names() {
        assert_eq!(service_name(4370), "zkteco");
        assert_eq!(service_name(37777), "dahua");
        assert_eq!(service_name(9999), "tcp");
    }
}
