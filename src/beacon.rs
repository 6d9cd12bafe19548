//! Multicast discovery. The sender announces itself with HMAC-authenticated
//! beacons; the receiver listens, verifies, and surfaces matching peers.
//!
//! A passive observer sees the phrase hash on the wire but cannot forge a
//! valid envelope without the phrase itself, because the HMAC is keyed by the
//! canonical phrase both sides share out of band.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::protocol::{
    default_alias, BeaconEnvelope, BeaconPayload, DeviceType, TransferProtocol,
};
use crate::{crypto, phrase, Error, Result, BEACON_INTERVAL_MS, MULTICAST_GROUP, MULTICAST_PORT};

/// A verified peer, assembled from the datagram source IP and the announced
/// port and scheme.
#[derive(Debug, Clone)]
pub struct Device {
    pub alias: String,
    pub fingerprint: String,
    pub addr: SocketAddr,
    pub protocol: TransferProtocol,
}

impl Device {
    pub fn base_url(&self) -> String {
        format!("{}://{}{}", self.protocol.scheme(), self.addr, crate::API_PREFIX)
    }
}

/// Serializes the announcement and signs the exact JSON string that goes on
/// the wire. Verifiers must check the HMAC against that embedded string, not
/// against a reserialization.
pub fn build_datagram(code_phrase: &str, payload: &BeaconPayload) -> Result<Vec<u8>> {
    let canonical = phrase::normalize(code_phrase);
    let data = serde_json::to_string(payload)?;
    let envelope = BeaconEnvelope {
        hmac: crypto::sign(&canonical, &data),
        data,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

pub enum BeaconCheck {
    /// Authenticated, matching hash, CLI peer.
    Accepted(BeaconPayload),
    /// Correct shape but wrong HMAC; someone may be probing the channel.
    Spoofed,
    /// Noise: malformed JSON, missing fields, foreign hash, or non-CLI peer.
    Ignored,
}

pub fn check_beacon(datagram: &[u8], code_phrase: &str) -> BeaconCheck {
    let canonical = phrase::normalize(code_phrase);
    let Ok(envelope) = serde_json::from_slice::<BeaconEnvelope>(datagram) else {
        return BeaconCheck::Ignored;
    };
    if !crypto::verify(&canonical, &envelope.data, &envelope.hmac) {
        return BeaconCheck::Spoofed;
    }
    let Ok(payload) = serde_json::from_str::<BeaconPayload>(&envelope.data) else {
        return BeaconCheck::Ignored;
    };
    if !payload.cli_mode || payload.code_hash != phrase::hash(&canonical) {
        return BeaconCheck::Ignored;
    }
    BeaconCheck::Accepted(payload)
}

/// Sender-side announcer: one datagram to the multicast group every 500 ms
/// until stopped.
pub struct Broadcaster {
    handle: JoinHandle<()>,
}

impl Broadcaster {
    pub async fn start(code_phrase: &str, fingerprint: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;

        let payload = BeaconPayload {
            alias: default_alias(),
            version: crate::PROTOCOL_VERSION.to_string(),
            device_model: crate::DEVICE_MODEL.to_string(),
            device_type: DeviceType::Headless,
            fingerprint: fingerprint.to_string(),
            port,
            protocol: TransferProtocol::Https,
            download: true,
            announcement: true,
            announce: true,
            code_hash: phrase::hash(code_phrase),
            cli_session_id: Uuid::new_v4(),
            cli_mode: true,
        };
        let datagram = build_datagram(code_phrase, &payload)?;
        let dest = SocketAddrV4::new(MULTICAST_GROUP, MULTICAST_PORT);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(BEACON_INTERVAL_MS));
            loop {
                ticker.tick().await;
                if let Err(e) = socket.send_to(&datagram, dest).await {
                    debug!("Beacon send failed: {}", e);
                }
            }
        });
        debug!("Broadcasting beacons to {}:{}", MULTICAST_GROUP, MULTICAST_PORT);
        Ok(Self { handle })
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Receiver-side listener: joins the multicast group and yields one `Device`
/// per accepted beacon.
pub struct Listener {
    socket: Arc<UdpSocket>,
    handle: JoinHandle<()>,
    devices: mpsc::Receiver<Device>,
}

impl Listener {
    pub fn start(code_phrase: &str) -> Result<Self> {
        let std_socket = bind_multicast(MULTICAST_PORT)?;
        let socket = Arc::new(UdpSocket::from_std(std_socket)?);
        socket.join_multicast_v4(MULTICAST_GROUP, Ipv4Addr::UNSPECIFIED)?;
        debug!("Listening for beacons on {}:{}", MULTICAST_GROUP, MULTICAST_PORT);

        let (tx, devices) = mpsc::channel(16);
        let canonical = phrase::normalize(code_phrase);
        let recv_socket = socket.clone();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let (len, src) = match recv_socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        debug!("Beacon receive failed: {}", e);
                        break;
                    }
                };
                match check_beacon(&buf[..len], &canonical) {
                    BeaconCheck::Accepted(payload) => {
                        let device = Device {
                            alias: payload.alias,
                            fingerprint: payload.fingerprint,
                            addr: SocketAddr::new(src.ip(), payload.port),
                            protocol: payload.protocol,
                        };
                        debug!("Verified beacon from {} ({})", device.addr, device.alias);
                        if tx.send(device).await.is_err() {
                            break;
                        }
                    }
                    BeaconCheck::Spoofed => {
                        eprintln!(
                            "Warning: discarding beacon with invalid HMAC from {} (possible spoofing)",
                            src.ip()
                        );
                    }
                    BeaconCheck::Ignored => {}
                }
            }
        });

        Ok(Self {
            socket,
            handle,
            devices,
        })
    }

    /// Next verified device. `None` once the listener has shut down.
    pub async fn recv(&mut self) -> Option<Device> {
        self.devices.recv().await
    }

    /// Cancels the receive task and leaves the multicast group before the
    /// socket closes.
    pub fn stop(&self) {
        self.handle.abort();
        let _ = self
            .socket
            .leave_multicast_v4(MULTICAST_GROUP, Ipv4Addr::UNSPECIFIED);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The multicast port must be shared with other local listeners, so bind via
/// socket2 with SO_REUSEADDR before handing the socket to tokio.
fn bind_multicast(port: u16) -> Result<std::net::UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let addr: SocketAddr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into()).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            Error::PortBusy(port)
        } else {
            Error::Io(e)
        }
    })?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
