//! Wake-on-LAN senders.
//!
//! The direct sender broadcasts the magic packet itself. The relay sender
//! asks an always-on helper host to emit it (useful when the control plane
//! sits outside the target's L2 segment) and falls back to a direct
//! broadcast when the relay is unreachable.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::config::parse_mac;

const WOL_PORT: u16 = 9;
const RELAY_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait WolSender: Send + Sync {
    async fn wake(&self, mac: &str, broadcast: &str) -> Result<()>;
}

/// 6 x 0xFF followed by the MAC repeated 16 times.
fn magic_packet(mac: [u8; 6]) -> [u8; 102] {
    let mut packet = [0xFFu8; 102];
    for i in 0..16 {
        packet[6 + i * 6..12 + i * 6].copy_from_slice(&mac);
    }
    packet
}

#[derive(Default)]
pub struct UdpWolSender;

#[async_trait]
impl WolSender for UdpWolSender {
    async fn wake(&self, mac: &str, broadcast: &str) -> Result<()> {
        let packet = magic_packet(parse_mac(mac)?);
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("binding WoL socket")?;
        socket.set_broadcast(true)?;
        socket
            .send_to(&packet, (broadcast, WOL_PORT))
            .await
            .with_context(|| format!("sending magic packet to {}", broadcast))?;
        info!("Sent magic packet for {} via {}", mac, broadcast);
        Ok(())
    }
}

/// Issues `wakeonlan` on a relay host over ssh, falling back to a direct
/// broadcast if the relay cannot be reached.
pub struct RelayWolSender {
    relay_host: String,
    relay_user: String,
    relay_port: u16,
    direct: UdpWolSender,
}

impl RelayWolSender {
    pub fn new(relay_host: String, relay_user: String, relay_port: u16) -> Self {
        Self {
            relay_host,
            relay_user,
            relay_port,
            direct: UdpWolSender,
        }
    }

    async fn wake_via_relay(&self, mac: &str) -> Result<()> {
        parse_mac(mac)?;
        let mut cmd = tokio::process::Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("ConnectTimeout=10")
            .arg("-p")
            .arg(self.relay_port.to_string())
            .arg(format!("{}@{}", self.relay_user, self.relay_host))
            .arg(format!("wakeonlan {}", mac));
        let output = tokio::time::timeout(RELAY_TIMEOUT, cmd.output())
            .await
            .context("relay wake timed out")?
            .context("relay ssh spawn failed")?;
        if !output.status.success() {
            bail!(
                "relay wake exited {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl WolSender for RelayWolSender {
    async fn wake(&self, mac: &str, broadcast: &str) -> Result<()> {
        match self.wake_via_relay(mac).await {
            Ok(()) => {
                info!("Relay [{}] sent wake for {}", self.relay_host, mac);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Relay [{}] wake failed ({}), falling back to direct broadcast",
                    self.relay_host, e
                );
                self.direct.wake(mac, broadcast).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_packet_layout() {
        let packet = magic_packet([0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22]);
        assert_eq!(&packet[..6], &[0xFF; 6]);
        for i in 0..16 {
            assert_eq!(
                &packet[6 + i * 6..12 + i * 6],
                &[0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22]
            );
        }
    }

    #[tokio::test]
    async fn direct_sender_rejects_bad_mac() {
        let sender = UdpWolSender;
        assert!(sender.wake("not-a-mac", "127.0.0.255").await.is_err());
    }
}
