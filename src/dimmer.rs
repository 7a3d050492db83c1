//! Dimmer and relay load adapter
//!
//! Holds the last known state of one load and translates power, brightness
//! and color requests into controller commands. Brightness writes are
//! debounced: a slider dragged across twenty values should reach the
//! controller as one ramp, not twenty.

use crate::client::{VantageClient, VantageEvent};
use crate::error::VantageResult;
use crate::objects::LoadKind;
use crate::platform::Accessory;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Window over which rapid brightness writes are coalesced.
const DIM_DEBOUNCE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq)]
struct DimmerState {
    on: bool,
    /// Last known level, 0..=100.
    brightness: u32,
    hue: f64,
    saturation: f64,
}

/// Adapter for a lighting load (dimmer, relay or RGB).
pub struct VantageDimmer {
    client: Arc<VantageClient>,
    vid: u32,
    name: String,
    kind: LoadKind,
    state: Mutex<DimmerState>,
    /// Debounce timer for the most recent brightness request.
    pending_dim: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl VantageDimmer {
    pub fn new(client: Arc<VantageClient>, vid: u32, name: String, kind: LoadKind) -> Self {
        Self {
            client,
            vid,
            name,
            kind,
            state: Mutex::new(DimmerState {
                on: false,
                brightness: 100,
                hue: 0.0,
                saturation: 0.0,
            }),
            pending_dim: tokio::sync::Mutex::new(None),
        }
    }

    pub fn kind(&self) -> LoadKind {
        self.kind
    }

    pub fn is_on(&self) -> bool {
        self.state().on
    }

    pub fn brightness(&self) -> u32 {
        self.state().brightness
    }

    fn state(&self) -> MutexGuard<'_, DimmerState> {
        // A poisoning panic cannot leave the state invalid; keep the value.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Switch the load on (to its last known brightness) or off.
    /// Sent immediately, without debounce.
    pub async fn set_power(&self, on: bool) -> VantageResult<()> {
        let level = {
            let mut state = self.state();
            state.on = on;
            if on {
                state.brightness.max(1)
            } else {
                0
            }
        };
        tracing::debug!("{} ({}) power {}", self.name, self.vid, on);
        self.client.send_set_dim_level(self.vid, level, None).await
    }

    /// Ramp the load to `level` percent. Requests inside the debounce
    /// window replace each other; only the last one reaches the wire.
    pub async fn set_brightness(&self, level: u32) {
        let level = level.min(100);
        {
            let mut state = self.state();
            state.brightness = level;
            state.on = level > 0;
        }

        let client = self.client.clone();
        let vid = self.vid;
        let handle = tokio::spawn(async move {
            sleep(DIM_DEBOUNCE).await;
            if let Err(e) = client.send_set_dim_level(vid, level, None).await {
                tracing::warn!("dim command for VID {} dropped: {}", vid, e);
            }
        });

        let mut pending = self.pending_dim.lock().await;
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(handle);
    }

    /// Dissolve an RGB load to the given hue/saturation at the current
    /// brightness. Fire-and-forget: the controller does not report color
    /// state back.
    pub async fn set_color_hsl(&self, hue: f64, saturation: f64) -> VantageResult<()> {
        // Luminance is the brightness percent; the encoder applies the
        // controller's x1000 scaling.
        let luminance = {
            let mut state = self.state();
            state.hue = hue;
            state.saturation = saturation;
            f64::from(state.brightness)
        };
        self.client
            .send_set_color_hsl(self.vid, hue, saturation, luminance, None)
            .await
    }
}

#[async_trait]
impl Accessory for VantageDimmer {
    fn vid(&self) -> u32 {
        self.vid
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn request_status(&self) -> VantageResult<()> {
        self.client.send_get_load_status(self.vid).await
    }

    fn handle_event(&self, event: &VantageEvent) {
        if let VantageEvent::LoadStatusChanged { vid, value } = event {
            if *vid != self.vid {
                return;
            }
            let mut state = self.state();
            state.on = *value > 0;
            // Level 0 keeps the previous brightness so a later power-on
            // restores it.
            if *value > 0 {
                state.brightness = *value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VantageConfig, VantageError};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn connected_pair() -> (Arc<VantageClient>, tokio::sync::mpsc::UnboundedReceiver<String>)
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let (line_tx, line_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let mut reader = BufReader::new(stream);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let _ = line_tx.send(line.trim_end().to_string());
                    }
                }
            }
        });

        let mut config = VantageConfig::new("127.0.0.1");
        config.command_port = port;
        config.send_interval_ms = 1;
        let mut client = VantageClient::new(config);
        client.connect().await.expect("connect");
        (Arc::new(client), line_rx)
    }

    /// Drain server-observed lines until one starts with INVOKE.
    async fn next_invoke(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> String {
        loop {
            let line = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("line in time")
                .expect("channel open");
            if line.starts_with("INVOKE") {
                return line;
            }
        }
    }

    #[tokio::test]
    async fn test_power_commands() {
        let (client, mut rx) = connected_pair().await;
        let dimmer = VantageDimmer::new(client, 2774, "Ceiling".to_string(), LoadKind::Dimmer);

        dimmer.set_power(true).await.expect("on");
        assert_eq!(next_invoke(&mut rx).await, "INVOKE 2774 Load.Ramp 6 1 100");
        assert!(dimmer.is_on());

        dimmer.set_power(false).await.expect("off");
        assert_eq!(next_invoke(&mut rx).await, "INVOKE 2774 Load.SetLevel 0");
        assert!(!dimmer.is_on());
    }

    #[tokio::test]
    async fn test_brightness_debounce_keeps_last_write() {
        let (client, mut rx) = connected_pair().await;
        let dimmer = VantageDimmer::new(client, 2774, "Ceiling".to_string(), LoadKind::Dimmer);

        // A burst of slider positions inside the debounce window.
        dimmer.set_brightness(20).await;
        dimmer.set_brightness(45).await;
        dimmer.set_brightness(80).await;

        assert_eq!(next_invoke(&mut rx).await, "INVOKE 2774 Load.Ramp 6 1 80");
        assert_eq!(dimmer.brightness(), 80);
        assert!(dimmer.is_on());

        // Nothing else follows within another window.
        tokio::time::sleep(DIM_DEBOUNCE * 3).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_brightness_clamped_to_100() {
        let (client, mut rx) = connected_pair().await;
        let dimmer = VantageDimmer::new(client, 10, "Lamp".to_string(), LoadKind::Dimmer);
        dimmer.set_brightness(250).await;
        assert_eq!(next_invoke(&mut rx).await, "INVOKE 10 Load.Ramp 6 1 100");
    }

    #[tokio::test]
    async fn test_color_uses_current_brightness_as_luminance() {
        let (client, mut rx) = connected_pair().await;
        let dimmer = VantageDimmer::new(client, 7, "Strip".to_string(), LoadKind::Dimmer);
        dimmer.handle_event(&VantageEvent::LoadStatusChanged { vid: 7, value: 50 });

        dimmer.set_color_hsl(120.0, 100.0).await.expect("color");
        // Brightness 50 goes out as 50 * 1000 millipercent luminance.
        assert_eq!(
            next_invoke(&mut rx).await,
            "INVOKE 7 RGBLoad.DissolveHSL 120 100 50000 500"
        );
    }

    #[tokio::test]
    async fn test_status_event_updates_state() {
        let (client, _rx) = connected_pair().await;
        let dimmer = VantageDimmer::new(client, 5, "Hall".to_string(), LoadKind::Relay);

        dimmer.handle_event(&VantageEvent::LoadStatusChanged { vid: 5, value: 75 });
        assert!(dimmer.is_on());
        assert_eq!(dimmer.brightness(), 75);

        // Off keeps the last brightness for the next power-on.
        dimmer.handle_event(&VantageEvent::LoadStatusChanged { vid: 5, value: 0 });
        assert!(!dimmer.is_on());
        assert_eq!(dimmer.brightness(), 75);

        // Another load's status is ignored.
        dimmer.handle_event(&VantageEvent::LoadStatusChanged { vid: 6, value: 10 });
        assert!(!dimmer.is_on());
    }

    #[tokio::test]
    async fn test_request_status_without_connection_fails() {
        let client = Arc::new(VantageClient::new(VantageConfig::new("127.0.0.1")));
        let dimmer = VantageDimmer::new(client, 5, "Hall".to_string(), LoadKind::Dimmer);
        assert!(matches!(
            dimmer.request_status().await,
            Err(VantageError::NotConnected)
        ));
    }
}
