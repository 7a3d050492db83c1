//! Thermostat adapter
//!
//! Tracks the last temperature reading for one HVAC object. Readings
//! arrive unsolicited through the event log or in answer to an explicit
//! outdoor-temperature query.

use crate::client::{VantageClient, VantageEvent};
use crate::error::VantageResult;
use crate::platform::Accessory;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub struct VantageThermostat {
    client: Arc<VantageClient>,
    vid: u32,
    name: String,
    /// Last reported temperature in degrees Celsius.
    temperature: Mutex<f64>,
}

impl VantageThermostat {
    pub fn new(client: Arc<VantageClient>, vid: u32, name: String) -> Self {
        Self {
            client,
            vid,
            name,
            temperature: Mutex::new(0.0),
        }
    }

    pub fn temperature(&self) -> f64 {
        *self
            .temperature
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn store(&self, celsius: f64) {
        *self
            .temperature
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = celsius;
    }
}

#[async_trait]
impl Accessory for VantageThermostat {
    fn vid(&self) -> u32 {
        self.vid
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn request_status(&self) -> VantageResult<()> {
        self.client.send_query_outdoor_temperature(self.vid).await
    }

    fn handle_event(&self, event: &VantageEvent) {
        match event {
            VantageEvent::IndoorTemperatureChanged { vid, celsius }
            | VantageEvent::OutdoorTemperatureChanged { vid, celsius }
                if *vid == self.vid =>
            {
                tracing::debug!("{} ({}) temperature {:.1}C", self.name, self.vid, celsius);
                self.store(*celsius);
            }
            _ => {}
        }
    }
}
