//! Accessory discovery and event dispatch
//!
//! Walks a parsed project database, filters objects through the
//! controller's interface-capability negotiation and builds the thin
//! accessory adapters. Also owns the event loop that forwards controller
//! events to every accessory.

use crate::client::{VantageClient, VantageEvent};
use crate::dimmer::VantageDimmer;
use crate::error::VantageResult;
use crate::objects::ProjectDatabase;
use crate::protocol::interfaces;
use crate::thermostat::VantageThermostat;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// A device adapter fed by controller events.
#[async_trait]
pub trait Accessory: Send + Sync {
    fn vid(&self) -> u32;

    fn name(&self) -> &str;

    /// Ask the controller for this device's current state; the answer
    /// arrives later through [`handle_event`].
    ///
    /// [`handle_event`]: Accessory::handle_event
    async fn request_status(&self) -> VantageResult<()>;

    /// Consume a controller event; events for other VIDs are ignored.
    fn handle_event(&self, event: &VantageEvent);
}

/// Builds accessories from the project database and routes events to them.
pub struct VantagePlatform {
    client: Arc<VantageClient>,
    accessories: Vec<Arc<dyn Accessory>>,
}

impl VantagePlatform {
    pub fn new(client: Arc<VantageClient>) -> Self {
        Self {
            client,
            accessories: Vec::new(),
        }
    }

    pub fn accessories(&self) -> &[Arc<dyn Accessory>] {
        &self.accessories
    }

    pub fn accessory(&self, vid: u32) -> Option<&Arc<dyn Accessory>> {
        self.accessories.iter().find(|a| a.vid() == vid)
    }

    /// Build accessories from the configuration database text.
    ///
    /// Every candidate object is checked against the controller before an
    /// adapter is created: loads must support the Load interface and HVAC
    /// objects the Thermostat interface. Objects marked excluded in the
    /// project are skipped without a query.
    pub async fn discover(&mut self, database: &str) -> VantageResult<()> {
        let db = ProjectDatabase::parse(database)?;
        tracing::info!(
            "project database: {} loads, {} HVAC objects, {} areas",
            db.loads.len(),
            db.hvacs.len(),
            db.areas.len()
        );

        for load in &db.loads {
            if load.exclude_from_widgets {
                tracing::debug!("load {} ({}) excluded from widgets", load.vid, load.name);
                continue;
            }
            if !self
                .client
                .query_interface_support(load.vid, interfaces::LOAD)
                .await?
            {
                tracing::debug!("load {} does not support {}", load.vid, interfaces::LOAD);
                continue;
            }
            let name = self.resolve_name(&db, load.vid, load.area, load.display_name());
            tracing::info!(
                "adding {} load {} ({})",
                match load.kind() {
                    crate::objects::LoadKind::Dimmer => "dimmer",
                    crate::objects::LoadKind::Relay => "relay",
                },
                load.vid,
                name
            );
            self.accessories.push(Arc::new(VantageDimmer::new(
                self.client.clone(),
                load.vid,
                name,
                load.kind(),
            )));
        }

        for hvac in &db.hvacs {
            if hvac.exclude_from_widgets {
                tracing::debug!("HVAC {} ({}) excluded from widgets", hvac.vid, hvac.name);
                continue;
            }
            if !self
                .client
                .query_interface_support(hvac.vid, interfaces::THERMOSTAT)
                .await?
            {
                tracing::debug!(
                    "HVAC {} does not support {}",
                    hvac.vid,
                    interfaces::THERMOSTAT
                );
                continue;
            }
            let name = self.resolve_name(&db, hvac.vid, None, hvac.display_name());
            tracing::info!("adding thermostat {} ({})", hvac.vid, name);
            self.accessories.push(Arc::new(VantageThermostat::new(
                self.client.clone(),
                hvac.vid,
                name,
            )));
        }

        Ok(())
    }

    /// Accessory display name: a configured per-VID override wins,
    /// otherwise the object name prefixed with its area name.
    fn resolve_name(
        &self,
        db: &ProjectDatabase,
        vid: u32,
        area: Option<u32>,
        object_name: &str,
    ) -> String {
        if let Some(mapped) = self.client.config().name_mapping.get(&vid.to_string()) {
            return mapped.clone();
        }
        match area.and_then(|a| db.area_name(a)) {
            Some(area_name) => format!("{}-{}", area_name, object_name),
            None => object_name.to_string(),
        }
    }

    /// Ask every accessory to refresh its state from the controller.
    pub async fn request_all_status(&self) -> VantageResult<()> {
        for accessory in &self.accessories {
            accessory.request_status().await?;
        }
        Ok(())
    }

    /// Forward one event to every accessory.
    pub fn dispatch(&self, event: &VantageEvent) {
        for accessory in &self.accessories {
            accessory.handle_event(event);
        }
    }

    /// Subscribe to the client's event bus and dispatch until the client
    /// shuts down. Lagged receivers skip ahead rather than aborting.
    pub async fn run_event_loop(&self) {
        let mut events = self.client.subscribe();
        loop {
            match events.recv().await {
                Ok(event) => self.dispatch(&event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("event loop lagged, {} events dropped", missed);
                }
                Err(RecvError::Closed) => {
                    tracing::info!("event bus closed, stopping dispatch");
                    break;
                }
            }
        }
    }
}
