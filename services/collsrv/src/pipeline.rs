//! Measurement pipeline: protocol address → logical point → sample
//!
//! Every decoded data object passes through here: quality gate, inverse
//! mapping lookup (`HS:MAPPING:<PROTOCOL>:<device>:<address>`), affine
//! scaling, persistence into the per-binding time series and publication
//! on the typed sample channel. A sample is always persisted before its
//! publish becomes observable.

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tracing::{debug, warn};

use common::time::{format_iso_millis, now_local};
use datacoll_rtdb::keyspace::channel;
use datacoll_rtdb::model::{PointBinding, SampleEvent};
use datacoll_rtdb::Inventory;

use crate::error::Result;

/// Which reply channel a sample is published on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRoute {
    /// Collected data (spontaneous / interrogation); persisted + published
    Data,
    /// Reply to an interactive read; published only
    Call,
    /// Reply to a control command; published only
    Ctrl,
}

/// One decoded data object handed over by the protocol engine
#[derive(Debug, Clone, PartialEq)]
pub struct DataObject {
    /// Information object address
    pub address: u32,
    /// Raw protocol value before scaling
    pub value: f64,
    /// Time tag from the frame, if it carried one
    pub time: Option<NaiveDateTime>,
    /// Quality IV bit
    pub invalid: bool,
}

/// Per-device measurement pipeline with a binding-resolution cache
pub struct MeasurementPipeline {
    inventory: Inventory,
    device_id: String,
    protocol: String,
    cache: DashMap<u32, PointBinding>,
}

impl MeasurementPipeline {
    pub fn new(inventory: Inventory, device_id: String, protocol: String) -> Self {
        Self {
            inventory,
            device_id,
            protocol,
            cache: DashMap::new(),
        }
    }

    /// Drop cached bindings; the next object re-reads the store
    ///
    /// Called when the supervisor forwards a terminal/binding change.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    /// Process a batch of data objects; returns how many samples were
    /// published. Unknown addresses and quality-invalid objects are
    /// discarded (the device may predate its mappings).
    pub async fn process(&self, objects: Vec<DataObject>, route: SampleRoute) -> Result<usize> {
        let mut published = 0;
        for object in objects {
            if object.invalid {
                debug!(
                    "device[{}] dropping quality-invalid object at {}",
                    self.device_id, object.address
                );
                continue;
            }
            let Some(binding) = self.resolve(object.address).await? else {
                debug!(
                    "device[{}] no mapping for protocol address {}",
                    self.device_id, object.address
                );
                continue;
            };

            let value = binding.scale(object.value);
            let time = format_iso_millis(object.time.unwrap_or_else(now_local));
            let event = SampleEvent {
                device_id: self.device_id.clone(),
                term_id: binding.term_id.clone(),
                item_id: binding.item_id.clone(),
                time: time.clone(),
                value,
            };

            // Store before publish: a published sample must already be in
            // its binding's time series
            if route == SampleRoute::Data {
                self.inventory
                    .store_sample(&self.device_id, &binding.term_id, &binding.item_id, &time, value)
                    .await?;
            }

            let channel = match route {
                SampleRoute::Data => {
                    channel::device_data(&self.device_id, &binding.term_id, &binding.item_id)
                },
                SampleRoute::Call => {
                    channel::device_call(&self.device_id, &binding.term_id, &binding.item_id)
                },
                SampleRoute::Ctrl => {
                    channel::device_ctrl(&self.device_id, &binding.term_id, &binding.item_id)
                },
            };
            let payload = serde_json::to_string(&event)?;
            match self.inventory.rtdb().publish(&channel, &payload).await {
                Ok(_) => published += 1,
                Err(e) => warn!("device[{}] publish to {channel} failed: {e}", self.device_id),
            }
        }
        Ok(published)
    }

    async fn resolve(&self, address: u32) -> Result<Option<PointBinding>> {
        if let Some(binding) = self.cache.get(&address) {
            return Ok(Some(binding.clone()));
        }
        let binding = self
            .inventory
            .lookup_mapping(&self.protocol, &self.device_id, &address.to_string())
            .await?;
        if let Some(binding) = &binding {
            self.cache.insert(address, binding.clone());
        }
        Ok(binding)
    }
}
