//! Device supervisor
//!
//! Subscribes to the inventory change bus and reconciles the table of live
//! device actors against the declared inventory: actors are spawned on
//! add, recreated when transport-relevant attributes change, destroyed on
//! delete. Terminal and binding changes are forwarded to the owning actor
//! as refresh hints; interactive call/ctrl broadcasts are routed to the
//! owning actor's mailbox.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use datacoll_rtdb::keyspace::channel;
use datacoll_rtdb::model::{Device, PointRequest};
use datacoll_rtdb::{BusMessage, Inventory};

use crate::config::Iec104Params;
use crate::error::Result;
use crate::protocol::iec104::{self, DeviceCommand, DeviceHandle};
use crate::protocol::IEC104;

/// Reconciles live actors against the inventory
pub struct DeviceSupervisor {
    inventory: Inventory,
    params: Iec104Params,
    devices: HashMap<String, DeviceHandle>,
}

impl DeviceSupervisor {
    pub fn new(inventory: Inventory, params: Iec104Params) -> Self {
        Self {
            inventory,
            params,
            devices: HashMap::new(),
        }
    }

    /// Run until cancelled: bootstrap from `SET:DEVICE`, then follow the
    /// change bus.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let channels: Vec<String> = [
            channel::DEVICE_ADD,
            channel::DEVICE_FRESH,
            channel::DEVICE_DEL,
            channel::TERM_ADD,
            channel::TERM_FRESH,
            channel::TERM_DEL,
            channel::TERM_ITEM_ADD,
            channel::TERM_ITEM_DEL,
            channel::DEVICE_CALL,
            channel::DEVICE_CTRL,
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();
        // Subscribe before the bootstrap read so no change is lost between
        let mut events = self.inventory.rtdb().subscribe(&channels).await?;

        self.bootstrap().await;
        info!("supervisor running with {} device actor(s)", self.devices.len());

        loop {
            tokio::select! {
                message = events.recv() => match message {
                    Some(message) => self.dispatch(message).await,
                    None => {
                        warn!("change bus closed, supervisor stopping");
                        break;
                    },
                },
                _ = cancel.cancelled() => break,
            }
        }

        info!("supervisor stopping, destroying {} actor(s)", self.devices.len());
        for (_, handle) in self.devices.drain() {
            handle.shutdown().await;
        }
        Ok(())
    }

    /// Spawn actors for every device already declared in the store
    async fn bootstrap(&mut self) {
        let devices = match self.inventory.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                error!("device bootstrap failed: {e}");
                return;
            },
        };
        for device in devices {
            self.upsert_device(device).await;
        }
    }

    async fn dispatch(&mut self, message: BusMessage) {
        debug!("supervisor event on {}: {}", message.channel, message.payload);
        let result = match message.channel.as_str() {
            channel::DEVICE_ADD | channel::DEVICE_FRESH => self.on_device_upsert(&message.payload).await,
            channel::DEVICE_DEL => self.on_device_del(&message.payload).await,
            channel::TERM_ADD | channel::TERM_FRESH | channel::TERM_DEL => {
                self.forward_refresh(&message.payload).await
            },
            channel::TERM_ITEM_ADD | channel::TERM_ITEM_DEL => {
                self.forward_refresh(&message.payload).await
            },
            channel::DEVICE_CALL => self.forward_request(&message.payload, false).await,
            channel::DEVICE_CTRL => self.forward_request(&message.payload, true).await,
            other => {
                debug!("ignoring message on unexpected channel {other}");
                Ok(())
            },
        };
        if let Err(e) = result {
            error!("supervisor event on {} failed: {e}", message.channel);
        }
    }

    async fn on_device_upsert(&mut self, payload: &str) -> Result<()> {
        let device: Device = serde_json::from_str(payload)?;
        self.upsert_device(device).await;
        Ok(())
    }

    async fn upsert_device(&mut self, device: Device) {
        if let Some(existing) = self.devices.get(&device.id) {
            if !existing.device().transport_changed(&device) {
                debug!("device[{}] unchanged transport, keeping actor", device.id);
                return;
            }
            info!("device[{}] transport changed, recreating actor", device.id);
            if let Some(handle) = self.devices.remove(&device.id) {
                handle.shutdown().await;
            }
        }
        if device.protocol != IEC104 {
            info!(
                "device[{}] protocol `{}` has no engine, skipping",
                device.id, device.protocol
            );
            return;
        }
        info!(
            "device[{}] spawning actor for {}:{}",
            device.id, device.ip, device.port
        );
        let handle = iec104::spawn(device.clone(), self.params.clone(), self.inventory.clone());
        self.devices.insert(device.id, handle);
    }

    async fn on_device_del(&mut self, payload: &str) -> Result<()> {
        // Payload is the bare device id as a JSON string
        let device_id: String = serde_json::from_str(payload)?;
        if let Some(handle) = self.devices.remove(&device_id) {
            info!("device[{device_id}] deleted, destroying actor");
            handle.shutdown().await;
        }
        Ok(())
    }

    /// Terminal or binding changed: hint the owning actor to re-read
    async fn forward_refresh(&mut self, payload: &str) -> Result<()> {
        let hint: serde_json::Value = serde_json::from_str(payload)?;
        let Some(device_id) = hint.get("device_id").and_then(|v| v.as_str()) else {
            debug!("refresh hint without device_id, ignored");
            return Ok(());
        };
        if let Some(handle) = self.devices.get(device_id) {
            if !handle.send(DeviceCommand::Refresh).await {
                warn!("device[{device_id}] actor unreachable for refresh");
            }
        }
        Ok(())
    }

    async fn forward_request(&mut self, payload: &str, ctrl: bool) -> Result<()> {
        let request: PointRequest = serde_json::from_str(payload)?;
        let Some(handle) = self.devices.get(&request.device_id) else {
            warn!(
                "device[{}] {} request for unknown actor",
                request.device_id,
                if ctrl { "ctrl" } else { "call" }
            );
            return Ok(());
        };
        let command = if ctrl {
            DeviceCommand::Ctrl(request.clone())
        } else {
            DeviceCommand::Call(request.clone())
        };
        if !handle.send(command).await {
            warn!("device[{}] actor mailbox closed", request.device_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datacoll_rtdb::{MemoryRtdb, Rtdb};
    use std::sync::Arc;
    use std::time::Duration;

    fn test_params() -> Iec104Params {
        Iec104Params {
            t0: 1,
            ..Iec104Params::default()
        }
    }

    fn device(id: &str, port: u16, protocol: &str) -> Device {
        Device {
            id: id.into(),
            name: String::new(),
            ip: "127.0.0.1".into(),
            port,
            identify: String::new(),
            protocol: protocol.into(),
            status: "off".into(),
        }
    }

    #[tokio::test]
    async fn reconciles_add_and_delete() {
        let rtdb: Arc<dyn Rtdb> = Arc::new(MemoryRtdb::new());
        let inventory = Inventory::new(rtdb.clone());
        let cancel = CancellationToken::new();
        let supervisor = DeviceSupervisor::new(inventory.clone(), test_params());
        let task = tokio::spawn(supervisor.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Nothing listens on the port; the actor still gets created and
        // keeps retrying in the background
        inventory
            .create_device(&device("d1", 59001, "iec104"))
            .await
            .unwrap();
        // Non-iec104 devices never get an actor, but CRUD still works
        inventory
            .create_device(&device("d2", 59002, "modbus"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        inventory.delete_device("d1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
