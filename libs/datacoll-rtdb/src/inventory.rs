//! Typed inventory layer over the realtime store
//!
//! Source of truth for devices, terminals, points and bindings. Every
//! mutation publishes a JSON message on the matching `CHANNEL:*` channel
//! so the device supervisor (and any other consumer) can reconcile.
//! Deletes cascade: removing a device takes its terminals, bindings,
//! inverse mappings, time series and frame log with it.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::error::{InventoryError, InventoryResult};
use crate::keyspace::{self, channel};
use crate::model::{Device, Item, PointBinding, SampleEvent, Term};
use crate::traits::Rtdb;

/// Typed CRUD over the inventory keyspace
#[derive(Clone)]
pub struct Inventory {
    rtdb: Arc<dyn Rtdb>,
}

impl Inventory {
    pub fn new(rtdb: Arc<dyn Rtdb>) -> Self {
        Self { rtdb }
    }

    pub fn rtdb(&self) -> &Arc<dyn Rtdb> {
        &self.rtdb
    }

    // ========== Devices ==========

    pub async fn list_devices(&self) -> InventoryResult<Vec<Device>> {
        let mut devices = Vec::new();
        for id in self.rtdb.smembers(keyspace::SET_DEVICE).await? {
            if let Some(device) = self.get_device(&id).await? {
                devices.push(device);
            }
        }
        Ok(devices)
    }

    pub async fn get_device(&self, device_id: &str) -> InventoryResult<Option<Device>> {
        let fields = self.rtdb.hash_get_all(&keyspace::device(device_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(Device::from_fields(&fields)?))
    }

    pub async fn create_device(&self, device: &Device) -> InventoryResult<()> {
        let key = keyspace::device(&device.id);
        if self.rtdb.exists(&key).await? {
            return Err(InventoryError::Conflict(format!("device {}", device.id)));
        }
        self.rtdb.hash_set_multi(&key, &device.to_fields()).await?;
        self.rtdb.sadd(keyspace::SET_DEVICE, &device.id).await?;
        self.publish_json(channel::DEVICE_ADD, device).await?;
        Ok(())
    }

    pub async fn update_device(&self, device_id: &str, device: &Device) -> InventoryResult<()> {
        if self.get_device(device_id).await?.is_none() {
            return Err(InventoryError::NotFound(format!("device {device_id}")));
        }
        if device.id != device_id {
            // Identity change is modeled as delete + re-add
            self.delete_device(device_id).await?;
            self.create_device(device).await?;
            return Ok(());
        }
        self.rtdb
            .hash_set_multi(&keyspace::device(device_id), &device.to_fields())
            .await?;
        self.publish_json(channel::DEVICE_FRESH, device).await?;
        Ok(())
    }

    pub async fn delete_device(&self, device_id: &str) -> InventoryResult<()> {
        if self.get_device(device_id).await?.is_none() {
            return Err(InventoryError::NotFound(format!("device {device_id}")));
        }
        self.rtdb
            .publish(channel::DEVICE_DEL, &json!(device_id).to_string())
            .await?;

        let mut doomed = vec![keyspace::device(device_id), keyspace::frame_log(device_id)];

        // Terminals attached to the device, and their bindings
        for term_id in self.rtdb.smembers(&keyspace::device_terms(device_id)).await? {
            doomed.push(keyspace::term(&term_id));
            self.rtdb.srem(keyspace::SET_TERM, &term_id).await?;
            doomed.extend(
                self.rtdb
                    .scan_match(&format!("HS:TERM_ITEM:{term_id}:*"))
                    .await?,
            );
            doomed.push(keyspace::term_items(&term_id));
        }
        doomed.push(keyspace::device_terms(device_id));

        // Time series and inverse mappings
        doomed.extend(
            self.rtdb
                .scan_match(&format!("LST:DATA_TIME:{device_id}:*"))
                .await?,
        );
        doomed.extend(self.rtdb.scan_match(&format!("HS:DATA:{device_id}:*")).await?);
        doomed.extend(
            self.rtdb
                .scan_match(&format!("HS:MAPPING:*:{device_id}:*"))
                .await?,
        );

        self.rtdb.srem(keyspace::SET_DEVICE, device_id).await?;
        self.rtdb.del(&doomed).await?;
        Ok(())
    }

    /// Engine hook: flip the `status` field on link up/down
    ///
    /// A no-op when the device has been deleted under the running actor.
    pub async fn set_device_status(&self, device_id: &str, online: bool) -> InventoryResult<()> {
        let key = keyspace::device(device_id);
        if self.rtdb.exists(&key).await? {
            self.rtdb
                .hash_set(&key, "status", if online { "on" } else { "off" })
                .await?;
        }
        Ok(())
    }

    // ========== Terminals ==========

    pub async fn list_terms(&self) -> InventoryResult<Vec<Term>> {
        let mut terms = Vec::new();
        for id in self.rtdb.smembers(keyspace::SET_TERM).await? {
            if let Some(term) = self.get_term(&id).await? {
                terms.push(term);
            }
        }
        Ok(terms)
    }

    pub async fn get_term(&self, term_id: &str) -> InventoryResult<Option<Term>> {
        let fields = self.rtdb.hash_get_all(&keyspace::term(term_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(Term::from_fields(&fields)?))
    }

    pub async fn create_term(&self, term: &Term) -> InventoryResult<()> {
        let key = keyspace::term(&term.id);
        if self.rtdb.exists(&key).await? {
            return Err(InventoryError::Conflict(format!("term {}", term.id)));
        }
        self.rtdb.hash_set_multi(&key, &term.to_fields()).await?;
        self.rtdb.sadd(keyspace::SET_TERM, &term.id).await?;
        self.rtdb
            .sadd(&keyspace::device_terms(&term.device_id), &term.id)
            .await?;
        self.publish_json(channel::TERM_ADD, term).await?;
        Ok(())
    }

    pub async fn update_term(&self, term_id: &str, term: &Term) -> InventoryResult<()> {
        let Some(old) = self.get_term(term_id).await? else {
            return Err(InventoryError::NotFound(format!("term {term_id}")));
        };
        if term.id != term_id {
            self.delete_term(term_id).await?;
            self.create_term(term).await?;
            return Ok(());
        }
        self.rtdb
            .hash_set_multi(&keyspace::term(term_id), &term.to_fields())
            .await?;
        if term.device_id != old.device_id {
            // Moved between devices: both supervisors must reconcile
            self.rtdb
                .srem(&keyspace::device_terms(&old.device_id), term_id)
                .await?;
            self.rtdb
                .sadd(&keyspace::device_terms(&term.device_id), term_id)
                .await?;
            self.publish_json(channel::TERM_DEL, &old).await?;
            self.publish_json(channel::TERM_ADD, term).await?;
        } else {
            self.publish_json(channel::TERM_FRESH, term).await?;
        }
        Ok(())
    }

    pub async fn delete_term(&self, term_id: &str) -> InventoryResult<()> {
        let Some(term) = self.get_term(term_id).await? else {
            return Err(InventoryError::NotFound(format!("term {term_id}")));
        };
        self.rtdb
            .publish(
                channel::TERM_DEL,
                &json!({ "device_id": &term.device_id, "term_id": term_id }).to_string(),
            )
            .await?;

        let mut doomed = vec![keyspace::term(term_id), keyspace::term_items(term_id)];
        self.rtdb.srem(keyspace::SET_TERM, term_id).await?;
        self.rtdb
            .srem(&keyspace::device_terms(&term.device_id), term_id)
            .await?;

        doomed.extend(self.rtdb.scan_match(&format!("HS:TERM_ITEM:{term_id}:*")).await?);
        doomed.extend(
            self.rtdb
                .scan_match(&format!("LST:DATA_TIME:*:{term_id}:*"))
                .await?,
        );
        doomed.extend(self.rtdb.scan_match(&format!("HS:DATA:*:{term_id}:*")).await?);

        // Inverse mappings carry the term id in their payload, not the key
        for key in self.rtdb.scan_match("HS:MAPPING:*").await? {
            if self.rtdb.hash_get(&key, "term_id").await?.as_deref() == Some(term_id) {
                doomed.push(key);
            }
        }

        self.rtdb.del(&doomed).await?;
        Ok(())
    }

    // ========== Items ==========

    pub async fn list_items(&self) -> InventoryResult<Vec<Item>> {
        let mut items = Vec::new();
        for id in self.rtdb.smembers(keyspace::SET_ITEM).await? {
            if let Some(item) = self.get_item(&id).await? {
                items.push(item);
            }
        }
        Ok(items)
    }

    pub async fn get_item(&self, item_id: &str) -> InventoryResult<Option<Item>> {
        let fields = self.rtdb.hash_get_all(&keyspace::item(item_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(Item::from_fields(&fields)?))
    }

    pub async fn create_item(&self, item: &Item) -> InventoryResult<()> {
        let key = keyspace::item(&item.id);
        if self.rtdb.exists(&key).await? {
            return Err(InventoryError::Conflict(format!("item {}", item.id)));
        }
        self.rtdb.hash_set_multi(&key, &item.to_fields()).await?;
        self.rtdb.sadd(keyspace::SET_ITEM, &item.id).await?;
        Ok(())
    }

    pub async fn update_item(&self, item_id: &str, item: &Item) -> InventoryResult<()> {
        if self.get_item(item_id).await?.is_none() {
            return Err(InventoryError::NotFound(format!("item {item_id}")));
        }
        if item.id != item_id {
            self.delete_item(item_id).await?;
            self.create_item(item).await?;
            return Ok(());
        }
        self.rtdb
            .hash_set_multi(&keyspace::item(item_id), &item.to_fields())
            .await?;
        Ok(())
    }

    pub async fn delete_item(&self, item_id: &str) -> InventoryResult<()> {
        if self.get_item(item_id).await?.is_none() {
            return Err(InventoryError::NotFound(format!("item {item_id}")));
        }
        self.rtdb.srem(keyspace::SET_ITEM, item_id).await?;
        self.rtdb.del(&[keyspace::item(item_id)]).await?;
        Ok(())
    }

    // ========== Bindings ==========

    pub async fn get_binding(
        &self,
        term_id: &str,
        item_id: &str,
    ) -> InventoryResult<Option<PointBinding>> {
        let fields = self
            .rtdb
            .hash_get_all(&keyspace::term_item(term_id, item_id))
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(PointBinding::from_fields(&fields)?))
    }

    /// Inverse lookup consulted on every inbound data object
    pub async fn lookup_mapping(
        &self,
        protocol: &str,
        device_id: &str,
        protocol_code: &str,
    ) -> InventoryResult<Option<PointBinding>> {
        let fields = self
            .rtdb
            .hash_get_all(&keyspace::mapping(protocol, device_id, protocol_code))
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(PointBinding::from_fields(&fields)?))
    }

    pub async fn create_binding(&self, binding: &PointBinding) -> InventoryResult<()> {
        let Some(term) = self.get_term(&binding.term_id).await? else {
            return Err(InventoryError::NotFound(format!("term {}", binding.term_id)));
        };
        if self.get_item(&binding.item_id).await?.is_none() {
            return Err(InventoryError::NotFound(format!("item {}", binding.item_id)));
        }
        let key = keyspace::term_item(&binding.term_id, &binding.item_id);
        if self.rtdb.exists(&key).await? {
            return Err(InventoryError::Conflict(format!(
                "term_item {}:{}",
                binding.term_id, binding.item_id
            )));
        }
        let Some(device) = self.get_device(&term.device_id).await? else {
            return Err(InventoryError::NotFound(format!("device {}", term.device_id)));
        };

        let mut binding = binding.clone();
        binding.device_id = device.id.clone();

        self.rtdb.hash_set_multi(&key, &binding.to_fields()).await?;
        self.rtdb
            .sadd(&keyspace::term_items(&binding.term_id), &binding.item_id)
            .await?;

        // Drop any stale mapping still pointing at this (term, item)
        let mut stale = Vec::new();
        for map_key in self
            .rtdb
            .scan_match(&format!("HS:MAPPING:{}:*:*", device.protocol.to_uppercase()))
            .await?
        {
            let fields = self.rtdb.hash_get_all(&map_key).await?;
            if fields.get("term_id") == Some(&binding.term_id)
                && fields.get("item_id") == Some(&binding.item_id)
            {
                stale.push(map_key);
            }
        }
        if !stale.is_empty() {
            self.rtdb.del(&stale).await?;
        }

        self.rtdb
            .hash_set_multi(
                &keyspace::mapping(&device.protocol, &device.id, &binding.protocol_code),
                &binding.to_fields(),
            )
            .await?;
        self.publish_json(channel::TERM_ITEM_ADD, &binding).await?;
        Ok(())
    }

    pub async fn delete_binding(&self, term_id: &str, item_id: &str) -> InventoryResult<()> {
        let Some(binding) = self.get_binding(term_id, item_id).await? else {
            return Err(InventoryError::NotFound(format!(
                "term_item {term_id}:{item_id}"
            )));
        };
        self.rtdb
            .publish(
                channel::TERM_ITEM_DEL,
                &json!({
                    "device_id": &binding.device_id,
                    "term_id": term_id,
                    "item_id": item_id,
                })
                .to_string(),
            )
            .await?;

        let mut doomed = vec![keyspace::term_item(term_id, item_id)];
        self.rtdb.srem(&keyspace::term_items(term_id), item_id).await?;
        if let Some(device) = self.get_device(&binding.device_id).await? {
            doomed.push(keyspace::mapping(
                &device.protocol,
                &device.id,
                &binding.protocol_code,
            ));
        }
        doomed.extend(
            self.rtdb
                .scan_match(&format!("LST:DATA_TIME:*:{term_id}:{item_id}"))
                .await?,
        );
        doomed.extend(
            self.rtdb
                .scan_match(&format!("HS:DATA:*:{term_id}:{item_id}"))
                .await?,
        );
        self.rtdb.del(&doomed).await?;
        Ok(())
    }

    // ========== Samples ==========

    /// Append one sample to the per-binding series (store only, no publish)
    pub async fn store_sample(
        &self,
        device_id: &str,
        term_id: &str,
        item_id: &str,
        time: &str,
        value: f64,
    ) -> InventoryResult<()> {
        self.rtdb
            .list_rpush(&keyspace::data_time(device_id, term_id, item_id), time)
            .await?;
        self.rtdb
            .hash_set(
                &keyspace::data(device_id, term_id, item_id),
                time,
                &value.to_string(),
            )
            .await?;
        Ok(())
    }

    /// Latest `limit` samples for a binding, oldest first
    pub async fn latest_samples(
        &self,
        device_id: &str,
        term_id: &str,
        item_id: &str,
        limit: usize,
    ) -> InventoryResult<Vec<SampleEvent>> {
        let times = self
            .rtdb
            .list_range(
                &keyspace::data_time(device_id, term_id, item_id),
                -(limit as isize),
                -1,
            )
            .await?;
        let data_key = keyspace::data(device_id, term_id, item_id);
        let mut samples = Vec::with_capacity(times.len());
        for time in times {
            let Some(raw) = self.rtdb.hash_get(&data_key, &time).await? else {
                debug!("data series missing value for timestamp {time}");
                continue;
            };
            let value = raw
                .parse()
                .map_err(|e| InventoryError::Invalid(format!("bad stored value: {e}")))?;
            samples.push(SampleEvent {
                device_id: device_id.to_string(),
                term_id: term_id.to_string(),
                item_id: item_id.to_string(),
                time,
                value,
            });
        }
        Ok(samples)
    }

    async fn publish_json<T: serde::Serialize>(
        &self,
        channel: &str,
        value: &T,
    ) -> InventoryResult<()> {
        let payload = serde_json::to_string(value)
            .map_err(|e| InventoryError::Invalid(format!("event serialization: {e}")))?;
        self.rtdb.publish(channel, &payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_impl::MemoryRtdb;
    use crate::model::{Device, Item, PointBinding, Term};

    fn inventory() -> Inventory {
        Inventory::new(Arc::new(MemoryRtdb::new()))
    }

    fn device(id: &str) -> Device {
        Device {
            id: id.into(),
            name: format!("device {id}"),
            ip: "127.0.0.1".into(),
            port: 2404,
            identify: String::new(),
            protocol: "iec104".into(),
            status: "off".into(),
        }
    }

    fn term(id: &str, device_id: &str) -> Term {
        Term {
            id: id.into(),
            name: format!("term {id}"),
            address: "1".into(),
            identify: String::new(),
            protocol: "iec104".into(),
            device_id: device_id.into(),
        }
    }

    fn item(id: &str) -> Item {
        Item {
            id: id.into(),
            name: format!("item {id}"),
            view_code: String::new(),
            func_type: String::new(),
        }
    }

    fn binding(term_id: &str, item_id: &str, code: &str) -> PointBinding {
        PointBinding {
            term_id: term_id.into(),
            item_id: item_id.into(),
            device_id: String::new(),
            protocol_code: code.into(),
            code_type: Some(50),
            coefficient: 2.0,
            base_val: 1.0,
        }
    }

    async fn seed(inv: &Inventory) {
        inv.create_device(&device("d1")).await.unwrap();
        inv.create_term(&term("t1", "d1")).await.unwrap();
        inv.create_item(&item("i1")).await.unwrap();
        inv.create_binding(&binding("t1", "i1", "400")).await.unwrap();
    }

    #[tokio::test]
    async fn create_publishes_and_duplicate_conflicts() {
        let inv = inventory();
        let mut sub = inv
            .rtdb()
            .subscribe(&[channel::DEVICE_ADD.to_string()])
            .await
            .unwrap();
        inv.create_device(&device("d1")).await.unwrap();

        let msg = sub.recv().await.unwrap();
        let published: Device = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(published.id, "d1");

        let err = inv.create_device(&device("d1")).await.unwrap_err();
        assert!(matches!(err, InventoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn binding_reachable_both_ways() {
        let inv = inventory();
        seed(&inv).await;

        let by_ids = inv.get_binding("t1", "i1").await.unwrap().unwrap();
        let by_addr = inv
            .lookup_mapping("iec104", "d1", "400")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_ids, by_addr);
        assert_eq!(by_ids.device_id, "d1");
        assert_eq!(by_ids.scale(10.0), 21.0);
    }

    #[tokio::test]
    async fn cascading_device_delete() {
        let inv = inventory();
        seed(&inv).await;
        inv.store_sample("d1", "t1", "i1", "2026-08-01T00:00:00.000", 1.5)
            .await
            .unwrap();

        inv.delete_device("d1").await.unwrap();

        let rtdb = inv.rtdb();
        assert!(!rtdb.exists("HS:DEVICE:d1").await.unwrap());
        assert!(!rtdb.exists("HS:TERM:t1").await.unwrap());
        assert!(!rtdb.exists("HS:TERM_ITEM:t1:i1").await.unwrap());
        assert!(!rtdb.exists("HS:MAPPING:IEC104:d1:400").await.unwrap());
        assert!(!rtdb.exists("HS:DATA:d1:t1:i1").await.unwrap());
        assert!(!rtdb.exists("LST:DATA_TIME:d1:t1:i1").await.unwrap());
        // Item survives: it is an abstract identity, not device-owned
        assert!(rtdb.exists("HS:ITEM:i1").await.unwrap());
    }

    #[tokio::test]
    async fn update_with_transport_change_signals_fresh() {
        let inv = inventory();
        seed(&inv).await;
        let mut sub = inv
            .rtdb()
            .subscribe(&[channel::DEVICE_FRESH.to_string()])
            .await
            .unwrap();

        let mut changed = device("d1");
        changed.port = 2405;
        inv.update_device("d1", &changed).await.unwrap();

        let msg = sub.recv().await.unwrap();
        let fresh: Device = serde_json::from_str(&msg.payload).unwrap();
        assert!(device("d1").transport_changed(&fresh));
    }

    #[tokio::test]
    async fn latest_samples_ordered() {
        let inv = inventory();
        seed(&inv).await;
        for (n, ts) in [
            "2026-08-01T00:00:00.000",
            "2026-08-01T00:00:01.000",
            "2026-08-01T00:00:02.000",
        ]
        .iter()
        .enumerate()
        {
            inv.store_sample("d1", "t1", "i1", *ts, n as f64).await.unwrap();
        }
        let samples = inv.latest_samples("d1", "t1", "i1", 2).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 1.0);
        assert_eq!(samples[1].value, 2.0);
        assert_eq!(samples[1].time, "2026-08-01T00:00:02.000");
    }

    #[tokio::test]
    async fn delete_binding_removes_mapping_and_series() {
        let inv = inventory();
        seed(&inv).await;
        inv.store_sample("d1", "t1", "i1", "2026-08-01T00:00:00.000", 1.0)
            .await
            .unwrap();
        inv.delete_binding("t1", "i1").await.unwrap();

        assert!(inv.get_binding("t1", "i1").await.unwrap().is_none());
        assert!(inv
            .lookup_mapping("iec104", "d1", "400")
            .await
            .unwrap()
            .is_none());
        assert!(!inv.rtdb().exists("HS:DATA:d1:t1:i1").await.unwrap());
    }
}
