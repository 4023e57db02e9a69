//! Command gateway
//!
//! Bridges synchronous control-plane requests to the asynchronous device
//! actors: validate the target, subscribe the per-point reply channel,
//! publish the request on the broadcast channel, then wait (bounded) for
//! the single reply the actor publishes back through the pipeline.

use std::time::Duration;

use tracing::debug;

use datacoll_rtdb::keyspace::channel;
use datacoll_rtdb::model::{PointRequest, SampleEvent};
use datacoll_rtdb::Inventory;

use crate::error::{CollSrvError, Result};

/// Interactive request kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Read the current value of a point
    Call,
    /// Drive a control point (select-and-execute on the wire)
    Ctrl,
}

/// Request/reply bridge between the HTTP layer and the actors
#[derive(Clone)]
pub struct CommandGateway {
    inventory: Inventory,
    reply_timeout: Duration,
}

impl CommandGateway {
    pub fn new(inventory: Inventory, reply_timeout: Duration) -> Self {
        Self {
            inventory,
            reply_timeout,
        }
    }

    /// Execute one interactive request and return the reply sample
    pub async fn execute(&self, kind: RequestKind, request: &PointRequest) -> Result<SampleEvent> {
        if kind == RequestKind::Ctrl && request.value.is_none() {
            return Err(CollSrvError::Validation(
                "device_ctrl requires a value".into(),
            ));
        }

        // Validate each level so the caller learns which id is wrong
        if self.inventory.get_device(&request.device_id).await?.is_none() {
            return Err(CollSrvError::NotFound(format!("device {}", request.device_id)));
        }
        if self.inventory.get_term(&request.term_id).await?.is_none() {
            return Err(CollSrvError::NotFound(format!("term {}", request.term_id)));
        }
        if self.inventory.get_item(&request.item_id).await?.is_none() {
            return Err(CollSrvError::NotFound(format!("item {}", request.item_id)));
        }
        if self
            .inventory
            .get_binding(&request.term_id, &request.item_id)
            .await?
            .is_none()
        {
            return Err(CollSrvError::NotFound(format!(
                "term_item {}:{}",
                request.term_id, request.item_id
            )));
        }

        let (broadcast, reply_channel) = match kind {
            RequestKind::Call => (
                channel::DEVICE_CALL,
                channel::device_call(&request.device_id, &request.term_id, &request.item_id),
            ),
            RequestKind::Ctrl => (
                channel::DEVICE_CTRL,
                channel::device_ctrl(&request.device_id, &request.term_id, &request.item_id),
            ),
        };

        // Subscribe before publishing so the reply cannot slip past
        let mut replies = self
            .inventory
            .rtdb()
            .subscribe(std::slice::from_ref(&reply_channel))
            .await?;
        let payload = serde_json::to_string(request)?;
        self.inventory.rtdb().publish(broadcast, &payload).await?;
        debug!("gateway {kind:?} published for {reply_channel}");

        match tokio::time::timeout(self.reply_timeout, replies.recv()).await {
            Ok(Some(message)) => Ok(serde_json::from_str(&message.payload)?),
            Ok(None) => Err(CollSrvError::internal("reply channel closed")),
            Err(_) => Err(CollSrvError::GatewayTimeout(format!(
                "no reply on {reply_channel} within {:?}",
                self.reply_timeout
            ))),
        }
    }
}
