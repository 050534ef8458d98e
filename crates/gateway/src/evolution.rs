//! Evolution transactions.
//!
//! A single-flight guard around self-modification flows: a transaction
//! is opened before the agent edits its own deployment, and committing
//! it requests a `self_mod` restart. At most one transaction is open at
//! a time.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

use drost_domain::error::{Error, Result};
use drost_domain::runtime_event::GatewayRuntimeEvent;

use crate::events::EventHub;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionTx {
    pub tx_id: String,
    pub description: String,
    pub started_at: DateTime<Utc>,
}

pub struct EvolutionManager {
    enabled: bool,
    hub: Arc<EventHub>,
    current: Mutex<Option<EvolutionTx>>,
}

impl EvolutionManager {
    pub fn new(enabled: bool, hub: Arc<EventHub>) -> Self {
        Self {
            enabled,
            hub,
            current: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<EvolutionTx> {
        self.current.lock().clone()
    }

    pub fn begin(&self, description: &str) -> Result<EvolutionTx> {
        if !self.enabled {
            return Err(Error::Disabled("evolution is disabled".into()));
        }
        if description.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "evolution transaction needs a description".into(),
            ));
        }

        let mut current = self.current.lock();
        if let Some(open) = current.as_ref() {
            return Err(Error::Busy(format!(
                "transaction '{}' is already open",
                open.tx_id
            )));
        }

        let tx = EvolutionTx {
            tx_id: uuid::Uuid::new_v4().to_string(),
            description: description.trim().to_owned(),
            started_at: Utc::now(),
        };
        *current = Some(tx.clone());
        self.hub.publish(GatewayRuntimeEvent::EvolutionBegan {
            tx_id: tx.tx_id.clone(),
            description: tx.description.clone(),
        });
        Ok(tx)
    }

    /// Close the transaction for commit. The caller follows up with a
    /// `self_mod` restart request; a blocked restart surfaces as
    /// `failed` to the evolution caller.
    pub fn commit(&self, tx_id: &str) -> Result<EvolutionTx> {
        let mut current = self.current.lock();
        match current.as_ref() {
            Some(open) if open.tx_id == tx_id => {
                let tx = current.take().expect("checked above");
                self.hub.publish(GatewayRuntimeEvent::EvolutionCommitted {
                    tx_id: tx.tx_id.clone(),
                });
                Ok(tx)
            }
            Some(open) => Err(Error::InvalidRequest(format!(
                "transaction mismatch: open is '{}'",
                open.tx_id
            ))),
            None => Err(Error::InvalidRequest("no open transaction".into())),
        }
    }

    pub fn abort(&self, tx_id: &str, reason: &str) -> Result<()> {
        let mut current = self.current.lock();
        match current.as_ref() {
            Some(open) if open.tx_id == tx_id => {
                let tx = current.take().expect("checked above");
                self.hub.publish(GatewayRuntimeEvent::EvolutionAborted {
                    tx_id: tx.tx_id,
                    reason: reason.to_owned(),
                });
                Ok(())
            }
            _ => Err(Error::InvalidRequest(format!(
                "no open transaction '{tx_id}'"
            ))),
        }
    }
}
