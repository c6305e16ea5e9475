//! Pushing notifications to clients, outside of any request.
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, trace};

use crate::channel::MessageChannel;
use crate::envelope::JsonRpcEnvelope;
use crate::types::JsonRpcMessage;
use crate::{Result, RpcBusError};

/// Which sessions subscribed to which notification methods.  Held in memory only.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    bindings: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl SubscriptionRegistry {
    /// Returns `false` if the session was already bound to the method.
    pub fn bind(&self, session_id: &str, method: &str) -> bool {
        let added = self
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(method.to_string())
            .or_default()
            .insert(session_id.to_string());

        debug!(session_id, method, added, "Bound subscription");
        added
    }

    pub fn unbind(&self, session_id: &str, method: &str) -> bool {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let Some(sessions) = bindings.get_mut(method) else {
            return false;
        };

        let removed = sessions.remove(session_id);
        if sessions.is_empty() {
            bindings.remove(method);
        }
        removed
    }

    /// Drop every binding of a session, for example when its connection closes.  Returns the
    /// number of bindings removed.
    pub fn remove_session(&self, session_id: &str) -> usize {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        bindings.retain(|_, sessions| {
            if sessions.remove(session_id) {
                removed += 1;
            }
            !sessions.is_empty()
        });

        debug!(session_id, removed, "Removed session subscriptions");
        removed
    }

    pub fn sessions_for(&self, method: &str) -> Vec<String> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .map(|sessions| sessions.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_bound(&self, session_id: &str, method: &str) -> bool {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .is_some_and(|sessions| sessions.contains(session_id))
    }
}

/// Sends JSON-RPC notifications to sessions through the outbound channel.
#[derive(Clone)]
pub struct JsonRpcSendingTemplate {
    envelope: JsonRpcEnvelope,
    outbound: Arc<dyn MessageChannel<JsonRpcMessage>>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl JsonRpcSendingTemplate {
    pub fn new(outbound: Arc<dyn MessageChannel<JsonRpcMessage>>, subscriptions: Arc<SubscriptionRegistry>) -> Self {
        Self {
            envelope: JsonRpcEnvelope,
            outbound,
            subscriptions,
        }
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    /// Serialize `payload` as the params of a `method` notification and send it to one session.
    ///
    /// Returns whether the outbound channel accepted the message.
    pub fn convert_and_send<P: Serialize>(&self, session_id: &str, method: &str, payload: &P) -> Result<bool> {
        let params = serde_json::to_value(payload).map_err(|source| RpcBusError::SerResult {
            source,
            type_name: std::any::type_name::<P>(),
        })?;

        let message = self.envelope.notification(session_id, method, Some(params))?;
        let sent = self.outbound.send(message);
        trace!(session_id, method, sent, "Sent notification");

        Ok(sent)
    }

    /// Send a `method` notification to every session subscribed to it.  Returns how many were
    /// accepted by the outbound channel.
    pub fn broadcast<P: Serialize>(&self, method: &str, payload: &P) -> Result<usize> {
        let mut sent = 0;
        for session_id in self.subscriptions.sessions_for(method) {
            if self.convert_and_send(&session_id, method, payload)? {
                sent += 1;
            }
        }

        Ok(sent)
    }
}
