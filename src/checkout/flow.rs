use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::error::StorefrontError;

/// `details → processing → success → details`, with `processing → details`
/// on failure. `details` is both the initial and the retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutPhase {
    Details,
    Processing,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    Pay,
    Fail,
    Succeed,
    Finish,
}

impl CheckoutPhase {
    pub fn next(self, event: FlowEvent) -> Option<CheckoutPhase> {
        match (self, event) {
            (CheckoutPhase::Details, FlowEvent::Pay) => Some(CheckoutPhase::Processing),
            (CheckoutPhase::Processing, FlowEvent::Fail) => Some(CheckoutPhase::Details),
            (CheckoutPhase::Processing, FlowEvent::Succeed) => Some(CheckoutPhase::Success),
            (CheckoutPhase::Success, FlowEvent::Finish) => Some(CheckoutPhase::Details),
            _ => None,
        }
    }
}

/// Per-user checkout phases. Users without an entry are in `details`.
#[derive(Debug, Default)]
pub struct CheckoutFlows {
    phases: Mutex<HashMap<String, CheckoutPhase>>,
}

impl CheckoutFlows {
    pub fn phase(&self, user_id: &str) -> CheckoutPhase {
        let phases = self.phases.lock().unwrap_or_else(|e| e.into_inner());
        phases.get(user_id).copied().unwrap_or(CheckoutPhase::Details)
    }

    fn apply(&self, user_id: &str, event: FlowEvent) -> Result<CheckoutPhase, StorefrontError> {
        let mut phases = self.phases.lock().unwrap_or_else(|e| e.into_inner());
        let current = phases.get(user_id).copied().unwrap_or(CheckoutPhase::Details);
        let Some(next) = current.next(event) else {
            return Err(StorefrontError::Conflict(match current {
                CheckoutPhase::Processing => "a payment is already being processed".to_string(),
                _ => format!("cannot {:?} while checkout is {:?}", event, current).to_lowercase(),
            }));
        };
        if next == CheckoutPhase::Details {
            phases.remove(user_id);
        } else {
            phases.insert(user_id.to_string(), next);
        }
        Ok(next)
    }

    /// Moves the user into `processing`. A second call while the first is
    /// still processing is refused, so the same payment cannot run twice.
    pub fn begin(&self, user_id: &str) -> Result<FlowGuard<'_>, StorefrontError> {
        self.apply(user_id, FlowEvent::Pay)?;
        Ok(FlowGuard {
            flows: self,
            user_id: user_id.to_string(),
        })
    }
}

/// Holds a user in `processing`/`success`; dropping it always lands back in
/// `details`, whether the flow finished, failed or was abandoned.
pub struct FlowGuard<'a> {
    flows: &'a CheckoutFlows,
    user_id: String,
}

impl FlowGuard<'_> {
    pub fn succeed(&self) -> Result<(), StorefrontError> {
        self.flows.apply(&self.user_id, FlowEvent::Succeed).map(|_| ())
    }
}

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        let event = match self.flows.phase(&self.user_id) {
            CheckoutPhase::Processing => FlowEvent::Fail,
            CheckoutPhase::Success => FlowEvent::Finish,
            CheckoutPhase::Details => return,
        };
        if let Err(e) = self.flows.apply(&self.user_id, event) {
            tracing::warn!(user_id = %self.user_id, "checkout flow reset failed: {}", e);
        }
    }
}
