//! Monitored item contract.
//!
//! An item is one switch or one dead-man file. Items are owned exclusively
//! by a single poller for their whole lifetime and are driven strictly in
//! list order.

use crate::cancel::CancellationToken;
use crate::error::ItemError;
use crate::panic::ItemPanic;

/// Capability set a poller needs from one switch or file.
pub trait MonitoredItem: Send {
    /// Stable identifier used in logs and trigger records.
    fn id(&self) -> &str;

    /// Evaluate the item once. `Ok(true)` means the item panics.
    ///
    /// Must return [`ItemError::Cancelled`] promptly once the attached
    /// token is cancelled.
    fn check(&mut self) -> Result<bool, ItemError>;

    /// Whether the item currently observes its off/triggered state.
    fn has_shut_down(&self) -> bool;

    /// Panics are recorded but must not fire the trigger.
    fn hold_back(&self) -> bool;

    fn panic(&self) -> ItemPanic;

    fn can_be_armed(&self) -> bool;

    fn arm_panic_mode(&mut self) -> bool;
    fn disarm_panic_mode(&mut self) -> bool;
    fn enter_safe_mode(&mut self) -> bool;
    fn enter_hold_back_mode(&mut self) -> bool;
    fn start_monitoring(&mut self) -> bool;
    fn stop_monitoring(&mut self) -> bool;

    /// Clear the panic state. Returns whether anything changed.
    fn reset_panic(&mut self) -> bool;

    fn set_cancellation_token(&mut self, token: CancellationToken);
    fn remove_cancellation_token(&mut self);

    /// Mail dispatch priority of the peer behind this item, if any.
    fn mail_priority(&self) -> Option<u32> {
        None
    }

    /// Whether the peer behind this item currently shows signs of life.
    fn is_live(&self) -> bool {
        true
    }
}

impl<T: MonitoredItem + ?Sized> MonitoredItem for Box<T> {
    fn id(&self) -> &str {
        (**self).id()
    }
    fn check(&mut self) -> Result<bool, ItemError> {
        (**self).check()
    }
    fn has_shut_down(&self) -> bool {
        (**self).has_shut_down()
    }
    fn hold_back(&self) -> bool {
        (**self).hold_back()
    }
    fn panic(&self) -> ItemPanic {
        (**self).panic()
    }
    fn can_be_armed(&self) -> bool {
        (**self).can_be_armed()
    }
    fn arm_panic_mode(&mut self) -> bool {
        (**self).arm_panic_mode()
    }
    fn disarm_panic_mode(&mut self) -> bool {
        (**self).disarm_panic_mode()
    }
    fn enter_safe_mode(&mut self) -> bool {
        (**self).enter_safe_mode()
    }
    fn enter_hold_back_mode(&mut self) -> bool {
        (**self).enter_hold_back_mode()
    }
    fn start_monitoring(&mut self) -> bool {
        (**self).start_monitoring()
    }
    fn stop_monitoring(&mut self) -> bool {
        (**self).stop_monitoring()
    }
    fn reset_panic(&mut self) -> bool {
        (**self).reset_panic()
    }
    fn set_cancellation_token(&mut self, token: CancellationToken) {
        (**self).set_cancellation_token(token)
    }
    fn remove_cancellation_token(&mut self) {
        (**self).remove_cancellation_token()
    }
    fn mail_priority(&self) -> Option<u32> {
        (**self).mail_priority()
    }
    fn is_live(&self) -> bool {
        (**self).is_live()
    }
}

/// Mode bookkeeping most item implementations share.
#[derive(Debug, Clone, Default)]
pub struct ItemModeState {
    pub armed: bool,
    pub hold_back: bool,
    pub safe_mode: bool,
    pub monitoring: bool,
    pub panic: ItemPanic,
    pub token: Option<CancellationToken>,
}

impl ItemModeState {
    pub fn arm(&mut self) -> bool {
        self.armed = true;
        self.hold_back = false;
        true
    }

    pub fn disarm(&mut self) -> bool {
        self.armed = false;
        self.hold_back = false;
        self.safe_mode = false;
        true
    }

    pub fn enter_safe_mode(&mut self) -> bool {
        self.safe_mode = true;
        true
    }

    pub fn enter_hold_back(&mut self) -> bool {
        self.hold_back = true;
        true
    }

    pub fn start(&mut self) -> bool {
        self.monitoring = true;
        true
    }

    pub fn stop(&mut self) -> bool {
        self.monitoring = false;
        self.armed = false;
        self.hold_back = false;
        self.safe_mode = false;
        true
    }

    pub fn reset_panic(&mut self) -> bool {
        let changed = self.panic.is_panic();
        self.panic = ItemPanic::None;
        changed
    }

    /// Fails with [`ItemError::Cancelled`] if the attached token fired.
    pub fn check_cancelled(&self) -> Result<(), ItemError> {
        match &self.token {
            Some(token) => token.check_item(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_clears_modes() {
        let mut state = ItemModeState::default();
        state.start();
        state.arm();
        state.enter_safe_mode();
        state.stop();
        assert!(!state.armed && !state.safe_mode && !state.monitoring);
    }

    #[test]
    fn reset_panic_reports_change() {
        let mut state = ItemModeState {
            panic: ItemPanic::Fault,
            ..Default::default()
        };
        assert!(state.reset_panic());
        assert!(!state.reset_panic());
    }

    #[test]
    fn cancelled_token_surfaces() {
        let token = CancellationToken::new();
        let state = ItemModeState {
            token: Some(token.clone()),
            ..Default::default()
        };
        assert!(state.check_cancelled().is_ok());
        token.cancel();
        assert!(matches!(state.check_cancelled(), Err(ItemError::Cancelled)));
    }
}
