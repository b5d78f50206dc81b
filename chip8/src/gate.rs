//! Key-wait gate.
//!
//! The instruction `Fx0A` (`LD Vx, K`) stops execution until a key is
//! pressed. Rather than stalling the program counter, the machine moves
//! into the `AwaitingKey` state, remembering which register receives the
//! key. The execution engine refuses to dispatch while in this state, so
//! only one wait can be pending at a time.

/// Execution state of the interpreter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    /// Instructions are dispatched normally.
    #[default]
    Running,
    /// Suspended until a key press is written to register `Vx`.
    AwaitingKey { register: u8 },
}

impl ExecState {
    #[inline(always)]
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::AwaitingKey { .. })
    }

    /// Transition from `Running` to `AwaitingKey`.
    pub(crate) fn suspend(&mut self, register: u8) {
        debug_assert_eq!(*self, Self::Running, "nested key wait");
        *self = Self::AwaitingKey { register };
    }

    /// Transition back to `Running`.
    ///
    /// Returns the register waiting for the key, or `None` if nothing
    /// was waiting.
    pub(crate) fn resume(&mut self) -> Option<u8> {
        match std::mem::take(self) {
            Self::AwaitingKey { register } => Some(register),
            Self::Running => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_resume_once() {
        let mut state = ExecState::default();
        assert_eq!(state.resume(), None);

        state.suspend(0xA);
        assert!(state.is_waiting());
        assert_eq!(state.resume(), Some(0xA));
        assert_eq!(state, ExecState::Running);
        assert_eq!(state.resume(), None);
    }
}
