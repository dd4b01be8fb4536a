use serde::{Deserialize, Serialize};

/// Lifecycle state of a driver's poll task.
///
/// `STOPPED -> CONNECTING -> ONLINE <-> ERROR -> OFFLINE -> STOPPED`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    Stopped,
    Connecting,
    Online,
    Error,
    Offline,
}

impl DriverState {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }

    pub fn is_running(&self) -> bool {
        !matches!(self, Self::Stopped)
    }

    /// `start()` moves a stopped driver into its connect attempt.
    pub fn to_connecting(&self) -> Result<Self, &'static str> {
        match self {
            Self::Stopped => Ok(Self::Connecting),
            _ => Err("can only start from Stopped"),
        }
    }

    /// A successful `connect`/`read` brings the driver online from any
    /// in-progress or degraded state, including a prior OFFLINE.
    pub fn to_online(&self) -> Result<Self, &'static str> {
        match self {
            Self::Connecting | Self::Online | Self::Error | Self::Offline => Ok(Self::Online),
            _ => Err("can only go online from Connecting, Online, Error or Offline"),
        }
    }

    /// A failed `connect` or `read` moves the driver to Error; the error
    /// counter (owned by the supervisor) decides whether this escalates to
    /// Offline.
    pub fn to_error(&self) -> Result<Self, &'static str> {
        match self {
            Self::Connecting | Self::Online | Self::Error => Ok(Self::Error),
            _ => Err("can only error from Connecting, Online or Error"),
        }
    }

    /// Consecutive error threshold reached.
    pub fn to_offline(&self) -> Result<Self, &'static str> {
        match self {
            Self::Error | Self::Online | Self::Connecting => Ok(Self::Offline),
            _ => Err("can only go offline from Connecting, Online or Error"),
        }
    }

    /// `stop()` is valid from any state and always succeeds.
    pub fn to_stopped(&self) -> Self {
        Self::Stopped
    }
}

impl Default for DriverState {
    fn default() -> Self {
        Self::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_stopped() {
        let state = DriverState::default();
        assert_eq!(state, DriverState::Stopped);
        assert!(!state.is_running());
    }

    #[test]
    fn start_transitions_to_connecting() {
        let next = DriverState::Stopped.to_connecting().unwrap();
        assert_eq!(next, DriverState::Connecting);
        assert!(next.is_running());
    }

    #[test]
    fn cannot_start_twice() {
        assert!(DriverState::Connecting.to_connecting().is_err());
        assert!(DriverState::Online.to_connecting().is_err());
    }

    #[test]
    fn connecting_to_online_on_success() {
        let next = DriverState::Connecting.to_online().unwrap();
        assert_eq!(next, DriverState::Online);
        assert!(next.is_online());
    }

    #[test]
    fn connecting_to_error_on_failure() {
        let next = DriverState::Connecting.to_error().unwrap();
        assert_eq!(next, DriverState::Error);
        assert!(!next.is_online());
    }

    #[test]
    fn online_and_error_oscillate() {
        let mut state = DriverState::Online;
        state = state.to_error().unwrap();
        assert_eq!(state, DriverState::Error);
        state = state.to_online().unwrap();
        assert_eq!(state, DriverState::Online);
    }

    #[test]
    fn error_escalates_to_offline() {
        let next = DriverState::Error.to_offline().unwrap();
        assert_eq!(next, DriverState::Offline);
        assert!(!next.is_online());
    }

    #[test]
    fn offline_recovers_directly_to_online() {
        let next = DriverState::Offline.to_online().unwrap();
        assert_eq!(next, DriverState::Online);
    }

    #[test]
    fn stop_is_valid_from_any_state() {
        for state in [
            DriverState::Stopped,
            DriverState::Connecting,
            DriverState::Online,
            DriverState::Error,
            DriverState::Offline,
        ] {
            assert_eq!(state.to_stopped(), DriverState::Stopped);
        }
    }
}
