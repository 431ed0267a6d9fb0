//! Read-only aircraft descriptor assembled from bus replies.

use crate::config_request::ConfigReply;

/// Snapshot of what is known about the aircraft being calibrated.
///
/// Created empty at session start; fields are populated asynchronously as
/// replies arrive and are never partially rolled back. A field is either
/// unset or holds the last reply's value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aircraft {
    /// Name reported by the CONFIG reply.
    pub name: Option<String>,
    /// Settings resource locator from the CONFIG reply, scheme prefix
    /// already stripped.
    pub settings: Option<String>,
    /// Current telemetry mode, as last seen on the DL_VALUES stream.
    pub mode: Option<i32>,
    /// Names of the telemetry modes the aircraft offers. Filled in by the
    /// caller from the settings file; the locator alone does not carry them.
    pub modes: Vec<String>,
    /// Index of the telemetry-mode entry in the DL_VALUES list, once a
    /// listener has been bound to it.
    pub telemetry_index: Option<usize>,
    /// Whether raw-flavored traffic from this aircraft has been seen.
    pub raw_data_present: bool,
}

impl Aircraft {
    /// True once a CONFIG reply has populated both name and settings.
    pub fn is_configured(&self) -> bool {
        self.name.is_some() && self.settings.is_some()
    }

    pub fn apply_config(&mut self, reply: &ConfigReply) {
        self.name = Some(reply.aircraft_name.clone());
        self.settings = Some(reply.settings.clone());
    }

    /// Record the mode names offered by the aircraft. Replaces the whole
    /// list; earlier entries are never partially retained.
    pub fn set_modes(&mut self, modes: Vec<String>) {
        self.modes = modes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unconfigured() {
        let ac = Aircraft::default();
        assert!(!ac.is_configured());
        assert_eq!(ac.mode, None);
        assert!(ac.modes.is_empty());
        assert_eq!(ac.telemetry_index, None);
        assert!(!ac.raw_data_present);
    }

    #[test]
    fn test_set_modes_replaces_list() {
        let mut ac = Aircraft::default();
        ac.set_modes(vec!["default".to_string(), "minimal".to_string()]);
        ac.set_modes(vec!["extended".to_string()]);
        assert_eq!(ac.modes, vec!["extended".to_string()]);
    }

    #[test]
    fn test_apply_config_populates_name_and_settings() {
        let mut ac = Aircraft::default();
        ac.apply_config(&ConfigReply {
            request_id: 42,
            settings: "conf/settings.xml".to_string(),
            aircraft_name: "Twinjet".to_string(),
        });
        assert!(ac.is_configured());
        assert_eq!(ac.name.as_deref(), Some("Twinjet"));
        assert_eq!(ac.settings.as_deref(), Some("conf/settings.xml"));
    }
}
