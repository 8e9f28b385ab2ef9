//! Serialized view model settings
//!
//! The data-only part of [`ViewModelsConfig`](crate::config::ViewModelsConfig)
//! can be loaded from TOML and applied as [`ConfigOverrides`]:
//!
//! ```toml
//! compare_payload = "shallow"
//! payload_observable = "structural"
//! payload_computed = "off"
//! strict_lookups = true
//!
//! [view_transitions]
//! payload_change = true
//! ```

use crate::config::{ConfigOverrides, ViewTransitions};
use crate::equality::{PayloadCompare, PayloadComputed, PayloadObservable};
use crate::error::Result;
use serde::Deserialize;

/// Serializable subset of [`PayloadCompare`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    Identity,
    Shallow,
    Structural,
    Off,
}

impl From<CompareMode> for PayloadCompare {
    fn from(mode: CompareMode) -> Self {
        match mode {
            CompareMode::Identity => PayloadCompare::Identity,
            CompareMode::Shallow => PayloadCompare::Shallow,
            CompareMode::Structural => PayloadCompare::Structural,
            CompareMode::Off => PayloadCompare::Off,
        }
    }
}

/// Serializable subset of [`PayloadComputed`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputedMode {
    Off,
    On,
    Struct,
}

impl From<ComputedMode> for PayloadComputed {
    fn from(mode: ComputedMode) -> Self {
        match mode {
            ComputedMode::Off => PayloadComputed::Off,
            ComputedMode::On => PayloadComputed::On,
            ComputedMode::Struct => PayloadComputed::Struct,
        }
    }
}

/// View model settings as written in a settings file
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewModelSettings {
    pub compare_payload: Option<CompareMode>,
    pub payload_observable: Option<PayloadObservable>,
    pub payload_computed: Option<ComputedMode>,
    pub view_transitions: Option<ViewTransitions>,
    pub strict_lookups: Option<bool>,
}

impl ViewModelSettings {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Overrides carrying every field set in the file
    pub fn to_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            compare_payload: self.compare_payload.map(Into::into),
            payload_observable: self.payload_observable,
            payload_computed: self.payload_computed.map(Into::into),
            view_transitions: self.view_transitions,
            strict_lookups: self.strict_lookups,
            ..ConfigOverrides::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewModelsConfig;
    use crate::error::ViewModelError;

    #[test]
    fn test_parse_full_settings() {
        let settings = ViewModelSettings::from_toml_str(
            r#"
            compare_payload = "shallow"
            payload_observable = "structural"
            payload_computed = "off"
            strict_lookups = false

            [view_transitions]
            payload_change = true
            "#,
        )
        .unwrap();

        assert_eq!(settings.compare_payload, Some(CompareMode::Shallow));
        assert_eq!(settings.payload_observable, Some(PayloadObservable::Structural));
        assert_eq!(settings.payload_computed, Some(ComputedMode::Off));
        let transitions = settings.view_transitions.unwrap();
        assert!(transitions.payload_change);
        assert!(!transitions.mount);

        let config = ViewModelsConfig::default().merged(&settings.to_overrides());
        assert!(matches!(config.compare_payload, PayloadCompare::Shallow));
        assert!(matches!(config.payload_computed, PayloadComputed::Off));
        assert!(!config.strict_lookups);
    }

    #[test]
    fn test_empty_settings_change_nothing() {
        let settings = ViewModelSettings::from_toml_str("").unwrap();
        assert_eq!(settings, ViewModelSettings::default());

        let config = ViewModelsConfig::default().merged(&settings.to_overrides());
        assert!(matches!(config.compare_payload, PayloadCompare::Structural));
        assert_eq!(config.payload_observable, PayloadObservable::Ref);
    }

    #[test]
    fn test_invalid_settings() {
        let err = ViewModelSettings::from_toml_str(r#"compare_payload = "sometimes""#).unwrap_err();
        assert!(matches!(err, ViewModelError::Settings(_)));

        let err = ViewModelSettings::from_toml_str("unknown_key = 1").unwrap_err();
        assert!(matches!(err, ViewModelError::Settings(_)));
    }
}
