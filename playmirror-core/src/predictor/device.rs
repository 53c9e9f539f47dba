//! Device profiling
//!
//! The follower's audio pipeline startup cost depends on the platform. The
//! capabilities are injected (config `[device]` section or FFI) and turned
//! into a fixed compensation profile once per client lifetime.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    #[default]
    Desktop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserFamily {
    Safari,
    Chrome,
    Firefox,
    Edge,
    #[default]
    Other,
}

/// Capabilities of the local device, supplied by the embedding app
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCapabilities {
    pub class: DeviceClass,
    pub browser_family: BrowserFamily,
    /// iPhone/iPad class audio stack (slowest to start)
    pub is_ios_like: bool,
}

/// Fixed compensation values for one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    pub class: DeviceClass,
    pub browser_family: BrowserFamily,
    pub is_ios_like: bool,
    /// Constant lead added to every prediction (seconds)
    pub base_compensation: f64,
    /// Scales the learned processing delay
    pub processing_multiplier: f64,
    /// Drift the device can't resolve anyway (seconds)
    pub network_tolerance: f64,
}

impl DeviceProfile {
    pub fn from_capabilities(caps: &DeviceCapabilities) -> Self {
        let (base_compensation, processing_multiplier, network_tolerance) =
            match (caps.class, caps.is_ios_like, caps.browser_family) {
                (_, true, _) => (0.08, 1.3, 0.15),
                (DeviceClass::Mobile, false, _) => (0.06, 1.2, 0.12),
                (DeviceClass::Desktop, false, BrowserFamily::Safari) => (0.04, 1.1, 0.05),
                (DeviceClass::Desktop, false, _) => (0.03, 1.0, 0.05),
            };

        Self {
            class: caps.class,
            browser_family: caps.browser_family,
            is_ios_like: caps.is_ios_like,
            base_compensation,
            processing_multiplier,
            network_tolerance,
        }
    }

    pub fn is_mobile(&self) -> bool {
        self.class == DeviceClass::Mobile || self.is_ios_like
    }
}
