//! Frontend-visible core options.

use crate::media::Region;
use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputDevice {
    #[default]
    #[serde(rename = "3 button pad")]
    ThreeButton,
    #[serde(rename = "6 button pad")]
    SixButton,
    #[serde(rename = "None")]
    None,
}

impl InputDevice {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "3 button pad" => Some(InputDevice::ThreeButton),
            "6 button pad" => Some(InputDevice::SixButton),
            "None" => Some(InputDevice::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionOverride {
    #[default]
    Auto,
    Japan,
    #[serde(rename = "US")]
    Us,
    Europe,
}

impl RegionOverride {
    pub fn region(self) -> Option<Region> {
        match self {
            RegionOverride::Auto => None,
            RegionOverride::Japan => Some(Region::Japan),
            RegionOverride::Us => Some(Region::Us),
            RegionOverride::Europe => Some(Region::Europe),
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "Auto" => Some(RegionOverride::Auto),
            "Japan" => Some(RegionOverride::Japan),
            "US" => Some(RegionOverride::Us),
            "Europe" => Some(RegionOverride::Europe),
            _ => None,
        }
    }
}

/// `enabled` / `disabled` strings for boolean options
mod switch {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Option<bool> {
        match s {
            "enabled" => Some(true),
            "disabled" => Some(false),
            _ => None,
        }
    }

    pub fn serialize<S: Serializer>(v: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(if *v { "enabled" } else { "disabled" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let s = String::deserialize(d)?;
        parse(&s).ok_or_else(|| serde::de::Error::custom(format!("expected enabled/disabled, got {:?}", s)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreOptions {
    #[serde(rename = "md_input1")]
    pub input1: InputDevice,
    #[serde(rename = "md_input2")]
    pub input2: InputDevice,
    /// Lift the per-line sprite limit
    #[serde(rename = "md_sprlim", with = "switch")]
    pub no_sprite_limit: bool,
    /// Mega-CD RAM cartridge
    #[serde(rename = "md_ramcart", with = "switch")]
    pub ram_cart: bool,
    #[serde(rename = "md_region")]
    pub region: RegionOverride,
}

impl CoreOptions {
    pub const KEYS: [&'static str; 5] = [
        "md_input1",
        "md_input2",
        "md_sprlim",
        "md_ramcart",
        "md_region",
    ];

    /// Apply one key/value pair. Unknown keys are ignored and bad values
    /// leave the option unchanged; both return false.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        let applied = match key {
            "md_input1" => InputDevice::parse(value).map(|v| self.input1 = v),
            "md_input2" => InputDevice::parse(value).map(|v| self.input2 = v),
            "md_sprlim" => switch::parse(value).map(|v| self.no_sprite_limit = v),
            "md_ramcart" => switch::parse(value).map(|v| self.ram_cart = v),
            "md_region" => RegionOverride::parse(value).map(|v| self.region = v),
            _ => {
                log(LogCategory::Media, LogLevel::Debug, || {
                    format!("ignoring unknown option {}", key)
                });
                return false;
            }
        };
        if applied.is_none() {
            log(LogCategory::Media, LogLevel::Warn, || {
                format!("invalid value {:?} for option {}", value, key)
            });
        }
        applied.is_some()
    }

    /// Apply every pair of a key/value map
    pub fn apply<'a>(&mut self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for (k, v) in pairs {
            self.set(k, v);
        }
    }

    /// Parse a JSON object of option strings. Unknown keys are ignored.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let pairs: BTreeMap<String, String> = serde_json::from_str(text)?;
        let mut options = Self::default();
        options.apply(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        Ok(options)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn devices(&self) -> [InputDevice; 2] {
        [self.input1, self.input2]
    }
}
