//! Audio input device enumeration.

use serde::{Deserialize, Serialize};

/// An audio input device as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// Input devices on the default host, default device first.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> crate::error::Result<Vec<DeviceInfo>> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| crate::error::WordrecError::AudioDevice(e.to_string()))?;

    let mut list: Vec<DeviceInfo> = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
            let is_default = default_name.as_deref() == Some(name.as_str());
            DeviceInfo { name, is_default }
        })
        .collect();
    sort_default_first(&mut list);
    Ok(list)
}

/// Without `audio-cpal` there is no host to enumerate.
#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> crate::error::Result<Vec<DeviceInfo>> {
    Ok(Vec::new())
}

fn sort_default_first(list: &mut [DeviceInfo]) {
    list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_device_sorts_first() {
        let mut list = vec![
            DeviceInfo {
                name: "USB Mic".into(),
                is_default: false,
            },
            DeviceInfo {
                name: "built-in".into(),
                is_default: false,
            },
            DeviceInfo {
                name: "Headset".into(),
                is_default: true,
            },
        ];
        sort_default_first(&mut list);
        let names: Vec<_> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Headset", "built-in", "USB Mic"]);
    }
}
