use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMap {
    ForceCpu,
    Ordinal(usize),
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::Ordinal(0)
    }
}

impl DeviceMap {
    pub fn new(cpu: bool, ordinal: usize) -> Self {
        if cpu {
            Self::ForceCpu
        } else {
            Self::Ordinal(ordinal)
        }
    }
}

/// The compute backend a model is bound to, in order of preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cuda,
    Metal,
    Cpu,
}

serde_plain::derive_display_from_serialize!(DeviceKind);

impl DeviceKind {
    pub fn of(device: &candle_core::Device) -> Self {
        match device {
            candle_core::Device::Cuda(_) => Self::Cuda,
            candle_core::Device::Metal(_) => Self::Metal,
            candle_core::Device::Cpu => Self::Cpu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_flag_wins_over_ordinal() {
        assert_eq!(DeviceMap::new(true, 3), DeviceMap::ForceCpu);
        assert_eq!(DeviceMap::new(false, 3), DeviceMap::Ordinal(3));
    }

    #[test]
    fn device_kind_names() {
        assert_eq!(DeviceKind::Cuda.to_string(), "cuda");
        assert_eq!(DeviceKind::Metal.to_string(), "metal");
        assert_eq!(DeviceKind::Cpu.to_string(), "cpu");
        assert_eq!(DeviceKind::of(&candle_core::Device::Cpu), DeviceKind::Cpu);
    }
}
