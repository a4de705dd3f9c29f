use candle_core::Device;
use tracing::info;

/// Metal when the feature is compiled in and requested, CPU otherwise.
pub fn select_device(prefer_metal: bool) -> Device {
    #[cfg(feature = "metal")]
    {
        if prefer_metal {
            if let Ok(dev) = Device::new_metal(0) {
                info!(device = "metal", "Selected embedding device");
                return dev;
            }
        }
    }
    #[cfg(not(feature = "metal"))]
    let _ = prefer_metal;
    info!(device = "cpu", "Selected embedding device");
    Device::Cpu
}
