//! Utility modules for device placement and dtypes.

mod device;

pub use device::{device_for_target, get_device, parse_dtype, DType, Device, DeviceMap};
