pub mod device_info;
pub mod encrypt;
pub mod glob;
pub mod logger;
