mod proxy;
mod tuning;

pub use proxy::ProxyConfig;
pub use tuning::TuningConfig;
