pub mod error_stage {
    pub const RESOLVING: &str = "resolving";
    pub const BUILDING: &str = "building";
    pub const SENDING: &str = "sending";
}

pub mod error_type {
    pub const CONFIGURATION_FAILED: &str = "configuration_failed";
    pub const COMMAND_FAILED: &str = "command_failed";
    pub const REQUEST_FAILED: &str = "request_failed";
}
