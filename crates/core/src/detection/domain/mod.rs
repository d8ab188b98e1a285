pub mod detector_endpoint;
pub mod throttle_gate;
