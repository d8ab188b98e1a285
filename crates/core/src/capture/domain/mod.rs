pub mod display_refresh;
pub mod frame_encoder;
pub mod frame_source;
