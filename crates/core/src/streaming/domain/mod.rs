pub mod control_intent;
pub mod stream_channel;
