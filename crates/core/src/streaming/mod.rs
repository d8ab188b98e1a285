pub mod domain;
pub mod infrastructure;
pub mod push_stream_session;
