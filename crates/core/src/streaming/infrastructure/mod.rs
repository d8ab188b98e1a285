pub mod socketio_connector;
pub mod socketio_packet;
