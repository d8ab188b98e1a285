pub mod capture_loop_controller;
pub mod detect_image_use_case;
pub mod detection_request_pipeline;
pub mod live_feed;
pub mod session_logger;
