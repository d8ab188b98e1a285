pub mod http_detector_client;
