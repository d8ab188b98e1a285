pub mod constants;
pub mod detection_result;
pub mod encoded_image;
pub mod frame;
pub mod result_store;
pub mod settings;
