pub mod time_converter;
pub mod solar_geometry;
pub mod expectation_pipeline;
pub mod replay;
pub mod weather_service;
pub mod measurement_service;
pub mod system_model;
pub mod storage_service;
pub mod pipeline_driver;
pub mod mqtt_service;
