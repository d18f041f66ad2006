pub mod tracking_controller;
