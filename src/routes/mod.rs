pub mod tracking_routes;
