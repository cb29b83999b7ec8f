pub mod admin_routes;
pub mod schedule_routes;
pub mod vm_routes;
