pub mod dispatch;
pub mod drivers;
pub mod ingest;
pub mod pricing;
pub mod ratings;
pub mod rides;
