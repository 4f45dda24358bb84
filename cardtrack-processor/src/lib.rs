pub mod extract;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod templates;
