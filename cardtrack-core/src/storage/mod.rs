pub mod in_memory;
pub mod json_file;
pub mod traits;

pub use in_memory::InMemoryCustomerStore;
pub use json_file::JsonFileCustomerStore;
pub use traits::CustomerStore;
