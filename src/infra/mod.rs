pub mod http_client;
pub mod in_memory;
