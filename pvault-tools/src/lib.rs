pub mod crypt;
pub mod lru_cache;
pub mod observability;
pub mod process_locker;
