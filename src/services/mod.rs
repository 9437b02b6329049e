pub mod local_store;
pub mod maintenance;
pub mod staging;
pub mod storage;
pub mod target;
