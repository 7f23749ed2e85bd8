//! Built-in protocol plugins.

mod mongodb;
mod redis;
mod wmi;

pub use mongodb::{MongodbPlugin, OpQuery};
pub use redis::RedisPlugin;
pub use wmi::WmiPlugin;
