//! Ready-made service entries for compose environments.

pub mod redis;

pub use self::redis::{RedisConnection, RedisError, connect_redis, redis_service};
