pub mod access_log_repo;
pub mod access_logger;
pub mod api;
pub mod clock;
pub mod config;
pub mod link_registry;
pub mod link_repo;
mod orm;
pub mod routes;

#[cfg(test)]
mod test_support;
