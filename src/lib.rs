// Library for tests to access modules

pub mod aggregate_repo;
pub mod backfill;
pub mod chart;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod error_merger;
pub mod histogram;
pub mod live;
pub mod models;
pub mod report;
pub mod rollup;
pub mod rollup_worker;
pub mod routes;
pub mod worker_pool;
