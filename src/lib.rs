//! 多租户授权、审计与 Webhook 核心
//! 提供权限解析、审计账本、Webhook 目录、投递调度与租户隔离

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
pub mod tenant;
