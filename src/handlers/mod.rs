//! HTTP 处理器模块

pub mod audit;
pub mod auth;
pub mod health;
pub mod integration_event;
pub mod tenant;
pub mod webhook;
