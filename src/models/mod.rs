//! 数据模型模块
//! 租户、用户、权限图、审计与 Webhook/集成事件

pub mod audit;
pub mod role;
pub mod tenant;
pub mod user;
pub mod webhook;
