//! 应用状态定义
//!
//! Axum 路由共享的状态，通过 Arc 在 handler 间共享。

use std::sync::Arc;

use crate::lookup::OrderLookupService;
use crate::store::OrderStore;

#[derive(Clone)]
pub struct AppState {
    pub lookup: OrderLookupService,
    /// 就绪检查使用
    pub store: Arc<dyn OrderStore>,
}

impl AppState {
    pub fn new(lookup: OrderLookupService, store: Arc<dyn OrderStore>) -> Self {
        Self { lookup, store }
    }
}
