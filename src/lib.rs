pub mod config;
pub mod error;
pub mod state;
pub mod db;
pub mod routes;

pub mod models {
    pub mod chat;
    pub mod generation;
    pub mod payment;
    pub mod session;
    pub mod stats;
    pub mod subscription;
}

pub mod repositories {
    pub mod generation;
    pub mod memory;
    pub mod payment;
    pub mod stats;
    pub mod store;
    pub mod subscription;
}

pub mod services {
    pub mod checkout;
    pub mod conversation;
    pub mod generation;
    pub mod ledger;
    pub mod rate_limiter;
    pub mod reconciler;
}

pub mod handlers {
    pub mod admin;
    pub mod chat;
    pub mod health;
    pub mod webhook;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod rate_limit;
}

pub mod validation {
    pub mod admin;
}
