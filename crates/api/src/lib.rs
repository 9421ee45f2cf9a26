//! HTTP surface for TaskCourier: submit notifications, query delivery
//! state, mark read, and manage channel preferences.

pub mod routes;
pub mod state;
