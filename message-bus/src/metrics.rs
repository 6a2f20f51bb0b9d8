//! Prometheus metrics for message bus

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_gauge, CounterVec, IntGauge};

lazy_static! {
    /// Total messages written to outbound channels
    pub static ref MESSAGE_SEND_TOTAL: CounterVec = register_counter_vec!(
        "bank_bus_send_total",
        "Total messages written to outbound channels",
        &["message_type", "status"]
    )
    .unwrap();

    /// Total messages read from inbound channels
    pub static ref MESSAGE_RECEIVE_TOTAL: CounterVec = register_counter_vec!(
        "bank_bus_receive_total",
        "Total messages read from inbound channels",
        &["message_type", "status"]
    )
    .unwrap();

    /// Outbound connections currently cached
    pub static ref OPEN_CONNECTIONS: IntGauge = register_int_gauge!(
        "bank_bus_open_connections",
        "Outbound connections currently cached"
    )
    .unwrap();
}
