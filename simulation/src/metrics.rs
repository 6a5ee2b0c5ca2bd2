//! Aggregate simulation counters.

/// Traffic totals across the whole population.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimStats {
    /// Application send requests entered into the simulation.
    pub app_sends: u64,
    /// Beacon broadcasts put on the air.
    pub beacons_sent: u64,
    /// REPLY summary vectors sent.
    pub replies_sent: u64,
    /// REPLY_BACK summary vectors sent.
    pub reply_backs_sent: u64,
    /// Data packets pushed to a next hop.
    pub data_forwards: u64,
    /// Data forwards whose gateway was out of range.
    pub forwards_lost: u64,
    /// Control unicasts whose destination was out of range.
    pub control_lost: u64,
    /// Packets handed to an application sink.
    pub deliveries: u64,
}
