//! Helpers only available with the `std` feature.

/// Nanoseconds since the EtherCAT epoch, 2000-01-01T00:00:00.
///
/// Distributed clocks express system time relative to this epoch; pass this
/// function to [`Master::init`](crate::Master::init) and the cyclic
/// [`tx_rx_dc`](crate::SlaveGroup::tx_rx_dc) calls so everything shares one
/// time base.
pub fn ethercat_now() -> u64 {
    // 946684800 seconds between the Unix and EtherCAT epochs
    const EPOCH_OFFSET_SECS: u64 = 946_684_800;

    let unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();

    unix.as_nanos() as u64 - EPOCH_OFFSET_SECS * 1_000_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_before_now() {
        let now = ethercat_now();

        // Sometime after 2020 in EtherCAT time
        assert!(now > 630_000_000_000_000_000);
    }
}
