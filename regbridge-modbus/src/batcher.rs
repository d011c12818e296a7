//! Grouping of register addresses into contiguous read spans.

/// Largest quantity accepted by a single holding register read (function 0x03).
pub const MAX_READ_QUANTITY: u16 = 125;

/// A run of consecutive addresses read with one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressGroup {
    /// First address of the run.
    pub start: u16,
    /// Number of registers in the run.
    pub count: u16,
}

impl AddressGroup {
    /// Addresses covered by this group, ascending.
    pub fn addresses(&self) -> impl Iterator<Item = u16> + use<> {
        let start = u32::from(self.start);
        (start..start + u32::from(self.count)).map(|a| a as u16)
    }

    /// Last address of the run.
    pub fn end(&self) -> u16 {
        (u32::from(self.start) + u32::from(self.count) - 1) as u16
    }
}

/// Split sorted, unique addresses into maximal contiguous groups of at most
/// `max_batch_size` registers.
///
/// A new group starts whenever an address does not directly follow the
/// previous one or the current group is full. Output order follows input
/// order and every address lands in exactly one group.
pub fn group(addresses: &[u16], max_batch_size: u16) -> Vec<AddressGroup> {
    debug_assert!(max_batch_size > 0, "max_batch_size must be positive");
    debug_assert!(
        addresses.windows(2).all(|w| w[0] < w[1]),
        "addresses must be sorted and unique"
    );

    let max_batch_size = max_batch_size.max(1);
    let mut groups = Vec::new();

    let Some((&first, rest)) = addresses.split_first() else {
        return groups;
    };

    let mut current = AddressGroup {
        start: first,
        count: 1,
    };

    for &address in rest {
        let follows = u32::from(address) == u32::from(current.end()) + 1;
        if follows && current.count < max_batch_size {
            current.count += 1;
        } else {
            groups.push(current);
            current = AddressGroup {
                start: address,
                count: 1,
            };
        }
    }
    groups.push(current);

    groups
}
