// src/io/registry.rs
//
// Device index allocator.
// The driver addresses adapters by (device type, index), so every open
// session needs an index that no other open session of the same type holds.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::DeviceType;

/// Map of device type -> indices currently held by open sessions
#[derive(Debug, Default)]
pub struct DeviceIndexAllocator {
    table: Mutex<HashMap<DeviceType, BTreeSet<u32>>>,
}

impl DeviceIndexAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<DeviceType, BTreeSet<u32>>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the smallest index not held for `device_type`.
    pub fn allocate(&self, device_type: DeviceType) -> u32 {
        let mut table = self.table();
        let used = table.entry(device_type).or_default();

        // Sorted scan: the first position whose value differs from its rank is a gap.
        let mut index = 0u32;
        for held in used.iter() {
            if *held != index {
                break;
            }
            index += 1;
        }
        used.insert(index);
        tlog!(
            "[registry] Allocated {} index {} (held: {})",
            device_type,
            index,
            used.len()
        );
        index
    }

    /// Claim a caller-chosen index. Returns false if it is already held.
    pub fn reserve(&self, device_type: DeviceType, index: u32) -> bool {
        let mut table = self.table();
        let inserted = table.entry(device_type).or_default().insert(index);
        if inserted {
            tlog!("[registry] Reserved {} index {}", device_type, index);
        }
        inserted
    }

    /// Return an index to the pool. Releasing an index that is not held is a no-op.
    pub fn release(&self, device_type: DeviceType, index: u32) {
        let mut table = self.table();
        if let Some(used) = table.get_mut(&device_type) {
            if used.remove(&index) {
                tlog!(
                    "[registry] Released {} index {} (remaining: {})",
                    device_type,
                    index,
                    used.len()
                );
            }
            if used.is_empty() {
                table.remove(&device_type);
            }
        }
    }

    /// Snapshot of the indices held for `device_type`, ascending.
    pub fn allocated(&self, device_type: DeviceType) -> Vec<u32> {
        self.table()
            .get(&device_type)
            .map(|used| used.iter().copied().collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================
