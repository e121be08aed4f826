// ============================================================================
// Device Topology Validation
// ============================================================================
//
// A submission must address every enabled device of the recipient (except
// the sender's own device on sync messages) and nothing else, and every
// nonzero registration id must match what the device currently holds.
//
// Both checks are pure and reused per recipient by the multi-recipient
// fan-out.
//
// ============================================================================

use std::collections::BTreeSet;

use courier_error::{MismatchedDevices, StaleDevices};
use courier_types::Account;

/// Compare the addressed device ids with the account's enabled devices
pub fn validate_complete_device_list(
    account: &Account,
    submitted_device_ids: &BTreeSet<u32>,
    is_sync_message: bool,
    authenticated_device_id: Option<u32>,
) -> Result<(), MismatchedDevices> {
    let mut enabled = account.enabled_device_ids();
    if is_sync_message {
        if let Some(own_device) = authenticated_device_id {
            enabled.remove(&own_device);
        }
    }

    let missing_devices: Vec<u32> = enabled.difference(submitted_device_ids).copied().collect();
    let extra_devices: Vec<u32> = submitted_device_ids.difference(&enabled).copied().collect();

    if missing_devices.is_empty() && extra_devices.is_empty() {
        Ok(())
    } else {
        Err(MismatchedDevices {
            missing_devices,
            extra_devices,
        })
    }
}

/// Flag devices whose registration id moved on since the sender built its session.
/// A registration id of zero means "not checked".
pub fn validate_registration_ids(
    account: &Account,
    device_registration_ids: impl IntoIterator<Item = (u32, u32)>,
) -> Result<(), StaleDevices> {
    let stale_devices: Vec<u32> = device_registration_ids
        .into_iter()
        .filter(|(device_id, registration_id)| {
            *registration_id != 0
                && account
                    .device(*device_id)
                    .map_or(true, |d| d.registration_id != *registration_id)
        })
        .map(|(device_id, _)| device_id)
        .collect();

    if stale_devices.is_empty() {
        Ok(())
    } else {
        Err(StaleDevices { stale_devices })
    }
}
