// Store path layout
//
// The vendor database scopes everything under two roots: `users/{uid}`
// for account-side registration and `devices/{id}` for device-side state.
// These builders are the only place the layout is spelled out.

/// Map of device ids registered to an account.
pub fn user_devices(user_id: &str) -> String {
    format!("users/{user_id}/devices")
}

/// A single registration entry under the account.
pub fn user_device(user_id: &str, device_id: &str) -> String {
    format!("users/{user_id}/devices/{device_id}")
}

/// Static info record for a device.
pub fn device_info(device_id: &str) -> String {
    format!("devices/{device_id}/info")
}

/// Point-in-time status snapshot for a device.
pub fn device_status(device_id: &str) -> String {
    format!("devices/{device_id}/status")
}

/// Claim marker inside the status node.
pub fn device_claimed_by(device_id: &str) -> String {
    format!("devices/{device_id}/status/claimedBy")
}

/// Subscription marker a client writes to start a metric stream.
pub fn device_subscription(device_id: &str, client_id: &str, label: &str) -> String {
    format!("devices/{device_id}/subscriptions/{client_id}/{label}")
}
