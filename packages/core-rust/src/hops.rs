//! Hop tracking for broker-local loop prevention.
//!
//! A reply produced by a target is re-injected into its broker and may in turn
//! trigger another delivery, which may produce another reply. The remaining
//! hop budget travels with the event as the [`HOPS_EXTENSION`] extension so
//! that such cycles terminate.
//!
//! The extension is absent on an event's first entry into the broker. It is
//! broker-internal: it is removed before delivery to a target and only stamped
//! back onto replies being re-injected (see [`SetRemainingHops`]).

use crate::binding::Transformer;
use crate::event::{Event, ExtensionValue};

/// Extension attribute carrying the remaining hop budget.
pub const HOPS_EXTENSION: &str = "brokerhops";

/// Hop budget assumed for events that carry no hop extension yet.
pub const DEFAULT_HOP_CEILING: i32 = 255;

/// Reads the remaining hops stored on `event`.
///
/// Binary-mode headers deliver the value as a decimal string, structured mode
/// as a JSON integer; both are accepted. Returns `None` when the extension is
/// absent or its value is not an integer.
#[must_use]
pub fn remaining_hops(event: &Event) -> Option<i32> {
    match event.extension(HOPS_EXTENSION)? {
        ExtensionValue::Integer(i) => i32::try_from(*i).ok(),
        ExtensionValue::String(s) => s.trim().parse().ok(),
        ExtensionValue::Boolean(_) => None,
    }
}

/// Decrements the hop budget on `event` and returns the new remaining value.
///
/// An absent or malformed value counts as `ceiling`. The result may be zero or
/// negative, which callers treat as exhausted; the value stored on the event
/// never drops below zero.
pub fn update_remaining_hops(event: &mut Event, ceiling: i32) -> i32 {
    let prior = remaining_hops(event).unwrap_or(ceiling);
    let remaining = prior.saturating_sub(1);
    set_remaining_hops(event, remaining.max(0));
    remaining
}

/// Stamps `hops` on `event`, replacing any existing value.
pub fn set_remaining_hops(event: &mut Event, hops: i32) {
    event.set_extension(HOPS_EXTENSION, hops);
}

/// Removes the hop extension from `event`.
pub fn delete_remaining_hops(event: &mut Event) {
    event.remove_extension(HOPS_EXTENSION);
}

/// Send-time transformer that sets the hop extension on an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetRemainingHops(pub i32);

impl Transformer for SetRemainingHops {
    fn transform(&self, event: &mut Event) {
        set_remaining_hops(event, self.0);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
