use super::test_helpers::*;
use crate::types::{Event, ItemStatus, LinkKind};


/// Drain every event already sent to `rx`
fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
