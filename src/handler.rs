//! Decoded reply types and the sequence-number handler registries.
//!
//! Callers register callbacks keyed by the sequence number of an in-flight
//! request; the background dispatcher consults the registries when a
//! `resp` or `rslt` frame arrives. Response handlers fire at most once and
//! are retired on invocation; message handlers stay registered for the life
//! of the subscription.
//!
//! Handlers run on the dispatch task. A handler that blocks stalls delivery
//! for every other pending reply and subscription on the connection, so
//! handlers must return quickly or hand their work to another task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::protocol::{PayloadObject, RoutingObject};

/// Status token the router sends for a successful request.
pub const STATUS_OKAY: &str = "okay";

/// Terminal reply to a request.
///
/// A non-okay status is a protocol-level rejection carried as data, not a
/// client error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Router status token.
    pub status: String,
    /// Failure reason; present only when the status is not okay.
    pub reason: Option<String>,
}

impl Response {
    /// Whether the router accepted the request.
    pub fn is_okay(&self) -> bool {
        self.status == STATUS_OKAY
    }
}

/// One delivery on a standing subscription.
///
/// The object collections are `None` when the subscriber asked to leave the
/// message in packed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Identity of the publisher.
    pub from: String,
    /// URI the message was published to.
    pub uri: String,
    /// Routing objects, when unpacked.
    pub routing_objects: Option<Vec<RoutingObject>>,
    /// Payload objects, when unpacked.
    pub payload_objects: Option<Vec<PayloadObject>>,
}

/// Callback for a terminal [`Response`]. Invoked at most once.
pub type ResponseHandler = Box<dyn FnOnce(Response) + Send + 'static>;

/// Callback for subscription [`Message`] deliveries. Invoked repeatedly.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync + 'static>;

/// The two sequence-number-keyed handler registries.
///
/// Each map has its own lock so contention on responses never blocks
/// result delivery and vice versa. Locks are only held for map access,
/// never across a handler invocation or an await point.
#[derive(Default)]
pub(crate) struct HandlerTable {
    responses: Mutex<HashMap<u32, ResponseHandler>>,
    messages: Mutex<HashMap<u32, MessageHandler>>,
}

impl HandlerTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a response handler for a sequence number.
    pub(crate) fn install_response(&self, seq_no: u32, handler: ResponseHandler) {
        self.lock_responses().insert(seq_no, handler);
    }

    /// Remove and return the response handler, retiring the entry.
    pub(crate) fn take_response(&self, seq_no: u32) -> Option<ResponseHandler> {
        self.lock_responses().remove(&seq_no)
    }

    /// Register a message handler for a subscription sequence number.
    pub(crate) fn install_message(&self, seq_no: u32, handler: MessageHandler) {
        self.lock_messages().insert(seq_no, handler);
    }

    /// Clone out the message handler without removing it.
    pub(crate) fn message(&self, seq_no: u32) -> Option<MessageHandler> {
        self.lock_messages().get(&seq_no).cloned()
    }

    /// Drop the message handler for a cancelled subscription.
    pub(crate) fn remove_message(&self, seq_no: u32) {
        self.lock_messages().remove(&seq_no);
    }

    fn lock_responses(&self) -> MutexGuard<'_, HashMap<u32, ResponseHandler>> {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_messages(&self) -> MutexGuard<'_, HashMap<u32, MessageHandler>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn response(status: &str) -> Response {
        Response {
            status: status.to_string(),
            reason: None,
        }
    }

    #[test]
    fn test_response_okay() {
        assert!(response("okay").is_okay());
        assert!(!response("error").is_okay());
    }

    #[test]
    fn test_response_handler_retired_after_take() {
        let table = HandlerTable::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        table.install_response(
            7,
            Box::new(move |_| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let handler = table.take_response(7).unwrap();
        handler(response("okay"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Terminal: the entry is gone.
        assert!(table.take_response(7).is_none());
    }

    #[test]
    fn test_message_handler_persists() {
        let table = HandlerTable::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        table.install_message(
            9,
            Arc::new(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        for _ in 0..3 {
            let handler = table.message(9).unwrap();
            handler(Message {
                from: "vk".to_string(),
                uri: "a/b".to_string(),
                routing_objects: None,
                payload_objects: None,
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);

        table.remove_message(9);
        assert!(table.message(9).is_none());
    }

    #[test]
    fn test_registries_are_independent() {
        let table = HandlerTable::new();
        table.install_response(1, Box::new(|_| {}));
        table.install_message(1, Arc::new(|_| {}));

        assert!(table.take_response(1).is_some());
        // Same key in the other registry is untouched.
        assert!(table.message(1).is_some());
    }

    #[test]
    fn test_unknown_seq_no_is_none() {
        let table = HandlerTable::new();
        assert!(table.take_response(12345).is_none());
        assert!(table.message(12345).is_none());
    }
}
