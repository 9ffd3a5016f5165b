//! Publish and subscribe request builders.
//!
//! Builders assemble the option fields a request carries on the wire. The
//! core treats every field as an opaque key-value pair; no URI, access
//! chain, or verification semantics live here.
//!
//! # Example
//!
//! ```
//! use bosswave_client::PublishRequest;
//!
//! let request = PublishRequest::builder("scratch/demo")
//!     .persist(true)
//!     .do_verify(true)
//!     .build();
//! assert_eq!(request.uri(), "scratch/demo");
//! ```

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::protocol::{Frame, PayloadObject, RoutingObject};

/// How far the router should elaborate the primary access chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainElaborationLevel {
    /// Leave the field off the wire.
    #[default]
    Unspecified,
    /// Partial elaboration.
    Partial,
    /// Full elaboration.
    Full,
}

impl ChainElaborationLevel {
    fn as_kv(self) -> Option<&'static str> {
        match self {
            ChainElaborationLevel::Unspecified => None,
            ChainElaborationLevel::Partial => Some("partial"),
            ChainElaborationLevel::Full => Some("full"),
        }
    }
}

/// Options shared by publish and subscribe requests.
#[derive(Debug, Clone, Default)]
struct CommonOptions {
    uri: String,
    expiry: Option<DateTime<Utc>>,
    expiry_delta_ms: Option<i64>,
    primary_access_chain: Option<String>,
    do_verify: bool,
    elaboration: ChainElaborationLevel,
    routing_objects: Vec<RoutingObject>,
}

impl CommonOptions {
    /// Emit the shared fields in wire order, URI first.
    fn append_kv_pairs(&self, frame: &mut Frame) {
        frame.push_kv("uri", Bytes::from(self.uri.clone()));
        if let Some(expiry) = self.expiry {
            frame.push_kv(
                "expiry",
                Bytes::from(expiry.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        }
        if let Some(delta) = self.expiry_delta_ms {
            frame.push_kv("expirydelta", Bytes::from(format!("{}ms", delta)));
        }
        if let Some(pac) = &self.primary_access_chain {
            frame.push_kv("primary_access_chain", Bytes::from(pac.clone()));
        }
        frame.push_kv("doverify", Bytes::from(self.do_verify.to_string()));
        if let Some(level) = self.elaboration.as_kv() {
            frame.push_kv("elaborate_pac", Bytes::from_static(level.as_bytes()));
        }
    }
}

/// A publish (or persist) request.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    common: CommonOptions,
    persist: bool,
    payload_objects: Vec<PayloadObject>,
}

impl PublishRequest {
    /// Start building a publish request for a URI.
    pub fn builder(uri: impl Into<String>) -> PublishRequestBuilder {
        PublishRequestBuilder {
            common: CommonOptions {
                uri: uri.into(),
                ..CommonOptions::default()
            },
            persist: false,
            payload_objects: Vec::new(),
        }
    }

    /// The target URI.
    pub fn uri(&self) -> &str {
        &self.common.uri
    }

    /// Whether the router should persist the message.
    pub fn is_persist(&self) -> bool {
        self.persist
    }

    pub(crate) fn append_kv_pairs(&self, frame: &mut Frame) {
        self.common.append_kv_pairs(frame);
        // The persist flag rides both in the command mnemonic and here.
        frame.push_kv("persist", Bytes::from(self.persist.to_string()));
    }

    pub(crate) fn append_objects(&self, frame: &mut Frame) {
        for ro in &self.common.routing_objects {
            frame.push_routing_object(ro.clone());
        }
        for po in &self.payload_objects {
            frame.push_payload_object(po.clone());
        }
    }
}

/// Fluent builder for [`PublishRequest`].
#[derive(Debug, Clone)]
pub struct PublishRequestBuilder {
    common: CommonOptions,
    persist: bool,
    payload_objects: Vec<PayloadObject>,
}

impl PublishRequestBuilder {
    /// Persist the message at the router instead of a plain publish.
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Absolute expiry time.
    pub fn expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.common.expiry = Some(expiry);
        self
    }

    /// Expiry as a delta from now, in milliseconds.
    pub fn expiry_delta_ms(mut self, delta: i64) -> Self {
        self.common.expiry_delta_ms = Some(delta);
        self
    }

    /// Primary access chain hash.
    pub fn primary_access_chain(mut self, pac: impl Into<String>) -> Self {
        self.common.primary_access_chain = Some(pac.into());
        self
    }

    /// Ask the router to verify the request before acting on it.
    pub fn do_verify(mut self, do_verify: bool) -> Self {
        self.common.do_verify = do_verify;
        self
    }

    /// Access chain elaboration level.
    pub fn elaboration(mut self, level: ChainElaborationLevel) -> Self {
        self.common.elaboration = level;
        self
    }

    /// Attach a routing object.
    pub fn routing_object(mut self, ro: RoutingObject) -> Self {
        self.common.routing_objects.push(ro);
        self
    }

    /// Attach a payload object.
    pub fn payload_object(mut self, po: PayloadObject) -> Self {
        self.payload_objects.push(po);
        self
    }

    /// Finish the request.
    pub fn build(self) -> PublishRequest {
        PublishRequest {
            common: self.common,
            persist: self.persist,
            payload_objects: self.payload_objects,
        }
    }
}

/// A standing subscription request.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    common: CommonOptions,
    leave_packed: bool,
}

impl SubscribeRequest {
    /// Start building a subscribe request for a URI.
    pub fn builder(uri: impl Into<String>) -> SubscribeRequestBuilder {
        SubscribeRequestBuilder {
            common: CommonOptions {
                uri: uri.into(),
                ..CommonOptions::default()
            },
            leave_packed: false,
        }
    }

    /// The subscription URI.
    pub fn uri(&self) -> &str {
        &self.common.uri
    }

    pub(crate) fn append_kv_pairs(&self, frame: &mut Frame) {
        self.common.append_kv_pairs(frame);
        if !self.leave_packed {
            frame.push_kv("unpack", Bytes::from_static(b"true"));
        }
    }

    pub(crate) fn append_objects(&self, frame: &mut Frame) {
        for ro in &self.common.routing_objects {
            frame.push_routing_object(ro.clone());
        }
    }
}

/// Fluent builder for [`SubscribeRequest`].
#[derive(Debug, Clone)]
pub struct SubscribeRequestBuilder {
    common: CommonOptions,
    leave_packed: bool,
}

impl SubscribeRequestBuilder {
    /// Absolute expiry time for the subscription.
    pub fn expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.common.expiry = Some(expiry);
        self
    }

    /// Expiry as a delta from now, in milliseconds.
    pub fn expiry_delta_ms(mut self, delta: i64) -> Self {
        self.common.expiry_delta_ms = Some(delta);
        self
    }

    /// Primary access chain hash.
    pub fn primary_access_chain(mut self, pac: impl Into<String>) -> Self {
        self.common.primary_access_chain = Some(pac.into());
        self
    }

    /// Ask the router to verify the request before acting on it.
    pub fn do_verify(mut self, do_verify: bool) -> Self {
        self.common.do_verify = do_verify;
        self
    }

    /// Access chain elaboration level.
    pub fn elaboration(mut self, level: ChainElaborationLevel) -> Self {
        self.common.elaboration = level;
        self
    }

    /// Attach a routing object.
    pub fn routing_object(mut self, ro: RoutingObject) -> Self {
        self.common.routing_objects.push(ro);
        self
    }

    /// Receive deliveries in packed form, without decoded objects.
    pub fn leave_packed(mut self, leave_packed: bool) -> Self {
        self.leave_packed = leave_packed;
        self
    }

    /// Finish the request.
    pub fn build(self) -> SubscribeRequest {
        SubscribeRequest {
            common: self.common,
            leave_packed: self.leave_packed,
        }
    }
}
