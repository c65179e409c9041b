// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The brokered action stream: an append-only, per-session queue backed by
//! NATS JetStream, providing fallback delivery and a replay substrate for
//! hosts that temporarily lose their fast-path data channel (spec §3 "Queue
//! entry", §4.3 routing step 2).
//!
//! One JetStream stream (`BEACH_ACTIONS`) carries every private beach's
//! action traffic on subjects `beach.{private_beach_id}.session.{session_id}
//! .actions`; one durable pull consumer per session (`durable_name =
//! session_id`) gives each session its own consumer-group cursor. Visibility
//! timeout and redelivery are JetStream's native `ack_wait`/redelivery
//! mechanism, which is exactly the "reclaim entries whose consumer has been
//! silent" sweeper the spec calls for (§4.3 Backpressure) — no separate
//! reclaim loop is needed on the Manager side.

pub mod stream;

pub use stream::{BrokerError, BrokerStream, PendingEntry};
