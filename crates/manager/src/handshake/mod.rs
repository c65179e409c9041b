// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Attach & Handshake Coordinator (§4.3). Wraps the registry's attach
//! operations and, on success, mints the bootstrap controller lease and idle
//! publish token and assembles the `manager_handshake` payload the host picks
//! up on its next poll.
//!
//! The payload is delivered via a per-session mailbox rather than pushed down
//! a transport of its own: at attach time the host has no fast-path channel
//! yet (§4.4 channels only open after the host later offers WebRTC), so there
//! is no "existing control channel" to write to until the host itself asks
//! for one. `GET /sessions/:id/handshake` is the host's one fixed rendezvous
//! point, polled once at boot and again whenever `idle_publish_token` is
//! close to expiry.

pub mod coordinator;
pub mod rotation;

pub use coordinator::{HandshakeCoordinator, ManagerHandshake};
pub use rotation::spawn_handshake_rotation_sweeper;
