// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2026 Peerspace Project Contributors
//
// This file is part of Peerspace.
//
// Peerspace is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// Peerspace is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with Peerspace. If not, see <https://www.gnu.org/licenses/>.

//! Two-kernel propagation: subscriptions, pushes, remote writes, failure
//! recovery. The tests drive inbound dispatch by hand so delivery order
//! is deterministic.

use std::sync::Arc;

use peerspace_transport::{InMemoryMesh, InboundMessage, PeerId};
use tokio::sync::mpsc::UnboundedReceiver;

use peerspace_tuplespace::{
    CallbackKind, Encoding, Freshness, Kernel, KernelConfig, TupleError, TuplePattern,
};

fn kernel_on(mesh: &Arc<InMemoryMesh>, id: i32) -> (Kernel, UnboundedReceiver<InboundMessage>) {
    let (endpoint, rx) = mesh.attach(PeerId(id));
    (Kernel::new(KernelConfig::new(id), Arc::new(endpoint)), rx)
}

/// Dispatch everything queued for a kernel.
async fn pump(kernel: &Kernel, rx: &mut UnboundedReceiver<InboundMessage>) {
    while let Ok(msg) = rx.try_recv() {
        kernel.handle_inbound(msg).await;
    }
}

#[tokio::test]
async fn subscribe_then_write_pushes_the_value() {
    let mesh = InMemoryMesh::new();
    let (alpha, mut rx_a) = kernel_on(&mesh, 1);
    let (beta, mut rx_b) = kernel_on(&mesh, 2);

    beta.subscribe(Some(PeerId(1)), "robot.pos").await.unwrap();
    pump(&alpha, &mut rx_a).await;

    alpha.set_string_tuple("robot.pos", "3.0 4.0").await.unwrap();
    pump(&beta, &mut rx_b).await;

    let tuple = beta.get_tuple(PeerId(1), "robot.pos", Freshness::Any).unwrap();
    assert_eq!(tuple.data_str(), Some("3.0 4.0"));
    assert_eq!(tuple.owner, PeerId(1));
}

#[tokio::test]
async fn fresh_subscription_catches_up_on_existing_tuples() {
    let mesh = InMemoryMesh::new();
    let (alpha, mut rx_a) = kernel_on(&mesh, 1);
    let (beta, mut rx_b) = kernel_on(&mesh, 2);

    alpha.set_string_tuple("state.a", "1").await.unwrap();
    alpha.set_string_tuple("state.b", "2").await.unwrap();

    beta.subscribe(Some(PeerId(1)), "state.*").await.unwrap();
    pump(&alpha, &mut rx_a).await;
    pump(&beta, &mut rx_b).await;

    assert!(beta.get_tuple(PeerId(1), "state.a", Freshness::Any).is_ok());
    assert!(beta.get_tuple(PeerId(1), "state.b", Freshness::Any).is_ok());
}

#[tokio::test]
async fn duplicate_pushes_are_dropped_by_seqno() {
    let mesh = InMemoryMesh::new();
    let (alpha, mut rx_a) = kernel_on(&mesh, 1);
    let (beta, mut rx_b) = kernel_on(&mesh, 2);

    alpha.set_string_tuple("k", "v").await.unwrap();
    beta.subscribe(Some(PeerId(1)), "k").await.unwrap();
    pump(&alpha, &mut rx_a).await;

    // Force a second catch-up push of the same version, then deliver both.
    let changes = Arc::new(parking_lot::Mutex::new(0u32));
    let counter = Arc::clone(&changes);
    beta.register_callback(
        TuplePattern::parse(Some(PeerId(1)), "k").unwrap(),
        CallbackKind::Changed,
        move |_| *counter.lock() += 1,
    );
    beta.subscribe(Some(PeerId(1)), "k").await.unwrap();
    pump(&alpha, &mut rx_a).await;
    pump(&beta, &mut rx_b).await;

    // Two pushes arrived but only the first applied.
    assert_eq!(*changes.lock(), 1);
}

#[tokio::test]
async fn unsubscribe_stops_the_flow() {
    let mesh = InMemoryMesh::new();
    let (alpha, mut rx_a) = kernel_on(&mesh, 1);
    let (beta, mut rx_b) = kernel_on(&mesh, 2);

    let handle = beta.subscribe(Some(PeerId(1)), "feed").await.unwrap();
    pump(&alpha, &mut rx_a).await;

    alpha.set_string_tuple("feed", "one").await.unwrap();
    pump(&beta, &mut rx_b).await;
    assert!(beta.get_tuple(PeerId(1), "feed", Freshness::Any).is_ok());

    beta.unsubscribe(handle).await.unwrap();
    pump(&alpha, &mut rx_a).await;

    alpha.set_string_tuple("feed", "two").await.unwrap();
    pump(&beta, &mut rx_b).await;

    // The second write never reached beta.
    let stale = beta.get_tuple(PeerId(1), "feed", Freshness::Any).unwrap();
    assert_eq!(stale.data_str(), Some("one"));
    assert_eq!(
        beta.unsubscribe(handle).await.unwrap_err(),
        TupleError::HandleNotFound
    );
}

#[tokio::test]
async fn set_remote_tuple_is_adopted_by_the_owner() {
    let mesh = InMemoryMesh::new();
    let (alpha, mut rx_a) = kernel_on(&mesh, 1);
    let (beta, mut rx_b) = kernel_on(&mesh, 2);

    // Beta watches the tuple it is about to set on alpha.
    beta.subscribe(Some(PeerId(1)), "cmd").await.unwrap();
    pump(&alpha, &mut rx_a).await;

    beta.set_remote_tuple(PeerId(1), "cmd", b"go".to_vec(), "text/plain", Encoding::Text)
        .await
        .unwrap();
    pump(&alpha, &mut rx_a).await;

    let owned = alpha.get_tuple(PeerId(1), "cmd", Freshness::Any).unwrap();
    assert_eq!(owned.data_str(), Some("go"));
    assert_eq!(owned.creator, PeerId(2));

    // The adoption was pushed back to the subscriber.
    pump(&beta, &mut rx_b).await;
    assert_eq!(
        beta.get_tuple(PeerId(1), "cmd", Freshness::Any).unwrap().data_str(),
        Some("go")
    );
}

#[tokio::test]
async fn failed_pushes_are_retried_until_the_link_returns() {
    let mesh = InMemoryMesh::new();
    let (alpha, mut rx_a) = kernel_on(&mesh, 1);
    let (beta, mut rx_b) = kernel_on(&mesh, 2);

    beta.subscribe(Some(PeerId(1)), "flaky").await.unwrap();
    pump(&alpha, &mut rx_a).await;

    mesh.set_link_down(PeerId(2), true);
    alpha.set_string_tuple("flaky", "v1").await.unwrap();
    pump(&beta, &mut rx_b).await;
    assert_eq!(
        beta.get_tuple(PeerId(1), "flaky", Freshness::Any),
        Err(TupleError::NotFound)
    );

    mesh.set_link_down(PeerId(2), false);
    // Retry passes run every other manage tick.
    alpha.run_manage_tick().await;
    alpha.run_manage_tick().await;
    pump(&beta, &mut rx_b).await;

    assert_eq!(
        beta.get_tuple(PeerId(1), "flaky", Freshness::Any).unwrap().data_str(),
        Some("v1")
    );
}

#[tokio::test]
async fn superseded_retries_are_dropped_in_favor_of_the_newer_push() {
    let mesh = InMemoryMesh::new();
    let (alpha, mut rx_a) = kernel_on(&mesh, 1);
    let (beta, mut rx_b) = kernel_on(&mesh, 2);

    beta.subscribe(Some(PeerId(1)), "hot").await.unwrap();
    pump(&alpha, &mut rx_a).await;

    mesh.set_link_down(PeerId(2), true);
    alpha.set_string_tuple("hot", "old").await.unwrap();
    mesh.set_link_down(PeerId(2), false);
    alpha.set_string_tuple("hot", "new").await.unwrap();
    pump(&beta, &mut rx_b).await;
    assert_eq!(
        beta.get_tuple(PeerId(1), "hot", Freshness::Any).unwrap().data_str(),
        Some("new")
    );

    // The queued retry of "old" must not regress the subscriber.
    alpha.run_manage_tick().await;
    alpha.run_manage_tick().await;
    pump(&beta, &mut rx_b).await;
    assert_eq!(
        beta.get_tuple(PeerId(1), "hot", Freshness::Any).unwrap().data_str(),
        Some("new")
    );
}

#[tokio::test]
async fn wildcard_owner_subscriptions_reach_known_peers_via_manage_tick() {
    let mesh = InMemoryMesh::new();
    let (alpha, mut rx_a) = kernel_on(&mesh, 1);
    let (beta, mut rx_b) = kernel_on(&mesh, 2);

    alpha.set_string_tuple("announce", "here").await.unwrap();

    // Beta learns about alpha after subscribing; the manage tick makes up
    // for the missed direct send.
    beta.subscribe(None, "announce").await.unwrap();
    beta.peer_joined(PeerId(1));
    beta.run_manage_tick().await;
    pump(&alpha, &mut rx_a).await;
    pump(&beta, &mut rx_b).await;

    assert_eq!(
        beta.get_tuple(PeerId(1), "announce", Freshness::Any).unwrap().data_str(),
        Some("here")
    );
}

#[tokio::test]
async fn peer_lost_expires_its_tuples_and_subscriptions() {
    let mesh = InMemoryMesh::new();
    let (alpha, mut rx_a) = kernel_on(&mesh, 1);
    let (beta, mut rx_b) = kernel_on(&mesh, 2);

    // Exchange state in both directions.
    beta.subscribe(Some(PeerId(1)), "a.val").await.unwrap();
    pump(&alpha, &mut rx_a).await;
    alpha.set_string_tuple("a.val", "x").await.unwrap();
    pump(&beta, &mut rx_b).await;
    assert!(beta.get_tuple(PeerId(1), "a.val", Freshness::Any).is_ok());
    assert!(alpha.has_subscriber(&TuplePattern::parse(Some(PeerId(1)), "a.val").unwrap()));

    beta.peer_lost(PeerId(1));
    beta.run_expiry_sweep().await;
    assert_eq!(
        beta.get_tuple(PeerId(1), "a.val", Freshness::Any),
        Err(TupleError::NotFound)
    );

    alpha.peer_lost(PeerId(2));
    // Writes no longer try to reach the lost subscriber.
    alpha.set_string_tuple("a.val", "y").await.unwrap();
    pump(&beta, &mut rx_b).await;
    assert_eq!(
        beta.get_tuple(PeerId(1), "a.val", Freshness::Any),
        Err(TupleError::NotFound)
    );
}

#[tokio::test]
async fn reload_subscription_forces_a_repush() {
    let mesh = InMemoryMesh::new();
    let (alpha, mut rx_a) = kernel_on(&mesh, 1);
    let (beta, mut rx_b) = kernel_on(&mesh, 2);

    let handle = beta.subscribe(Some(PeerId(1)), "cfg").await.unwrap();
    pump(&alpha, &mut rx_a).await;
    alpha.set_string_tuple("cfg", "v").await.unwrap();
    pump(&beta, &mut rx_b).await;

    // Consume the fresh flag, then ask for a resend.
    beta.get_tuple(PeerId(1), "cfg", Freshness::FreshOnly).unwrap();
    beta.reload_subscription(handle).await.unwrap();
    pump(&alpha, &mut rx_a).await;
    pump(&beta, &mut rx_b).await;

    // Same version arrives again; the seqno guard drops it, so the local
    // copy stays read but intact.
    assert_eq!(
        beta.get_tuple(PeerId(1), "cfg", Freshness::Any).unwrap().data_str(),
        Some("v")
    );
}
