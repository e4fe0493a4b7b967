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

//! Meta-tuple indirection: declare, retarget, read-through, write-through
//! and indirect subscriptions that follow the reference.

use std::sync::Arc;

use peerspace_transport::{InMemoryMesh, InboundMessage, PeerId};
use tokio::sync::mpsc::UnboundedReceiver;

use peerspace_tuplespace::{
    Encoding, Freshness, Kernel, KernelConfig, TupleError, TuplePattern, META_MIMETYPE,
};

fn kernel_on(mesh: &Arc<InMemoryMesh>, id: i32) -> (Kernel, UnboundedReceiver<InboundMessage>) {
    let (endpoint, rx) = mesh.attach(PeerId(id));
    (Kernel::new(KernelConfig::new(id), Arc::new(endpoint)), rx)
}

async fn pump(kernel: &Kernel, rx: &mut UnboundedReceiver<InboundMessage>) {
    while let Ok(msg) = rx.try_recv() {
        kernel.handle_inbound(msg).await;
    }
}

#[tokio::test]
async fn declare_is_idempotent_and_unresolved() {
    let mesh = InMemoryMesh::new();
    let (kernel, _rx) = kernel_on(&mesh, 1);

    kernel.declare_meta_tuple("refs.target").await.unwrap();
    assert!(kernel.is_meta_tuple(PeerId(1), "refs.target"));
    assert_eq!(
        kernel.get_tuple_indirectly(PeerId(1), "refs.target", Freshness::Any),
        Err(TupleError::InvalidMeta)
    );

    // Point it somewhere, then declare again: the reference must survive.
    kernel.set_string_tuple("real.value", "42").await.unwrap();
    kernel
        .set_meta_tuple(PeerId(1), "refs.target", Some((PeerId(1), "real.value")))
        .await
        .unwrap();
    kernel.declare_meta_tuple("refs.target").await.unwrap();

    let resolved = kernel
        .get_tuple_indirectly(PeerId(1), "refs.target", Freshness::Any)
        .unwrap();
    assert_eq!(resolved.data_str(), Some("42"));
}

#[tokio::test]
async fn meta_tuples_carry_the_meta_mimetype() {
    let mesh = InMemoryMesh::new();
    let (kernel, _rx) = kernel_on(&mesh, 1);
    kernel.declare_meta_tuple("m").await.unwrap();

    let tuple = kernel.get_tuple(PeerId(1), "m", Freshness::Any).unwrap();
    assert_eq!(tuple.mimetype, META_MIMETYPE);
    assert_eq!(tuple.data_str(), Some("(META -1 NULL)"));
    assert!(!kernel.is_meta_tuple(PeerId(1), "missing.key"));
}

#[tokio::test]
async fn write_through_reaches_the_referenced_tuple() {
    let mesh = InMemoryMesh::new();
    let (kernel, _rx) = kernel_on(&mesh, 1);

    kernel.set_string_tuple("slot.a", "old").await.unwrap();
    kernel
        .set_meta_tuple(PeerId(1), "current", Some((PeerId(1), "slot.a")))
        .await
        .unwrap();
    kernel
        .set_tuple_indirectly(PeerId(1), "current", b"new".to_vec(), "text/plain", Encoding::Text)
        .await
        .unwrap();

    assert_eq!(
        kernel.get_tuple(PeerId(1), "slot.a", Freshness::Any).unwrap().data_str(),
        Some("new")
    );
}

#[tokio::test]
async fn retarget_changes_what_reads_resolve_to() {
    let mesh = InMemoryMesh::new();
    let (kernel, _rx) = kernel_on(&mesh, 1);

    kernel.set_string_tuple("cam.front", "f").await.unwrap();
    kernel.set_string_tuple("cam.rear", "r").await.unwrap();
    kernel
        .set_meta_tuple(PeerId(1), "cam.active", Some((PeerId(1), "cam.front")))
        .await
        .unwrap();
    assert_eq!(
        kernel
            .get_tuple_indirectly(PeerId(1), "cam.active", Freshness::Any)
            .unwrap()
            .data_str(),
        Some("f")
    );

    kernel
        .set_meta_tuple(PeerId(1), "cam.active", Some((PeerId(1), "cam.rear")))
        .await
        .unwrap();
    assert_eq!(
        kernel
            .get_tuple_indirectly(PeerId(1), "cam.active", Freshness::Any)
            .unwrap()
            .data_str(),
        Some("r")
    );
}

#[tokio::test]
async fn indirect_subscription_follows_the_reference() {
    let mesh = InMemoryMesh::new();
    let (alpha, mut rx_a) = kernel_on(&mesh, 1);
    let (beta, mut rx_b) = kernel_on(&mesh, 2);

    // Alpha owns two data tuples and a meta tuple pointing at the first.
    alpha.set_string_tuple("feed.one", "1a").await.unwrap();
    alpha.set_string_tuple("feed.two", "2a").await.unwrap();
    alpha
        .set_meta_tuple(PeerId(1), "feed.current", Some((PeerId(1), "feed.one")))
        .await
        .unwrap();

    let handle = beta.subscribe_indirectly(PeerId(1), "feed.current").await.unwrap();
    pump(&alpha, &mut rx_a).await;
    pump(&beta, &mut rx_b).await;
    // Meta tuple arrived; its callback subscribed to feed.one.
    pump(&alpha, &mut rx_a).await;
    pump(&beta, &mut rx_b).await;

    assert_eq!(
        beta.get_tuple(PeerId(1), "feed.one", Freshness::Any).unwrap().data_str(),
        Some("1a")
    );
    assert_eq!(
        beta
            .get_tuple_indirectly(PeerId(1), "feed.current", Freshness::Any)
            .unwrap()
            .data_str(),
        Some("1a")
    );

    // Updates to the referenced tuple flow through.
    alpha.set_string_tuple("feed.one", "1b").await.unwrap();
    pump(&beta, &mut rx_b).await;
    assert_eq!(
        beta.get_tuple(PeerId(1), "feed.one", Freshness::Any).unwrap().data_str(),
        Some("1b")
    );

    // Retarget to feed.two: the inner subscription moves.
    alpha
        .set_meta_tuple(PeerId(1), "feed.current", Some((PeerId(1), "feed.two")))
        .await
        .unwrap();
    pump(&beta, &mut rx_b).await;
    pump(&alpha, &mut rx_a).await;
    pump(&beta, &mut rx_b).await;

    assert_eq!(
        beta.get_tuple(PeerId(1), "feed.two", Freshness::Any).unwrap().data_str(),
        Some("2a")
    );

    // New writes to the old target no longer arrive.
    alpha.set_string_tuple("feed.one", "1c").await.unwrap();
    pump(&beta, &mut rx_b).await;
    assert_eq!(
        beta.get_tuple(PeerId(1), "feed.one", Freshness::Any).unwrap().data_str(),
        Some("1b")
    );

    // Tearing down the indirect handle also drops the inner subscription.
    beta.unsubscribe(handle).await.unwrap();
    pump(&alpha, &mut rx_a).await;
    alpha.set_string_tuple("feed.two", "2b").await.unwrap();
    pump(&beta, &mut rx_b).await;
    assert_eq!(
        beta.get_tuple(PeerId(1), "feed.two", Freshness::Any).unwrap().data_str(),
        Some("2a")
    );
}

#[tokio::test]
async fn indirect_unsubscribe_notifies_the_meta_owner() {
    let mesh = InMemoryMesh::new();
    let (alpha, mut rx_a) = kernel_on(&mesh, 1);
    let (beta, mut rx_b) = kernel_on(&mesh, 2);

    alpha.set_string_tuple("feed.one", "v").await.unwrap();
    alpha
        .set_meta_tuple(PeerId(1), "feed.current", Some((PeerId(1), "feed.one")))
        .await
        .unwrap();

    let handle = beta.subscribe_indirectly(PeerId(1), "feed.current").await.unwrap();
    pump(&alpha, &mut rx_a).await;
    pump(&beta, &mut rx_b).await;
    pump(&alpha, &mut rx_a).await;
    pump(&beta, &mut rx_b).await;

    let meta_pattern = TuplePattern::parse(Some(PeerId(1)), "feed.current").unwrap();
    let inner_pattern = TuplePattern::parse(Some(PeerId(1)), "feed.one").unwrap();
    assert!(alpha.has_subscriber(&meta_pattern));
    assert!(alpha.has_subscriber(&inner_pattern));

    // Unsubscribing tells the owner to stop pushing both the meta tuple
    // and its current target, without waiting for the subscription TTL.
    beta.unsubscribe(handle).await.unwrap();
    pump(&alpha, &mut rx_a).await;
    assert!(!alpha.has_subscriber(&meta_pattern));
    assert!(!alpha.has_subscriber(&inner_pattern));
}
