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

//! Single-kernel behavior: local reads and writes, freshness, expiry,
//! result sets and the derived key listing.

use std::sync::Arc;
use std::time::Duration;

use peerspace_transport::{InMemoryMesh, PeerId};
use peerspace_tuplespace::{listing, wire};
use peerspace_tuplespace::{
    CallbackKind, Encoding, Freshness, Kernel, KernelConfig, TimeVal, Tuple, TupleError, TupleKey,
    TuplePattern, TupleResults,
};

fn solo_kernel(id: i32) -> Kernel {
    let mesh = InMemoryMesh::new();
    let (endpoint, _rx) = mesh.attach(PeerId(id));
    Kernel::new(KernelConfig::new(id), Arc::new(endpoint))
}

#[tokio::test]
async fn set_then_get_round_trips() {
    let kernel = solo_kernel(1);
    kernel.set_string_tuple("robot.name", "alpha").await.unwrap();

    let tuple = kernel
        .get_tuple(PeerId(1), "robot.name", Freshness::Any)
        .unwrap();
    assert_eq!(tuple.data_str(), Some("alpha"));
    assert_eq!(tuple.owner, PeerId(1));
    assert_eq!(tuple.seqno, 1);
    assert!(tuple.write_time.sec > 0);
}

#[tokio::test]
async fn reading_consumes_the_fresh_flag() {
    let kernel = solo_kernel(1);
    kernel.set_string_tuple("k", "v1").await.unwrap();

    let first = kernel.get_tuple(PeerId(1), "k", Freshness::FreshOnly).unwrap();
    assert!(first.is_new);
    assert_eq!(
        kernel.get_tuple(PeerId(1), "k", Freshness::FreshOnly),
        Err(TupleError::NotFound)
    );
    // Any still sees the value.
    assert!(kernel.get_tuple(PeerId(1), "k", Freshness::Any).is_ok());

    // A rewrite makes it fresh again.
    kernel.set_string_tuple("k", "v2").await.unwrap();
    let again = kernel.get_tuple(PeerId(1), "k", Freshness::FreshOnly).unwrap();
    assert_eq!(again.data_str(), Some("v2"));
    assert_eq!(again.seqno, 2);
}

#[tokio::test]
async fn updates_rewrite_in_place() {
    let kernel = solo_kernel(1);
    kernel.set_string_tuple("k", "x").await.unwrap();
    kernel.set_string_tuple("k", "y").await.unwrap();

    let mut results = TupleResults::new();
    let found = kernel.get_tuples(
        &TuplePattern::parse(Some(PeerId(1)), "k").unwrap(),
        &mut results,
    );
    assert_eq!(found, 1);
    assert!(results.next());
    assert_eq!(results.value().unwrap().data_str(), Some("y"));
}

#[tokio::test]
async fn pattern_queries_fill_a_result_set() {
    let kernel = solo_kernel(1);
    kernel.set_string_tuple("sensor.a", "1").await.unwrap();
    kernel.set_string_tuple("sensor.b", "2").await.unwrap();
    kernel.set_string_tuple("other", "3").await.unwrap();

    let mut results = TupleResults::new();
    let pattern = TuplePattern::parse(None, "sensor.*").unwrap();
    assert_eq!(kernel.get_tuples(&pattern, &mut results), 2);

    let mut seen = Vec::new();
    while results.next() {
        seen.push(results.value().unwrap().key.as_str().to_owned());
    }
    seen.sort();
    assert_eq!(seen, vec!["sensor.a", "sensor.b"]);

    // Concatenating: a second query appends.
    let pattern = TuplePattern::parse(None, "other").unwrap();
    assert_eq!(kernel.get_tuples(&pattern, &mut results), 1);
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn delete_is_expire_now_and_fires_deletion_callbacks() {
    let kernel = solo_kernel(1);
    kernel.set_string_tuple("doomed", "v").await.unwrap();

    let deleted = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = Arc::clone(&deleted);
    kernel.register_callback(
        TuplePattern::parse(Some(PeerId(1)), "doomed").unwrap(),
        CallbackKind::Deleted,
        move |t| log.lock().push(t.key.as_str().to_owned()),
    );

    kernel.delete_tuple(PeerId(1), "doomed").await.unwrap();
    // Already unreadable before the sweep runs.
    assert_eq!(
        kernel.get_tuple(PeerId(1), "doomed", Freshness::Any),
        Err(TupleError::NotFound)
    );

    kernel.run_expiry_sweep().await;
    kernel.run_expiry_sweep().await;
    assert_eq!(deleted.lock().as_slice(), ["doomed"]);
    assert!(!kernel.tuple_exists("doomed").unwrap());
}

#[tokio::test]
async fn future_expiry_is_honored_by_the_sweep() {
    let kernel = solo_kernel(1);
    let mut tuple = Tuple::text(PeerId(1), TupleKey::parse("lease").unwrap(), "v");
    tuple.expire_time = TimeVal::now().after(Duration::from_millis(50));
    kernel.insert_tuple(tuple).await.unwrap();

    assert!(kernel.tuple_exists("lease").unwrap());
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!kernel.tuple_exists("lease").unwrap());
    kernel.run_expiry_sweep().await;
    assert_eq!(
        kernel.get_tuple(PeerId(1), "lease", Freshness::Any),
        Err(TupleError::NotFound)
    );
}

#[tokio::test]
async fn all_keys_listing_tracks_owned_keys() {
    let kernel = solo_kernel(1);
    kernel.set_string_tuple("a.x", "1").await.unwrap();
    kernel.set_string_tuple("b.y", "2").await.unwrap();

    let tuple = kernel
        .get_tuple(PeerId(1), listing::ALL_KEYS_KEY, Freshness::Any)
        .unwrap();
    let keys = listing::decode_key_listing(tuple.data_str().unwrap()).unwrap();
    let names: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
    assert!(names.contains(&"a.x"));
    assert!(names.contains(&"b.y"));
}

#[tokio::test]
async fn change_callbacks_fire_on_local_writes() {
    let kernel = solo_kernel(1);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    kernel.register_callback(
        TuplePattern::parse(None, "watched.*").unwrap(),
        CallbackKind::Changed,
        move |t| log.lock().push(t.data_str().unwrap_or("").to_owned()),
    );

    kernel.set_string_tuple("watched.k", "one").await.unwrap();
    kernel.set_string_tuple("ignored", "x").await.unwrap();
    kernel.set_string_tuple("watched.k", "two").await.unwrap();
    assert_eq!(seen.lock().as_slice(), ["one", "two"]);
}

#[tokio::test]
async fn callbacks_may_reenter_the_kernel() {
    let kernel = solo_kernel(1);
    let inner = kernel.clone();
    kernel.register_callback(
        TuplePattern::parse(Some(PeerId(1)), "ping").unwrap(),
        CallbackKind::Changed,
        move |t| {
            // Re-entrant read while the callback runs.
            let copy = inner.get_tuple(t.owner, "ping", Freshness::Any).unwrap();
            assert_eq!(copy.data, t.data);
        },
    );
    kernel.set_string_tuple("ping", "pong").await.unwrap();
}

#[tokio::test]
async fn blocking_get_wakes_on_write() {
    let kernel = solo_kernel(1);
    let reader = kernel.clone();
    let waiter = tokio::spawn(async move {
        reader
            .get_tuple_blocking(PeerId(1), "late", Freshness::Any)
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    kernel.set_string_tuple("late", "arrived").await.unwrap();

    let tuple = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(tuple.data_str(), Some("arrived"));
}

#[tokio::test]
async fn find_owner_returns_the_publishing_peer() {
    let kernel = solo_kernel(9);
    let finder = kernel.clone();
    let waiter = tokio::spawn(async move { finder.find_owner("shared.key").await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    kernel.set_string_tuple("shared.key", "v").await.unwrap();

    let owner = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(owner, PeerId(9));
}

#[tokio::test]
async fn defaults_only_write_when_absent() {
    let kernel = solo_kernel(1);
    kernel.set_string_tuple("cfg.speed", "fast").await.unwrap();
    kernel.set_default_tuple("cfg.speed", "slow").await.unwrap();
    kernel.set_default_tuple("cfg.mode", "auto").await.unwrap();

    assert_eq!(
        kernel
            .get_tuple(PeerId(1), "cfg.speed", Freshness::Any)
            .unwrap()
            .data_str(),
        Some("fast")
    );
    assert_eq!(
        kernel
            .get_tuple(PeerId(1), "cfg.mode", Freshness::Any)
            .unwrap()
            .data_str(),
        Some("auto")
    );
}

#[tokio::test]
async fn user_time_default_applies_to_new_tuples() {
    let kernel = solo_kernel(1);
    let stamp = TimeVal { sec: 1234, usec: 5 };
    kernel.set_user_time(Some(stamp));
    kernel.set_string_tuple("stamped", "v").await.unwrap();
    kernel.set_user_time(None);
    kernel.set_string_tuple("plain", "v").await.unwrap();

    assert_eq!(
        kernel.get_tuple(PeerId(1), "stamped", Freshness::Any).unwrap().user_time,
        stamp
    );
    assert!(kernel
        .get_tuple(PeerId(1), "plain", Freshness::Any)
        .unwrap()
        .user_time
        .is_never());
}

#[tokio::test]
async fn bad_keys_are_rejected_and_recorded() {
    let kernel = solo_kernel(1);
    let err = kernel.set_string_tuple("a..b", "v").await.unwrap_err();
    assert!(matches!(err, TupleError::BadKey(_)));
    assert!(matches!(kernel.last_error(), Some(TupleError::BadKey(_))));

    assert!(matches!(
        kernel.set_tuple("x.*", Vec::new(), "text/plain", Encoding::Text).await,
        Err(TupleError::BadKey(_))
    ));

    // Deletes and appends record their key failures the same way.
    kernel.set_string_tuple("ok", "v").await.unwrap();
    assert!(matches!(
        kernel.delete_tuple(PeerId(1), "a..b").await,
        Err(TupleError::BadKey(_))
    ));
    assert!(matches!(kernel.last_error(), Some(TupleError::BadKey(_))));
    assert!(matches!(
        kernel.append_tuple(Some(PeerId(1)), ".bad", b"x").await,
        Err(TupleError::BadKey(_))
    ));
    assert!(matches!(kernel.last_error(), Some(TupleError::BadKey(_))));
}

#[tokio::test]
async fn oversized_payloads_are_rejected_before_entering_the_space() {
    let kernel = solo_kernel(1);
    let data = vec![0u8; wire::MAX_DATA_LENGTH + 1];
    assert_eq!(
        kernel
            .set_tuple("big", data, "application/octet-stream", Encoding::Binary)
            .await,
        Err(TupleError::OutOfMemory)
    );
    assert_eq!(kernel.last_error(), Some(TupleError::OutOfMemory));
    assert!(!kernel.tuple_exists("big").unwrap());
}
